use crate::prelude::*;

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

pub const START: u8 = 0x68;
pub const END: u8 = 0x16;

// start, length, message type (2), logger serial twice (4 + 4)
pub const HEADER_LEN: usize = 12;
// checksum, end marker
pub const TRAILER_LEN: usize = 2;
pub const OVERHEAD: usize = HEADER_LEN + TRAILER_LEN;

// the length field is a single byte
pub const MAX_FRAME_LEN: usize = OVERHEAD + u8::MAX as usize;

/// One complete datalogger message, header to end marker. Nothing about it
/// has been validated beyond its framing.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Bytes);

impl Frame {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total length the header claims, or None if there is no header.
    pub fn declared_len(&self) -> Option<usize> {
        self.0.get(1).map(|l| *l as usize + OVERHEAD)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Frame({} bytes: {:02x?})", self.0.len(), &self.0[..])
    }
}

// FrameCodec {{{
/// Splits a byte stream into frames: `0x68`, length byte, then exactly
/// `length + 12` more bytes ending in `0x16`. Anything that doesn't fit is
/// skipped a byte at a time until a plausible start marker lines up again.
///
/// A start marker whose claimed length runs past the received data is
/// abandoned as soon as a complete, checksummed frame is found behind it.
#[derive(Clone, Debug)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.clamp(OVERHEAD, MAX_FRAME_LEN),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    // length of a well-formed frame starting at src[0], if all of it is here
    fn complete_at(&self, src: &[u8]) -> Option<usize> {
        if src.len() < 2 || src[0] != START {
            return None;
        }

        let frame_len = src[1] as usize + OVERHEAD;
        if frame_len > self.max_frame_len || src.len() < frame_len || src[frame_len - 1] != END {
            return None;
        }

        let checksum = src[frame_len - 2];
        (Utils::sum8(&src[1..frame_len - 2]) == checksum).then_some(frame_len)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FramingError> {
        let skip = src.iter().position(|b| *b == START).unwrap_or(src.len());
        if skip > 0 {
            trace!("skipping {} bytes before start marker", skip);
            src.advance(skip);
        }

        if src.len() < 2 {
            return Ok(None);
        }

        let frame_len = src[1] as usize + OVERHEAD;
        if frame_len > self.max_frame_len {
            src.advance(1);
            return Err(FramingError::Oversized {
                claimed: frame_len,
                max: self.max_frame_len,
            });
        }

        if src.len() < frame_len {
            let later = (1..src.len()).find(|&i| self.complete_at(&src[i..]).is_some());
            if let Some(skipped) = later {
                src.advance(skipped);
                return Err(FramingError::Abandoned {
                    claimed: frame_len,
                    skipped,
                });
            }

            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        if src[frame_len - 1] != END {
            src.advance(1);
            return Err(FramingError::BadTrailer {
                offset: frame_len - 1,
            });
        }

        Ok(Some(Frame(src.split_to(frame_len).freeze())))
    }
} // }}}

// FrameBuffer {{{
/// Per-session receive buffer. The framing window never holds more than
/// `max_frame_len` bytes; input an iterator was dropped before reaching is
/// queued behind it, unframed, until the next `feed`.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    queued: BytesMut,
    codec: FrameCodec,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameBuffer {
    pub fn new(max_frame_len: usize) -> Self {
        let codec = FrameCodec::new(max_frame_len);
        Self {
            buf: BytesMut::with_capacity(codec.max_frame_len()),
            queued: BytesMut::new(),
            codec,
        }
    }

    /// Appends `input` and lazily yields every frame that becomes complete.
    /// Input the iterator doesn't get to (because it was dropped early) is
    /// not lost; it is picked up by the next call.
    pub fn feed<'a>(&'a mut self, input: &'a [u8]) -> Frames<'a> {
        Frames {
            buffer: self,
            input,
        }
    }

    /// Bytes held that don't yet form a frame.
    pub fn pending(&self) -> usize {
        self.buf.len() + self.queued.len()
    }

    /// Bytes inside the framing window, excluding queued input.
    pub fn window(&self) -> usize {
        self.buf.len()
    }

    /// Drops any partial frame, returning how many bytes were discarded.
    pub fn discard(&mut self) -> usize {
        let len = self.pending();
        self.buf.clear();
        self.queued.clear();
        len
    }
}

pub struct Frames<'a> {
    buffer: &'a mut FrameBuffer,
    input: &'a [u8],
}

impl<'a> Frames<'a> {
    // moves input into the window; false once there is nothing to move.
    // The codec always settles on a full window, so room is never 0 here.
    fn fill(&mut self) -> bool {
        let buffer = &mut *self.buffer;
        let room = buffer.codec.max_frame_len().saturating_sub(buffer.buf.len());
        if room == 0 {
            return false;
        }

        if !buffer.queued.is_empty() {
            let n = room.min(buffer.queued.len());
            let chunk = buffer.queued.split_to(n);
            buffer.buf.extend_from_slice(&chunk);
            return true;
        }

        if self.input.is_empty() {
            return false;
        }

        let n = room.min(self.input.len());
        buffer.buf.extend_from_slice(&self.input[..n]);
        self.input = &self.input[n..];
        true
    }
}

impl<'a> Iterator for Frames<'a> {
    type Item = Result<Frame, FramingError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.buffer.codec.decode(&mut self.buffer.buf) {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Err(e) => return Some(Err(e)),
                Ok(None) if self.fill() => continue,
                Ok(None) => return None,
            }
        }
    }
}

impl<'a> Drop for Frames<'a> {
    fn drop(&mut self) {
        if !self.input.is_empty() {
            self.buffer.queued.extend_from_slice(self.input);
        }
    }
}
// }}}
