use crate::prelude::*;
use crate::bridge::BridgeStats;

use net2::TcpStreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;

const TCP_KEEPALIVE_SECS: u64 = 60;
const READ_CHUNK: usize = 512;

pub type SessionId = u64;

// ChannelData {{{
/// Events a session reports to the bridge, in the order they happened.
#[derive(Clone, Debug, PartialEq)]
pub enum ChannelData {
    Connected {
        session: SessionId,
        peer: SocketAddr,
    },
    Telemetry(SessionId, Telemetry),
    IdentityChanged {
        session: SessionId,
        channel: Channel,
        previous: String,
        current: String,
    },
    Disconnect {
        session: SessionId,
        reason: CloseReason,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CloseReason {
    PeerClosed,
    Replaced,
    Shutdown,
    Failed(SessionError),
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::Replaced => write!(f, "replaced by a new connection"),
            Self::Shutdown => write!(f, "shutting down"),
            Self::Failed(e) => write!(f, "{}", e),
        }
    }
} // }}}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Closing,
}

#[derive(Clone, Debug)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub max_frame_len: usize,
    pub tcp_nodelay: bool,
}

impl SessionSettings {
    pub fn from_config(listener: &config::Listener) -> Self {
        Self {
            idle_timeout: listener.idle_timeout(),
            max_frame_len: listener.max_frame_len(),
            tcp_nodelay: listener.tcp_nodelay(),
        }
    }
}

/// Owns one accepted inverter connection from accept to teardown. Bytes are
/// framed and decoded here; what to publish is decided by the bridge.
pub struct ConnectionTracker {
    id: SessionId,
    peer: SocketAddr,
    state: SessionState,
    settings: SessionSettings,
    buffer: FrameBuffer,
    last_activity: Instant,
    logger_id: Option<LoggerId>,
    inverter_id: Option<String>,
    channels: Channels,
    stats: Arc<Mutex<BridgeStats>>,
}

impl ConnectionTracker {
    pub fn new(
        id: SessionId,
        peer: SocketAddr,
        settings: SessionSettings,
        channels: Channels,
        stats: Arc<Mutex<BridgeStats>>,
    ) -> Self {
        Self {
            id,
            peer,
            state: SessionState::Idle,
            buffer: FrameBuffer::new(settings.max_frame_len),
            settings,
            last_activity: Instant::now(),
            logger_id: None,
            inverter_id: None,
            channels,
            stats,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Keepalive (and optionally TCP_NODELAY) on a freshly accepted socket.
    /// Failures are logged, the connection is still usable without them.
    pub fn configure_socket(stream: TcpStream, nodelay: bool) -> Result<TcpStream> {
        let std_stream = stream.into_std()?;
        if let Err(e) = std_stream.set_keepalive(Some(Duration::new(TCP_KEEPALIVE_SECS, 0))) {
            warn!("Failed to set TCP keepalive: {}", e);
        }

        let stream = TcpStream::from_std(std_stream)?;
        if nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY: {}", e);
            }
        }

        Ok(stream)
    }

    /// Drives the session until the peer goes away, it idles out, or the
    /// bridge asks it to close. Always ends with a `Disconnect` event.
    pub async fn run(
        mut self,
        mut stream: TcpStream,
        mut close: oneshot::Receiver<CloseReason>,
    ) -> CloseReason {
        self.state = SessionState::Connected;
        self.last_activity = Instant::now();
        info!("session {}: connected from {}", self.id, self.peer);
        self.send(ChannelData::Connected {
            session: self.id,
            peer: self.peer,
        });

        let mut chunk = [0u8; READ_CHUNK];

        let reason = loop {
            let deadline = self.last_activity + self.settings.idle_timeout;

            tokio::select! {
                requested = &mut close => {
                    break requested.unwrap_or(CloseReason::Shutdown);
                }

                read = tokio::time::timeout_at(deadline, stream.read(&mut chunk)) => {
                    match read {
                        Err(_) => {
                            if let Ok(mut stats) = self.stats.lock() {
                                stats.idle_timeouts += 1;
                            }
                            break CloseReason::Failed(SessionError::Timeout(self.settings.idle_timeout));
                        }
                        Ok(Err(e)) => {
                            if let Ok(mut stats) = self.stats.lock() {
                                stats.read_errors += 1;
                            }
                            break CloseReason::Failed(e.into());
                        }
                        Ok(Ok(0)) => break CloseReason::PeerClosed,
                        Ok(Ok(n)) => {
                            self.handle_bytes(&chunk[..n]);
                        }
                    }
                }
            }
        };

        self.close(reason)
    }

    /// Frames and decodes newly received bytes, reporting each decoded
    /// report. Returns how many frames decoded successfully.
    pub fn handle_bytes(&mut self, data: &[u8]) -> usize {
        trace!("session {}: RX {} bytes", self.id, data.len());

        let frames: Vec<_> = self.buffer.feed(data).collect();
        let mut decoded = 0;

        for result in frames {
            match result {
                Ok(frame) => {
                    if self.handle_frame(&frame) {
                        decoded += 1;
                    }
                }
                Err(e) => {
                    warn!("session {}: {}", self.id, e);
                    if let Ok(mut stats) = self.stats.lock() {
                        stats.framing_errors += 1;
                    }
                }
            }
        }

        decoded
    }

    fn handle_frame(&mut self, frame: &Frame) -> bool {
        debug!("session {}: {:?}", self.id, frame);

        match FrameDecoder::decode(frame) {
            Ok(telemetry) => {
                self.last_activity = Instant::now();
                self.check_identity(&telemetry);

                if let Ok(mut stats) = self.stats.lock() {
                    stats.frames_decoded += 1;
                    stats.last_frame = Some(chrono::Local::now());
                }

                self.send(ChannelData::Telemetry(self.id, telemetry));
                true
            }
            Err(e) => {
                warn!("session {}: dropping frame: {}", self.id, e);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.record_decode_error(&e);
                }
                false
            }
        }
    }

    // an identity that changes mid-session is reported before the new
    // value reaches the bridge
    fn check_identity(&mut self, telemetry: &Telemetry) {
        if let Some(previous) = self.logger_id.replace(telemetry.logger_id) {
            if previous != telemetry.logger_id {
                self.identity_changed(
                    Channel::LoggerId,
                    previous.to_string(),
                    telemetry.logger_id.to_string(),
                );
            }
        }

        if let Some(previous) = self.inverter_id.replace(telemetry.inverter_id.clone()) {
            if previous != telemetry.inverter_id {
                self.identity_changed(Channel::InverterId, previous, telemetry.inverter_id.clone());
            }
        }
    }

    fn identity_changed(&self, channel: Channel, previous: String, current: String) {
        warn!(
            "session {}: {} changed mid-session from {} to {}, check for a swapped device",
            self.id, channel, previous, current
        );
        if let Ok(mut stats) = self.stats.lock() {
            stats.identity_changes += 1;
        }
        self.send(ChannelData::IdentityChanged {
            session: self.id,
            channel,
            previous,
            current,
        });
    }

    fn close(mut self, reason: CloseReason) -> CloseReason {
        self.state = SessionState::Closing;

        let discarded = self.buffer.discard();
        if discarded > 0 {
            debug!(
                "session {}: discarding {} bytes of partial frame",
                self.id, discarded
            );
        }

        info!("session {}: {} ({})", self.id, self.peer, reason);
        self.send(ChannelData::Disconnect {
            session: self.id,
            reason: reason.clone(),
        });

        reason
    }

    fn send(&self, data: ChannelData) {
        if self.channels.from_session.send(data).is_err() {
            debug!("session {}: no listeners for session events", self.id);
        }
    }
}
