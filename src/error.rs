use std::time::Duration;

/// Failures bringing the network up. Fatal to startup; retrying is the
/// caller's decision.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("access point credentials not set")]
    MissingCredentials,

    #[error("radio unavailable: {0}")]
    RadioUnavailable(String),

    #[error("failed to configure access point address {ip}/{subnet}: {reason}")]
    AddressConfig {
        ip: std::net::Ipv4Addr,
        subnet: std::net::Ipv4Addr,
        reason: String,
    },

    #[error("failed to start access point '{ssid}': {reason}")]
    StartFailed { ssid: String, reason: String },

    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Recoverable stream-level problems. The buffer resynchronizes and the
/// session stays open.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("frame claims {claimed} bytes, maximum is {max}")]
    Oversized { claimed: usize, max: usize },

    #[error("no frame end marker at offset {offset}, resynchronizing")]
    BadTrailer { offset: usize },

    #[error("gave up on a {claimed} byte frame, complete frame found {skipped} bytes later")]
    Abandoned { claimed: usize, skipped: usize },

    // required by tokio_util::codec::Decoder
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-frame validation failures. The frame is dropped whole.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("checksum mismatch - got {got:#04x}, expected {expected:#04x}")]
    ChecksumFailed { got: u8, expected: u8 },
}

/// Session-fatal conditions. The session closes, the bridge keeps accepting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("no valid frame for {0:?}")]
    Timeout(Duration),

    #[error("read error: {0}")]
    Read(String),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Read(e.to_string())
    }
}
