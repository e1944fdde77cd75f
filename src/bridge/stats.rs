use crate::prelude::*;

#[derive(Default, Debug, Clone)]
pub struct BridgeStats {
    pub sessions_accepted: u64,
    pub sessions_replaced: u64,
    pub idle_timeouts: u64,
    pub read_errors: u64,
    // frames
    pub frames_decoded: u64,
    pub framing_errors: u64,
    pub malformed_frames: u64,
    pub checksum_failures: u64,
    pub identity_changes: u64,
    // publishing
    pub values_published: u64,
    pub publish_errors: u64,
    pub availability_expiries: u64,

    pub last_frame: Option<chrono::DateTime<chrono::Local>>,
}

impl BridgeStats {
    pub fn record_decode_error(&mut self, e: &DecodeError) {
        match e {
            DecodeError::Malformed(_) => self.malformed_frames += 1,
            DecodeError::ChecksumFailed { .. } => self.checksum_failures += 1,
        }
    }

    pub fn print_summary(&self) {
        info!("Bridge Statistics:");
        info!("  Sessions:");
        info!("    Accepted: {}", self.sessions_accepted);
        info!("    Replaced: {}", self.sessions_replaced);
        info!("    Idle timeouts: {}", self.idle_timeouts);
        info!("    Read errors: {}", self.read_errors);
        info!("  Frames:");
        info!("    Decoded: {}", self.frames_decoded);
        info!("    Framing errors: {}", self.framing_errors);
        info!("    Malformed: {}", self.malformed_frames);
        info!("    Checksum failures: {}", self.checksum_failures);
        info!("    Identity changes: {}", self.identity_changes);
        info!("  Sensors:");
        info!("    Values published: {}", self.values_published);
        info!("    Publish errors: {}", self.publish_errors);
        info!("    Availability expiries: {}", self.availability_expiries);
        match self.last_frame {
            Some(t) => info!("  Last frame: {}", t.format("%Y-%m-%dT%H:%M:%S")),
            None => info!("  Last frame: never"),
        }
    }
}
