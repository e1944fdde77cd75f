pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::io::Write;
pub use std::str::FromStr;
pub use tokio::sync::{broadcast, mpsc, oneshot};

pub use crate::access_point::AccessPointManager;
pub use crate::bridge::Bridge;
pub use crate::channels::Channels;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::error::{DecodeError, FramingError, NetworkError, SessionError};
pub use crate::mqtt;
pub use crate::omnik::{
    self,
    frame::{Frame, FrameBuffer},
    packet::{FrameDecoder, LoggerId, Telemetry},
};
pub use crate::options::Options;
pub use crate::sensors::{Channel, SensorSink, SensorValue, Sink};
pub use crate::utils::Utils;
