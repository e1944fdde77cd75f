use crate::prelude::*;
use crate::omnik::frame::{END, HEADER_LEN, OVERHEAD, START, TRAILER_LEN};

use nom_derive::{Nom, Parse};
use serde::Serialize;

// everything up to and including the operating hours counter
pub const MIN_PAYLOAD_LEN: usize = 67;
pub const MIN_FRAME_LEN: usize = MIN_PAYLOAD_LEN + OVERHEAD;

// LoggerId {{{
/// Datalogger serial number as it appears (twice) in every frame header.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LoggerId(u32);

impl LoggerId {
    pub fn new(serial: u32) -> Self {
        Self(serial)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for LoggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::fmt::Debug for LoggerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
} // }}}

// Telemetry {{{
/// One datalogger report. The payload is big-endian; every scaled field is
/// already in its public unit.
#[derive(Clone, Debug, PartialEq, Serialize, Nom)]
#[nom(BigEndian)]
pub struct Telemetry {
    #[nom(Ignore)]
    pub logger_id: LoggerId,
    #[nom(Ignore)]
    pub message_type: u16,

    #[nom(SkipBefore(3))]
    #[nom(Parse = "Utils::serial16")]
    pub inverter_id: String,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub temperature: f64,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_pv1: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_pv2: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_pv3: f64,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_pv1: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_pv2: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_pv3: f64,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_ac1: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_ac2: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub current_ac3: f64,

    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_ac1: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_ac2: f64,
    #[nom(Parse = "Utils::be_u16_div10")]
    pub voltage_ac3: f64,

    // frequency and power are interleaved per phase
    #[nom(Parse = "Utils::be_u16_div100")]
    pub frequency_ac1: f64,
    #[nom(Parse = "Utils::be_u16_f64")]
    pub power_ac1: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub frequency_ac2: f64,
    #[nom(Parse = "Utils::be_u16_f64")]
    pub power_ac2: f64,
    #[nom(Parse = "Utils::be_u16_div100")]
    pub frequency_ac3: f64,
    #[nom(Parse = "Utils::be_u16_f64")]
    pub power_ac3: f64,

    #[nom(Parse = "Utils::be_u16_div100")]
    pub energy_today: f64,
    #[nom(Parse = "Utils::be_u32_div10")]
    pub energy_total: f64,
    #[nom(Parse = "Utils::be_u32_f64")]
    pub operating_hours: f64,
}

impl Telemetry {
    /// The value a sensor channel would show for this report, rounded to the
    /// channel's precision. Connectivity is not part of a report.
    pub fn reading(&self, channel: Channel) -> Option<SensorValue> {
        let value = match channel {
            Channel::Temperature => self.temperature,
            Channel::Power => self.power_ac1,
            Channel::AcFrequency => self.frequency_ac1,
            Channel::AcVoltage => self.voltage_ac1,
            Channel::EnergyToday => self.energy_today,
            Channel::EnergyTotal => self.energy_total,
            Channel::OperatingHours => self.operating_hours,
            Channel::VoltagePv1 => self.voltage_pv1,
            Channel::CurrentPv1 => self.current_pv1,
            Channel::CurrentAc1 => self.current_ac1,
            Channel::LoggerId => return Some(SensorValue::Text(self.logger_id.to_string())),
            Channel::InverterId => return Some(SensorValue::Text(self.inverter_id.clone())),
            Channel::Connected => return None,
        };

        Some(SensorValue::numeric(channel, value))
    }
} // }}}

// FrameDecoder {{{
/// Turns one framed message into a `Telemetry`, or explains why not. Pure:
/// the same bytes always give the same answer.
pub struct FrameDecoder;

impl FrameDecoder {
    pub fn decode(frame: &Frame) -> Result<Telemetry, DecodeError> {
        let input = frame.bytes();
        let len = input.len();

        if len < OVERHEAD {
            return Err(DecodeError::Malformed(format!(
                "frame of {} bytes is shorter than its header",
                len
            )));
        }
        if input[0] != START {
            return Err(DecodeError::Malformed(format!(
                "invalid start byte {:#04x}",
                input[0]
            )));
        }
        if frame.declared_len() != Some(len) {
            return Err(DecodeError::Malformed(format!(
                "length mismatch: header declares {} bytes, frame has {}",
                input[1] as usize + OVERHEAD,
                len
            )));
        }
        if input[len - 1] != END {
            return Err(DecodeError::Malformed(format!(
                "invalid end byte {:#04x}",
                input[len - 1]
            )));
        }
        if len < MIN_FRAME_LEN {
            return Err(DecodeError::Malformed(format!(
                "payload of {} bytes, need at least {}",
                len - OVERHEAD,
                MIN_PAYLOAD_LEN
            )));
        }

        let got = input[len - TRAILER_LEN];
        let expected = Self::checksum(&input[..len - TRAILER_LEN]);
        if got != expected {
            return Err(DecodeError::ChecksumFailed { got, expected });
        }

        let logger_1 = u32::from_le_bytes([input[4], input[5], input[6], input[7]]);
        let logger_2 = u32::from_le_bytes([input[8], input[9], input[10], input[11]]);
        if logger_1 != logger_2 {
            return Err(DecodeError::Malformed(format!(
                "logger serial mismatch: {} != {}",
                logger_1, logger_2
            )));
        }

        let payload = &input[HEADER_LEN..len - TRAILER_LEN];
        let (_, mut telemetry) = Telemetry::parse(payload)
            .map_err(|e| DecodeError::Malformed(format!("payload: {:?}", e)))?;

        telemetry.logger_id = LoggerId::new(logger_1);
        telemetry.message_type = u16::from_be_bytes([input[2], input[3]]);

        Ok(telemetry)
    }

    /// Sum of everything between the start marker and the checksum byte.
    /// `data` is the frame without its trailer.
    pub fn checksum(data: &[u8]) -> u8 {
        Utils::sum8(data.get(1..).unwrap_or_default())
    }
} // }}}
