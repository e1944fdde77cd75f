use crate::prelude::*;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

// Channel {{{
/// Every measurement the bridge can publish. The set is closed; which ones
/// are actually published is decided by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Temperature,
    Power,
    AcFrequency,
    AcVoltage,
    EnergyToday,
    EnergyTotal,
    OperatingHours,
    VoltagePv1,
    CurrentPv1,
    CurrentAc1,
    Connected,
    LoggerId,
    InverterId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelKind {
    Numeric { unit: &'static str, decimals: usize },
    Binary,
    Text,
}

impl Channel {
    pub const ALL: [Channel; 13] = [
        Channel::Temperature,
        Channel::Power,
        Channel::AcFrequency,
        Channel::AcVoltage,
        Channel::EnergyToday,
        Channel::EnergyTotal,
        Channel::OperatingHours,
        Channel::VoltagePv1,
        Channel::CurrentPv1,
        Channel::CurrentAc1,
        Channel::Connected,
        Channel::LoggerId,
        Channel::InverterId,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Channel::Temperature => "temperature",
            Channel::Power => "power",
            Channel::AcFrequency => "ac_frequency",
            Channel::AcVoltage => "ac_voltage",
            Channel::EnergyToday => "energy_today",
            Channel::EnergyTotal => "energy_total",
            Channel::OperatingHours => "operating_hours",
            Channel::VoltagePv1 => "voltage_pv1",
            Channel::CurrentPv1 => "current_pv1",
            Channel::CurrentAc1 => "current_ac1",
            Channel::Connected => "connected",
            Channel::LoggerId => "logger_id",
            Channel::InverterId => "inverter_id",
        }
    }

    pub fn kind(&self) -> ChannelKind {
        use ChannelKind::*;

        match self {
            Channel::Temperature => Numeric { unit: "°C", decimals: 1 },
            Channel::Power => Numeric { unit: "W", decimals: 0 },
            Channel::AcFrequency => Numeric { unit: "Hz", decimals: 2 },
            Channel::AcVoltage | Channel::VoltagePv1 => Numeric { unit: "V", decimals: 1 },
            Channel::EnergyToday => Numeric { unit: "kWh", decimals: 2 },
            Channel::EnergyTotal => Numeric { unit: "kWh", decimals: 1 },
            Channel::OperatingHours => Numeric { unit: "h", decimals: 0 },
            Channel::CurrentPv1 | Channel::CurrentAc1 => Numeric { unit: "A", decimals: 1 },
            Channel::Connected => Binary,
            Channel::LoggerId | Channel::InverterId => Text,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self.kind(), ChannelKind::Numeric { .. })
    }

    pub fn unit(&self) -> Option<&'static str> {
        match self.kind() {
            ChannelKind::Numeric { unit, .. } => Some(unit),
            _ => None,
        }
    }

    pub fn decimals(&self) -> usize {
        match self.kind() {
            ChannelKind::Numeric { decimals, .. } => decimals,
            _ => 0,
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id())
    }
}

impl FromStr for Channel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Channel::ALL
            .iter()
            .find(|c| c.id() == s)
            .copied()
            .ok_or_else(|| anyhow!("unknown sensor channel '{}'", s))
    }
} // }}}

// SensorValue {{{
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Numeric(f64),
    Binary(bool),
    Text(String),
    Unavailable,
}

impl SensorValue {
    /// A numeric value rounded to the channel's published precision.
    pub fn numeric(channel: Channel, value: f64) -> Self {
        Self::Numeric(Utils::round(value, channel.decimals() as u32))
    }

    /// Payload as it goes over the wire to a sensor registry.
    pub fn payload(&self, channel: Channel) -> String {
        match self {
            Self::Numeric(v) => format!("{:.*}", channel.decimals(), v),
            Self::Binary(true) => "ON".to_string(),
            Self::Binary(false) => "OFF".to_string(),
            Self::Text(s) => s.clone(),
            Self::Unavailable => "unavailable".to_string(),
        }
    }
} // }}}

// sinks {{{
/// The external sensor boundary. Implementations must not block.
#[enum_dispatch]
pub trait SensorSink {
    fn publish(&self, channel: Channel, value: &SensorValue) -> Result<()>;
}

#[enum_dispatch(SensorSink)]
#[derive(Clone, Debug)]
pub enum Sink {
    LogSink,
    MqttSink,
    RecordingSink,
}

#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl SensorSink for LogSink {
    fn publish(&self, channel: Channel, value: &SensorValue) -> Result<()> {
        match channel.unit() {
            Some(unit) if !matches!(value, SensorValue::Unavailable) => {
                info!("{} = {} {}", channel, value.payload(channel), unit)
            }
            _ => info!("{} = {}", channel, value.payload(channel)),
        }
        Ok(())
    }
}

/// Hands each publish to the MQTT sender task as a retained message on
/// `<namespace>/<channel_id>`.
#[derive(Clone, Debug)]
pub struct MqttSink {
    channels: Channels,
}

impl MqttSink {
    pub fn new(channels: Channels) -> Self {
        Self { channels }
    }
}

impl SensorSink for MqttSink {
    fn publish(&self, channel: Channel, value: &SensorValue) -> Result<()> {
        let message = mqtt::Message {
            topic: channel.id().to_string(),
            retain: true,
            payload: value.payload(channel),
        };

        if self
            .channels
            .to_mqtt
            .send(mqtt::ChannelData::Message(message))
            .is_err()
        {
            bail!("send(to_mqtt) failed - channel closed?");
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    published: Arc<Mutex<Vec<(Channel, SensorValue)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(Channel, SensorValue)> {
        self.published
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Values published on one channel, oldest first.
    pub fn values(&self, channel: Channel) -> Vec<SensorValue> {
        self.published()
            .into_iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, v)| v)
            .collect()
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.published.lock() {
            p.clear();
        }
    }
}

impl SensorSink for RecordingSink {
    fn publish(&self, channel: Channel, value: &SensorValue) -> Result<()> {
        self.published
            .lock()
            .map_err(|_| anyhow!("recording sink poisoned"))?
            .push((channel, value.clone()));
        Ok(())
    }
} // }}}
