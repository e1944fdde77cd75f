use crate::prelude::*;
use crate::bridge::BridgeStats;

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

// cleared to 0 when the inverter has not been heard from; temperature
// becomes unavailable instead, counters keep their last value
const ZEROED_ON_EXPIRY: [Channel; 6] = [
    Channel::Power,
    Channel::AcFrequency,
    Channel::AcVoltage,
    Channel::VoltagePv1,
    Channel::CurrentPv1,
    Channel::CurrentAc1,
];

/// Decides which values reach the sensor sink. Numeric channels go out when
/// they change or their refresh is due, text channels when first seen or
/// changed, connectivity only on a transition.
pub struct Publisher {
    enabled: BTreeSet<Channel>,
    refresh_interval: Duration,
    sink: Sink,
    last: HashMap<Channel, (SensorValue, Instant)>,
    connected: Option<bool>,
    stats: Arc<Mutex<BridgeStats>>,
}

impl Publisher {
    pub fn new(
        enabled: impl IntoIterator<Item = Channel>,
        refresh_interval: Duration,
        sink: Sink,
        stats: Arc<Mutex<BridgeStats>>,
    ) -> Self {
        Self {
            enabled: enabled.into_iter().collect(),
            refresh_interval,
            sink,
            last: HashMap::new(),
            connected: None,
            stats,
        }
    }

    pub fn is_enabled(&self, channel: Channel) -> bool {
        self.enabled.contains(&channel)
    }

    pub fn connected(&self) -> Option<bool> {
        self.connected
    }

    /// Returns the number of values handed to the sink.
    pub fn publish_telemetry(&mut self, telemetry: &Telemetry, now: Instant) -> usize {
        let channels: Vec<Channel> = self
            .enabled
            .iter()
            .copied()
            .filter(|c| *c != Channel::Connected)
            .collect();

        let mut published = 0;
        for channel in channels {
            let Some(value) = telemetry.reading(channel) else {
                continue;
            };
            if self.is_due(channel, &value, now) && self.emit(channel, value, now) {
                published += 1;
            }
        }

        published
    }

    /// Records the connectivity state, publishing only if it changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        if self.connected == Some(connected) {
            return false;
        }

        info!(
            "inverter {}",
            if connected { "connected" } else { "disconnected" }
        );
        self.connected = Some(connected);

        self.is_enabled(Channel::Connected)
            && self.emit(Channel::Connected, SensorValue::Binary(connected), Instant::now())
    }

    /// Clears live measurements after a long silence.
    pub fn mark_unavailable(&mut self, now: Instant) {
        info!("no valid report for a while, marking measurements unavailable");
        if let Ok(mut stats) = self.stats.lock() {
            stats.availability_expiries += 1;
        }

        if self.is_enabled(Channel::Temperature) {
            self.emit(Channel::Temperature, SensorValue::Unavailable, now);
        }

        for channel in ZEROED_ON_EXPIRY {
            if self.is_enabled(channel) {
                self.emit(channel, SensorValue::numeric(channel, 0.0), now);
            }
        }
    }

    fn is_due(&self, channel: Channel, value: &SensorValue, now: Instant) -> bool {
        match self.last.get(&channel) {
            None => true,
            Some((last, _)) if last != value => true,
            Some((_, at)) => {
                channel.is_numeric() && now.saturating_duration_since(*at) >= self.refresh_interval
            }
        }
    }

    fn emit(&mut self, channel: Channel, value: SensorValue, now: Instant) -> bool {
        match self.sink.publish(channel, &value) {
            Ok(()) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.values_published += 1;
                }
                self.last.insert(channel, (value, now));
                true
            }
            Err(e) => {
                warn!("failed to publish {}: {}", channel, e);
                if let Ok(mut stats) = self.stats.lock() {
                    stats.publish_errors += 1;
                }
                false
            }
        }
    }
}
