#![allow(dead_code)]

pub use omnik_bridge::prelude::*;

use omnik_bridge::config::{AccessPoint, Backend, Listener, Mqtt};
use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Polls `check` until it holds or `within` elapses.
pub async fn wait_for<F: FnMut() -> bool>(within: Duration, mut check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn within<T>(f: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), f)
        .await
        .expect("timed out")
}

pub struct Factory;

impl Factory {
    pub const LOGGER: u32 = 602_123_456;
    pub const INVERTER: &'static str = "NLDN302013P1023";

    /// A 67 byte payload carrying the readings in `Factory::telemetry`.
    pub fn payload() -> Vec<u8> {
        Self::payload_for(Self::INVERTER, 712)
    }

    pub fn payload_for(inverter: &str, power: u16) -> Vec<u8> {
        let mut p = vec![0x81, 0x02, 0x01];

        let mut serial = inverter.as_bytes().to_vec();
        serial.resize(16, 0);
        p.extend_from_slice(&serial);

        let words: [u16; 19] = [
            341, // temperature
            2856, 1432, 0, // pv voltage
            27, 12, 0, // pv current
            31, 0, 0, // ac current
            2345, 0, 0, // ac voltage
            5002, power, // phase 1 frequency, power
            0, 0, // phase 2
            0, 0, // phase 3
        ];
        for w in words {
            p.extend_from_slice(&w.to_be_bytes());
        }

        p.extend_from_slice(&1234u16.to_be_bytes()); // energy today
        p.extend_from_slice(&187_456u32.to_be_bytes()); // energy total
        p.extend_from_slice(&24_873u32.to_be_bytes()); // hours

        assert_eq!(p.len(), 67);
        p
    }

    pub fn frame_with(payload: &[u8], logger_1: u32, logger_2: u32) -> Vec<u8> {
        let mut f = vec![0x68, payload.len() as u8, 0x41, 0xb0];
        f.extend_from_slice(&logger_1.to_le_bytes());
        f.extend_from_slice(&logger_2.to_le_bytes());
        f.extend_from_slice(payload);
        let checksum = f[1..].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        f.push(checksum);
        f.push(0x16);
        f
    }

    pub fn frame_for(payload: &[u8]) -> Vec<u8> {
        Self::frame_with(payload, Self::LOGGER, Self::LOGGER)
    }

    pub fn frame() -> Vec<u8> {
        Self::frame_for(&Self::payload())
    }

    /// Same framing, but one payload byte flipped after the checksum was
    /// computed.
    pub fn corrupted_frame() -> Vec<u8> {
        let mut f = Self::frame();
        f[12 + 20] ^= 0x01;
        f
    }

    pub fn telemetry() -> Telemetry {
        Telemetry {
            logger_id: LoggerId::new(Self::LOGGER),
            message_type: 0x41b0,
            inverter_id: Self::INVERTER.to_string(),
            temperature: 34.1,
            voltage_pv1: 285.6,
            voltage_pv2: 143.2,
            voltage_pv3: 0.0,
            current_pv1: 2.7,
            current_pv2: 1.2,
            current_pv3: 0.0,
            current_ac1: 3.1,
            current_ac2: 0.0,
            current_ac3: 0.0,
            voltage_ac1: 234.5,
            voltage_ac2: 0.0,
            voltage_ac3: 0.0,
            frequency_ac1: 50.02,
            power_ac1: 712.0,
            frequency_ac2: 0.0,
            power_ac2: 0.0,
            frequency_ac3: 0.0,
            power_ac3: 0.0,
            energy_today: 12.34,
            energy_total: 18745.6,
            operating_hours: 24873.0,
        }
    }

    pub fn access_point() -> AccessPoint {
        AccessPoint {
            ssid: "omnik-test".to_string(),
            password: "secret123".to_string(),
            ip: Ipv4Addr::new(192, 168, 4, 1),
            subnet: Ipv4Addr::new(255, 255, 255, 0),
            channel: 6,
            backend: Backend::Unmanaged,
            interface: "wlan0".to_string(),
        }
    }

    /// Loopback listener on an ephemeral port with short timeouts.
    pub fn config() -> Config {
        Config {
            access_point: Self::access_point(),
            listener: Listener {
                host: "127.0.0.1".to_string(),
                port: 0,
                idle_timeout: Duration::from_secs(5),
                availability_timeout: Duration::from_secs(60),
                refresh_interval: Duration::from_secs(300),
                max_frame_len: 269,
                tcp_nodelay: true,
            },
            sensors: Channel::ALL.to_vec(),
            mqtt: Mqtt::default(),
            loglevel: "debug".to_string(),
        }
    }

    pub fn session_settings(idle_timeout: Duration) -> omnik::session::SessionSettings {
        omnik::session::SessionSettings {
            idle_timeout,
            max_frame_len: 269,
            tcp_nodelay: true,
        }
    }
}
