use crate::prelude::*;
use crate::omnik::{frame::MAX_FRAME_LEN, packet::MIN_FRAME_LEN};

use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub access_point: AccessPoint,

    #[serde(default)]
    pub listener: Listener,

    #[serde(default = "Config::default_sensors")]
    pub sensors: Vec<Channel>,

    #[serde(default)]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// AccessPoint {{{
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The access point is brought up outside the bridge; only the address
    /// is checked.
    #[default]
    Unmanaged,
    /// Address and hostapd are driven by the bridge.
    Hostapd,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub password: String,
    pub ip: Ipv4Addr,
    #[serde(default = "Config::default_subnet")]
    pub subnet: Ipv4Addr,
    #[serde(default)]
    pub channel: u8,
    #[serde(default)]
    pub backend: Backend,
    #[serde(default = "Config::default_interface")]
    pub interface: String,
}

impl AccessPoint {
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn subnet(&self) -> Ipv4Addr {
        self.subnet
    }

    // 0 = whatever the radio is already on
    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
} // }}}

// Listener {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Listener {
    #[serde(default = "Config::default_listener_host")]
    pub host: String,
    #[serde(default = "Config::default_listener_port")]
    pub port: u16,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_idle_timeout")]
    pub idle_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_availability_timeout")]
    pub availability_timeout: Duration,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_refresh_interval")]
    pub refresh_interval: Duration,

    #[serde(default = "Config::default_max_frame_len")]
    pub max_frame_len: usize,

    #[serde(default = "Config::default_enabled")]
    pub tcp_nodelay: bool,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            host: Config::default_listener_host(),
            port: Config::default_listener_port(),
            idle_timeout: Config::default_idle_timeout(),
            availability_timeout: Config::default_availability_timeout(),
            refresh_interval: Config::default_refresh_interval(),
            max_frame_len: Config::default_max_frame_len(),
            tcp_nodelay: Config::default_enabled(),
        }
    }
}

impl Listener {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn availability_timeout(&self) -> Duration {
        self.availability_timeout
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    pub fn tcp_nodelay(&self) -> bool {
        self.tcp_nodelay
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,

    #[serde(default = "Config::default_mqtt_namespace")]
    pub namespace: String,
}

impl Default for Mqtt {
    fn default() -> Self {
        Self {
            enabled: false,
            host: Config::default_mqtt_host(),
            port: Config::default_mqtt_port(),
            username: None,
            password: None,
            namespace: Config::default_mqtt_namespace(),
        }
    }
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &Option<String> {
        &self.username
    }

    pub fn password(&self) -> &Option<String> {
        &self.password
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
} // }}}

// ConfigWrapper {{{
/// Shared, read-only handle to the loaded configuration.
#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn access_point(&self) -> &AccessPoint {
        &self.config.access_point
    }

    pub fn listener(&self) -> &Listener {
        &self.config.listener
    }

    pub fn sensors(&self) -> &[Channel] {
        &self.config.sensors
    }

    pub fn mqtt(&self) -> &Mqtt {
        &self.config.mqtt
    }

    pub fn loglevel(&self) -> String {
        self.config.loglevel.clone()
    }

    pub fn log_summary(&self) {
        self.config.log_summary()
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Logs the effective configuration. Passwords are never logged.
    pub fn log_summary(&self) {
        let ap = &self.access_point;
        info!("Configuration:");
        info!("  Access point:");
        info!("    SSID: {}", ap.ssid);
        info!("    IP: {}/{}", ap.ip, ap.subnet);
        if ap.channel == 0 {
            info!("    Channel: auto");
        } else {
            info!("    Channel: {}", ap.channel);
        }
        info!("    Backend: {:?}", ap.backend);
        if ap.backend == Backend::Hostapd {
            info!("    Interface: {}", ap.interface);
        }

        let l = &self.listener;
        info!("  Listener: {}:{}", l.host, l.port);
        info!("    Idle timeout: {}s", l.idle_timeout.as_secs());
        info!("    Availability timeout: {}s", l.availability_timeout.as_secs());
        info!("    Refresh interval: {}s", l.refresh_interval.as_secs());
        info!("    Max frame length: {}", l.max_frame_len);
        info!("    TCP NoDelay: {}", l.tcp_nodelay);

        let sensors: Vec<&str> = self.sensors.iter().map(|c| c.id()).collect();
        info!("  Sensors: {}", sensors.join(", "));

        info!("  MQTT: {}", if self.mqtt.enabled { "enabled" } else { "disabled" });
        if self.mqtt.enabled {
            info!("    Host: {}", self.mqtt.host);
            info!("    Port: {}", self.mqtt.port);
            info!("    Namespace: {}", self.mqtt.namespace);
        }

        info!("  Log Level: {}", self.loglevel);
    }

    pub fn validate(&self) -> Result<()> {
        let ap = &self.access_point;
        if ap.ssid.is_empty() {
            bail!("access_point.ssid cannot be empty");
        }
        if ap.ssid.len() > 32 {
            bail!("access_point.ssid must be at most 32 bytes");
        }
        // WPA2 passphrase
        if ap.password.len() < 8 || ap.password.len() > 63 {
            bail!("access_point.password must be between 8 and 63 characters");
        }
        // these end up one per line in the hostapd config
        for (field, value) in [
            ("ssid", &ap.ssid),
            ("password", &ap.password),
            ("interface", &ap.interface),
        ] {
            if value.chars().any(char::is_control) {
                bail!("access_point.{} cannot contain control characters", field);
            }
        }
        if ap.ip.is_unspecified() || ap.ip.is_broadcast() {
            bail!("access_point.ip {} is not a usable address", ap.ip);
        }
        let mask = u32::from(ap.subnet);
        if mask == 0 || mask.leading_ones() + mask.trailing_zeros() != 32 {
            bail!("access_point.subnet {} is not a valid netmask", ap.subnet);
        }
        if ap.channel > 14 {
            bail!("access_point.channel must be between 0 and 14");
        }
        if ap.backend == Backend::Hostapd && ap.interface.is_empty() {
            bail!("access_point.interface cannot be empty with the hostapd backend");
        }

        let l = &self.listener;
        if l.port == 0 {
            bail!("listener.port must be between 1 and 65535");
        }
        if l.host.parse::<std::net::IpAddr>().is_err() {
            bail!("listener.host {} is not an IP address", l.host);
        }
        if l.idle_timeout.is_zero() {
            bail!("listener.idle_timeout must be greater than 0");
        }
        if l.availability_timeout.is_zero() {
            bail!("listener.availability_timeout must be greater than 0");
        }
        if l.refresh_interval.is_zero() {
            bail!("listener.refresh_interval must be greater than 0");
        }
        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&l.max_frame_len) {
            bail!(
                "listener.max_frame_len must be between {} and {}",
                MIN_FRAME_LEN,
                MAX_FRAME_LEN
            );
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
        }

        Ok(())
    }

    fn default_sensors() -> Vec<Channel> {
        Channel::ALL.to_vec()
    }

    fn default_subnet() -> Ipv4Addr {
        Ipv4Addr::new(255, 255, 255, 0)
    }

    fn default_interface() -> String {
        "wlan0".to_string()
    }

    fn default_listener_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_listener_port() -> u16 {
        10004
    }

    fn default_idle_timeout() -> Duration {
        Duration::from_secs(6 * 60)
    }

    fn default_availability_timeout() -> Duration {
        Duration::from_secs(30 * 60)
    }

    fn default_refresh_interval() -> Duration {
        Duration::from_secs(5 * 60)
    }

    fn default_max_frame_len() -> usize {
        MAX_FRAME_LEN
    }

    fn default_mqtt_host() -> String {
        "localhost".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1883
    }

    fn default_mqtt_namespace() -> String {
        "omnik".to_string()
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
