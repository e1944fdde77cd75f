use crate::prelude::*;
use crate::config::Backend;

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};

// used when the configured channel is 0 and the radio isn't on one yet
const DEFAULT_CHANNEL: u8 = 1;
// how long hostapd gets to fail on a bad configuration
const HOSTAPD_SETTLE: Duration = Duration::from_secs(2);

/// Everything a radio needs to advertise the network. The device itself is
/// the gateway.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApSettings {
    pub ssid: String,
    pub password: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub channel: u8,
}

impl ApSettings {
    pub fn from_config(ap: &config::AccessPoint) -> Self {
        Self {
            ssid: ap.ssid().to_string(),
            password: ap.password().to_string(),
            ip: ap.ip(),
            gateway: ap.ip(),
            subnet: ap.subnet(),
            channel: ap.channel(),
        }
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.subnet).leading_ones()
    }
}

#[async_trait]
pub trait Radio: Send {
    /// Return to a clean, unconfigured state. Must be safe to call at any
    /// point, including after a failed start.
    async fn reset(&mut self) -> Result<(), NetworkError>;

    /// Channel the radio is currently on, if it knows.
    async fn current_channel(&mut self) -> Option<u8>;

    async fn configure_address(&mut self, settings: &ApSettings) -> Result<(), NetworkError>;

    async fn start_ap(&mut self, settings: &ApSettings) -> Result<(), NetworkError>;
}

// AccessPointManager {{{
pub struct AccessPointManager {
    radio: Box<dyn Radio>,
    started: bool,
}

impl AccessPointManager {
    pub fn new(radio: Box<dyn Radio>) -> Self {
        Self {
            radio,
            started: false,
        }
    }

    pub fn from_config(ap: &config::AccessPoint) -> Self {
        let radio: Box<dyn Radio> = match ap.backend() {
            Backend::Unmanaged => Box::new(UnmanagedRadio),
            Backend::Hostapd => Box::new(HostapdRadio::new(ap.interface())),
        };

        Self::new(radio)
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Brings the access point up. Safe to call again after a failure: the
    /// radio is reset before every attempt and after a failed one.
    pub async fn start(&mut self, ap: &config::AccessPoint) -> Result<(), NetworkError> {
        if self.started {
            debug!("access point already up");
            return Ok(());
        }

        if ap.ssid().is_empty() || ap.password().is_empty() {
            return Err(NetworkError::MissingCredentials);
        }

        let mut settings = ApSettings::from_config(ap);
        if settings.channel == 0 {
            settings.channel = self
                .radio
                .current_channel()
                .await
                .filter(|c| (1..=14).contains(c))
                .unwrap_or(DEFAULT_CHANNEL);
            info!("access point channel auto, using {}", settings.channel);
        }

        self.radio.reset().await?;

        if let Err(e) = self.bring_up(&settings).await {
            if let Err(reset_err) = self.radio.reset().await {
                warn!("failed to reset radio after failed start: {}", reset_err);
            }
            return Err(e);
        }

        self.started = true;
        info!(
            "access point '{}' up on {}/{} channel {}",
            settings.ssid, settings.ip, settings.subnet, settings.channel
        );
        Ok(())
    }

    async fn bring_up(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        self.radio.configure_address(settings).await?;
        self.radio.start_ap(settings).await
    }
} // }}}

// UnmanagedRadio {{{
/// The access point is run by the host (NetworkManager, a router, ...).
/// Starting it only checks that the configured address is really ours.
pub struct UnmanagedRadio;

#[async_trait]
impl Radio for UnmanagedRadio {
    async fn reset(&mut self) -> Result<(), NetworkError> {
        Ok(())
    }

    async fn current_channel(&mut self) -> Option<u8> {
        None
    }

    async fn configure_address(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        tokio::net::UdpSocket::bind((settings.ip, 0))
            .await
            .map(|_| ())
            .map_err(|e| NetworkError::AddressConfig {
                ip: settings.ip,
                subnet: settings.subnet,
                reason: format!("address is not assigned to this host: {}", e),
            })
    }

    async fn start_ap(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        info!(
            "access point '{}' is managed outside the bridge",
            settings.ssid
        );
        Ok(())
    }
} // }}}

// HostapdRadio {{{
/// Drives a Linux wireless interface with `ip`, `iw` and a hostapd child
/// process owned by the bridge.
pub struct HostapdRadio {
    interface: String,
    // holds the passphrase: private to root, removed on reset or drop
    conf: Option<NamedTempFile>,
    hostapd: Option<Child>,
}

impl HostapdRadio {
    pub fn new(interface: &str) -> Self {
        Self {
            interface: interface.to_string(),
            conf: None,
            hostapd: None,
        }
    }

    pub fn hostapd_conf(&self, settings: &ApSettings) -> String {
        format!(
            "interface={}\n\
             driver=nl80211\n\
             ssid={}\n\
             hw_mode=g\n\
             channel={}\n\
             auth_algs=1\n\
             wpa=2\n\
             wpa_key_mgmt=WPA-PSK\n\
             rsn_pairwise=CCMP\n\
             wpa_passphrase={}\n",
            self.interface, settings.ssid, settings.channel, settings.password
        )
    }

    /// Writes the hostapd configuration to a fresh file only the current
    /// user can read. Never reuses or follows an existing path.
    pub fn write_conf(&self, settings: &ApSettings) -> std::io::Result<NamedTempFile> {
        let mut conf = tempfile::Builder::new()
            .prefix(&format!("omnik-bridge-{}-", self.interface))
            .suffix(".conf")
            .tempfile()?;

        conf.write_all(self.hostapd_conf(settings).as_bytes())?;
        conf.flush()?;
        Ok(conf)
    }

    async fn run(program: &str, args: &[&str]) -> Result<String, String> {
        debug!("running {} {}", program, args.join(" "));

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| format!("failed to run {}: {}", program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl Radio for HostapdRadio {
    async fn reset(&mut self) -> Result<(), NetworkError> {
        if let Some(mut child) = self.hostapd.take() {
            if let Err(e) = child.kill().await {
                warn!("failed to stop hostapd: {}", e);
            }
        }

        if let Some(conf) = self.conf.take() {
            if let Err(e) = conf.close() {
                warn!("failed to remove hostapd config: {}", e);
            }
        }

        Self::run("ip", &["addr", "flush", "dev", self.interface.as_str()])
            .await
            .map(|_| ())
            .map_err(NetworkError::RadioUnavailable)
    }

    async fn current_channel(&mut self) -> Option<u8> {
        match Self::run("iw", &["dev", self.interface.as_str(), "info"]).await {
            Ok(out) => parse_iw_channel(&out),
            Err(e) => {
                debug!("{}", e);
                None
            }
        }
    }

    async fn configure_address(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        let address = format!("{}/{}", settings.ip, settings.prefix_len());
        let reason = |reason: String| NetworkError::AddressConfig {
            ip: settings.ip,
            subnet: settings.subnet,
            reason,
        };

        Self::run("ip", &["addr", "add", address.as_str(), "dev", self.interface.as_str()])
            .await
            .map_err(reason)?;
        Self::run("ip", &["link", "set", self.interface.as_str(), "up"])
            .await
            .map_err(reason)?;

        Ok(())
    }

    async fn start_ap(&mut self, settings: &ApSettings) -> Result<(), NetworkError> {
        let failed = |reason: String| NetworkError::StartFailed {
            ssid: settings.ssid.clone(),
            reason,
        };

        let conf = self
            .write_conf(settings)
            .map_err(|e| failed(format!("writing hostapd config: {}", e)))?;

        let mut child = Command::new("hostapd")
            .arg(conf.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| failed(format!("failed to run hostapd: {}", e)))?;
        self.conf = Some(conf);

        tokio::time::sleep(HOSTAPD_SETTLE).await;

        match child.try_wait() {
            Ok(None) => {
                self.hostapd = Some(child);
                Ok(())
            }
            Ok(Some(status)) => Err(failed(format!("hostapd exited with {}", status))),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}

/// Channel number from `iw dev <if> info` output.
pub fn parse_iw_channel(output: &str) -> Option<u8> {
    output
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("channel "))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
} // }}}
