//! Boot-time configuration and the persisted Wi-Fi settings.
//!
//! Everything here is plain data: `Config` carries the compile-time defaults
//! the appliance ships with, `WifiSettings`/`StaCreds` are the pieces that
//! survive reboots through the credential store.

use std::net::Ipv4Addr;
use std::time::Duration;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::auth::LanAuthConfig;
use crate::radio::{Bandwidth, PowerSave};

/// IEEE limit for an SSID. Never extend this value.
pub const MAX_SSID_LEN: usize = 32;

/// IEEE limit for a WPA2 passphrase.
pub const MAX_PASSWORD_LEN: usize = 64;

/// Below this AP password length the access point falls back to open auth.
pub const WPA2_MINIMUM_PASSWORD_LENGTH: usize = 8;

fn default_ap_ip() -> Ipv4Addr {
    Ipv4Addr::new(10, 10, 0, 1)
}

fn default_ap_netmask() -> Ipv4Addr {
    Ipv4Addr::new(255, 255, 255, 0)
}

const fn default_ap_channel() -> u8 {
    1
}

const fn default_ap_max_connections() -> u8 {
    4
}

const fn default_ap_beacon_interval_ms() -> u16 {
    100
}

const fn default_scan_channel_delay_ms() -> u64 {
    200
}

const fn default_scan_active_dwell_ms() -> u32 {
    100
}

/// Static configuration handed to [`crate::Core::new`]. The defaults match
/// the shipped appliance image; a host application overrides what it needs
/// before boot.
#[derive(Debug, Clone)]
pub struct Config {
    /// SSID of the provisioning access point (also the `gateway_name`
    /// reported by the auth API).
    pub ap_ssid: String,
    /// AP password; shorter than 8 characters means an open access point.
    pub ap_password: String,
    pub ap_ip: Ipv4Addr,
    pub ap_gateway: Ipv4Addr,
    pub ap_netmask: Ipv4Addr,
    pub ap_channel: u8,
    pub ap_hidden: bool,
    pub ap_bandwidth: Bandwidth,
    pub ap_max_connections: u8,
    pub ap_beacon_interval_ms: u16,
    /// Turn the AP off once a station connection is established.
    pub sta_only: bool,
    pub sta_power_save: PowerSave,
    pub http_port: u16,
    /// UDP port of the captive-portal DNS hijack; 0 disables it.
    pub dns_port: u16,
    /// Pause between per-channel scans so the AP stays responsive.
    pub scan_channel_delay_ms: u64,
    /// Active-scan dwell upper bound per channel.
    pub scan_active_dwell_ms: u32,
    /// Task watchdog period; blocking waits re-feed at a third of this.
    pub watchdog_timeout: Duration,
    pub lan_auth: LanAuthConfig,
    /// Skip the saved-credentials restore at boot and go straight to AP.
    pub start_ap_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ap_ssid: "wicket".to_string(),
            ap_password: String::new(),
            ap_ip: default_ap_ip(),
            ap_gateway: default_ap_ip(),
            ap_netmask: default_ap_netmask(),
            ap_channel: default_ap_channel(),
            ap_hidden: false,
            ap_bandwidth: Bandwidth::Ht20,
            ap_max_connections: default_ap_max_connections(),
            ap_beacon_interval_ms: default_ap_beacon_interval_ms(),
            sta_only: true,
            sta_power_save: PowerSave::None,
            http_port: 80,
            dns_port: 53,
            scan_channel_delay_ms: default_scan_channel_delay_ms(),
            scan_active_dwell_ms: default_scan_active_dwell_ms(),
            watchdog_timeout: Duration::from_secs(5),
            lan_auth: LanAuthConfig::default(),
            start_ap_only: false,
        }
    }
}

impl Config {
    /// Clamp values to valid ranges and fix invalid values.
    pub fn validate(&mut self) {
        if self.ap_ssid.is_empty() {
            warn!("AP SSID is empty, resetting to default");
            self.ap_ssid = "wicket".to_string();
        }
        if self.ap_ssid.len() > MAX_SSID_LEN {
            warn!("AP SSID longer than {MAX_SSID_LEN} bytes, truncating");
            truncate_on_char_boundary(&mut self.ap_ssid, MAX_SSID_LEN);
        }
        if self.ap_password.len() > MAX_PASSWORD_LEN {
            warn!("AP password longer than {MAX_PASSWORD_LEN} bytes, truncating");
            truncate_on_char_boundary(&mut self.ap_password, MAX_PASSWORD_LEN);
        }
        if self.ap_channel == 0 || self.ap_channel > 14 {
            warn!("AP channel {} out of range, using 1", self.ap_channel);
            self.ap_channel = default_ap_channel();
        }
    }
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.truncate(end);
}

/// Static-IP parameters for the station interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIpConfig {
    pub ip: Ipv4Addr,
    pub gw: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Persisted access-point and station behavior settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiSettings {
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_channel: u8,
    pub ap_hidden: bool,
    pub ap_bandwidth: Bandwidth,
    pub sta_only: bool,
    pub sta_power_save: PowerSave,
    /// `Some` assigns a static IP to the STA interface instead of DHCP.
    pub sta_static_ip: Option<StaticIpConfig>,
}

impl WifiSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ap_ssid: config.ap_ssid.clone(),
            ap_password: config.ap_password.clone(),
            ap_channel: config.ap_channel,
            ap_hidden: config.ap_hidden,
            ap_bandwidth: config.ap_bandwidth,
            sta_only: config.sta_only,
            sta_power_save: config.sta_power_save,
            sta_static_ip: None,
        }
    }
}

/// Attempted write of an over-long SSID or password.
#[derive(Debug, derive_more::Display, derive_more::Error, PartialEq, Eq)]
pub enum InvalidCreds {
    #[display("SSID exceeds {} bytes", MAX_SSID_LEN)]
    SsidTooLong,
    #[display("password exceeds {} bytes", MAX_PASSWORD_LEN)]
    PasswordTooLong,
}

/// Station credentials. An empty SSID means "unconfigured".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaCreds {
    ssid: String,
    password: String,
}

impl StaCreds {
    pub fn new(ssid: &str, password: &str) -> Result<Self, InvalidCreds> {
        let mut creds = Self::default();
        creds.set(ssid, password)?;
        Ok(creds)
    }

    /// Replace both fields, validating the length limits first.
    pub fn set(&mut self, ssid: &str, password: &str) -> Result<(), InvalidCreds> {
        if ssid.len() > MAX_SSID_LEN {
            return Err(InvalidCreds::SsidTooLong);
        }
        if password.len() > MAX_PASSWORD_LEN {
            return Err(InvalidCreds::PasswordTooLong);
        }
        self.ssid = ssid.to_string();
        self.password = password.to_string();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.ssid.clear();
        self.password.clear();
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_configured(&self) -> bool {
        !self.ssid.is_empty()
    }

    /// Fixed-size zero-padded image, as stored in the credential store.
    pub(crate) fn ssid_blob(&self) -> [u8; MAX_SSID_LEN] {
        let mut blob = [0u8; MAX_SSID_LEN];
        blob[..self.ssid.len()].copy_from_slice(self.ssid.as_bytes());
        blob
    }

    pub(crate) fn password_blob(&self) -> [u8; MAX_PASSWORD_LEN] {
        let mut blob = [0u8; MAX_PASSWORD_LEN];
        blob[..self.password.len()].copy_from_slice(self.password.as_bytes());
        blob
    }

    pub(crate) fn from_blobs(ssid: &[u8], password: &[u8]) -> Self {
        Self {
            ssid: str_from_padded(ssid),
            password: str_from_padded(password),
        }
    }
}

fn str_from_padded(blob: &[u8]) -> String {
    let end = blob.iter().position(|&b| b == 0).unwrap_or(blob.len());
    String::from_utf8_lossy(&blob[..end]).into_owned()
}

/// The state machine's private view of settings plus credentials. Other
/// tasks only ever see by-value snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaConfig {
    pub settings: WifiSettings,
    pub creds: StaCreds,
}

impl StaConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            settings: WifiSettings::from_config(config),
            creds: StaCreds::default(),
        }
    }
}

/// Derive the broadcast AP SSID from a base name and the station MAC:
/// the name truncated to 26 bytes, a space, and the last two MAC octets
/// in uppercase hex.
pub fn ap_ssid_generate(orig_ap_ssid: &str, mac: &[u8; 6]) -> String {
    let mut end = orig_ap_ssid.len().min(MAX_SSID_LEN - 6);
    while !orig_ap_ssid.is_char_boundary(end) {
        end -= 1;
    }
    format!("{} {:02X}{:02X}", &orig_ap_ssid[..end], mac[4], mac[5])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ap_ssid_suffix_rule() {
        let mac = [0xAA, 0xBB, 0xCC, 0xDD, 0x5C, 0x78];
        assert_eq!(ap_ssid_generate("RuuviGateway", &mac), "RuuviGateway 5C78");
    }

    #[test]
    fn ap_ssid_truncates_long_names_to_26_bytes() {
        let mac = [0, 0, 0, 0, 0xEE, 0xFF];
        let long = "abcdefghijklmnopqrstuvwxyz012345"; // 32 bytes
        let generated = ap_ssid_generate(long, &mac);
        assert_eq!(generated, format!("{} EEFF", &long[..26]));
        assert!(generated.len() <= MAX_SSID_LEN);
    }

    #[test]
    fn creds_length_limits() {
        let mut creds = StaCreds::default();
        assert!(creds.set(&"s".repeat(32), &"p".repeat(64)).is_ok());
        assert_eq!(
            creds.set(&"s".repeat(33), "p"),
            Err(InvalidCreds::SsidTooLong)
        );
        assert_eq!(
            creds.set("s", &"p".repeat(65)),
            Err(InvalidCreds::PasswordTooLong)
        );
        // The failed writes left the previous values untouched.
        assert_eq!(creds.ssid().len(), 32);
        assert_eq!(creds.password().len(), 64);
    }

    #[test]
    fn creds_blob_round_trip() {
        let creds = StaCreds::new("HomeNet", "secret123").unwrap();
        let restored = StaCreds::from_blobs(&creds.ssid_blob(), &creds.password_blob());
        assert_eq!(restored, creds);
    }

    #[test]
    fn unconfigured_means_empty_ssid() {
        assert!(!StaCreds::default().is_configured());
        assert!(StaCreds::new("x", "").unwrap().is_configured());
    }

    #[test]
    fn validate_fixes_bad_values() {
        let mut config = Config {
            ap_ssid: String::new(),
            ap_channel: 0,
            ..Config::default()
        };
        config.validate();
        assert_eq!(config.ap_ssid, "wicket");
        assert_eq!(config.ap_channel, 1);
    }
}
