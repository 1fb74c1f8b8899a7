//! The radio-driver boundary.
//!
//! The Wi-Fi chip driver is an external collaborator: the state machine only
//! ever talks to it through [`RadioDriver`], and the driver talks back by
//! posting events into the manager queue through the [`MsgSender`] it is
//! given at boot. Driver callbacks run in an interrupt-adjacent context and
//! must not touch any other shared state.
//!
//! [`MsgSender`]: crate::manager::MsgSender

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::ap_list::AccessPoint;

/// Radio operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiMode {
    Sta,
    Ap,
    ApSta,
}

/// AP channel bandwidth. 20 MHz minimizes channel interference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Bandwidth {
    Ht20,
    Ht40,
}

/// Station power-save mode; only effective in STA-only operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PowerSave {
    None,
    Modem,
}

/// Authentication the provisioning AP itself advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApAuth {
    Open,
    Wpa2Psk,
}

/// Soft-AP configuration pushed to the driver.
#[derive(Debug, Clone)]
pub struct ApConfig {
    pub ssid: String,
    pub password: String,
    pub auth: ApAuth,
    pub channel: u8,
    pub hidden: bool,
    pub bandwidth: Bandwidth,
    pub max_connections: u8,
    pub beacon_interval_ms: u16,
}

/// Regulatory channel range reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Country {
    pub first_chan: u8,
    pub num_chans: u8,
}

/// Fallback when the driver cannot report a country.
pub const DEFAULT_COUNTRY: Country = Country {
    first_chan: 1,
    num_chans: 11,
};

/// Parameters of one single-channel active scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub channel: u8,
    pub show_hidden: bool,
    /// Active-scan dwell upper bound on the channel, in milliseconds.
    pub active_max_ms: u32,
}

/// Addressing of the station network interface after a successful
/// association.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetifInfo {
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gw: Ipv4Addr,
    /// The DHCP server that issued the lease, when one was involved.
    pub dhcp_server: Option<Ipv4Addr>,
}

/// A non-OK status from the driver. Never fatal: the caller logs it and the
/// state machine recovers on the next event.
#[derive(Debug, Clone, derive_more::Display)]
#[display("wifi driver error: {msg}")]
pub struct RadioError {
    pub msg: String,
}

impl RadioError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }
}

impl std::error::Error for RadioError {}

/// Station credentials as the driver wants them.
#[derive(Debug, Clone)]
pub struct StaDriverConfig {
    pub ssid: String,
    pub password: String,
    pub power_save: PowerSave,
    pub static_ip: Option<crate::config::StaticIpConfig>,
}

/// Abstract Wi-Fi driver. All calls are made from the connectivity state
/// machine task; implementations deliver their asynchronous outcomes as
/// events on the manager queue.
pub trait RadioDriver: Send + Sync {
    /// Bring the radio up after AP/STA configuration.
    fn start(&self) -> Result<(), RadioError>;

    fn set_mode(&self, mode: WifiMode) -> Result<(), RadioError>;

    fn configure_ap(&self, config: &ApConfig) -> Result<(), RadioError>;

    fn configure_sta(&self, config: &StaDriverConfig) -> Result<(), RadioError>;

    /// Begin association with the configured network. Completion arrives as
    /// `StaGotIp` or `StaDisconnected`.
    fn connect(&self) -> Result<(), RadioError>;

    /// Drop the current association. The driver answers with
    /// `StaDisconnected`.
    fn disconnect(&self) -> Result<(), RadioError>;

    /// Kick a single-channel scan. Completion arrives as `ScanDone`.
    fn scan_start(&self, params: &ScanParams) -> Result<(), RadioError>;

    /// Abort an in-flight scan; the driver still posts `ScanDone`.
    fn scan_stop(&self) -> Result<(), RadioError>;

    /// Fetch (and consume) the records of the last completed channel scan.
    fn scan_records(&self, max: usize) -> Result<Vec<AccessPoint>, RadioError>;

    fn country(&self) -> Result<Country, RadioError>;

    /// Current station interface addressing; valid after `StaGotIp`.
    fn sta_netif_info(&self) -> Result<NetifInfo, RadioError>;
}
