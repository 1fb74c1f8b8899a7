//! Control plane of a Wi-Fi provisioning appliance.
//!
//! The device boots into a captive-portal access point, lets a browser pick
//! and authenticate to an upstream network (or hand over to an Ethernet
//! uplink), persists the credentials and reconnects on its own afterwards.
//! Three tightly coupled pieces make up the core:
//!
//! - the connectivity state machine ([`manager`]) owning the radio and all
//!   status updates,
//! - the captive HTTP server serving the UI, the JSON API and the
//!   captive-portal redirect,
//! - the LAN authentication subsystem ([`auth`]).
//!
//! The radio driver, the key-value store behind credential persistence and
//! the task watchdog are external collaborators expressed as traits
//! ([`radio::RadioDriver`], [`cred_store::NvsStore`],
//! [`watchdog::Watchdog`]), which is also what makes the whole core
//! testable on a workstation.
//!
//! Everything that used to be scattered module state lives in one [`Core`]
//! value built at boot:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wicket_core::{Config, Core};
//! # fn radio() -> Arc<dyn wicket_core::radio::RadioDriver> { unimplemented!() }
//! # fn nvs() -> Arc<dyn wicket_core::cred_store::NvsStore> { unimplemented!() }
//!
//! let core = Arc::new(Core::new(Config::default(), radio(), nvs()));
//! core.start().expect("boot");
//! ```

pub mod ap_list;
pub mod assets;
pub mod auth;
pub mod config;
pub mod cred_store;
pub mod dns;
pub mod http_req;
pub mod http_resp;
mod http_server;
pub mod json;
pub mod manager;
pub mod net_info;
pub mod radio;
pub mod sta_ip;
pub mod thread_util;
pub mod watchdog;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use log::{error, info, warn};

pub use config::Config;
pub use manager::{ConnectionRequest, EthState, MsgSender, WifiManagerMsg};

use ap_list::ApListJson;
use assets::{AssetStore, BuiltinAssets};
use auth::LanAuth;
use config::{StaConfig, WifiSettings, WPA2_MINIMUM_PASSWORD_LENGTH};
use cred_store::{CredStore, NvsError, NvsStore};
use dns::DnsServer;
use http_resp::HttpResponse;
use manager::{AtomicEthState, EventFlags, WifiManagerTask, QUEUE_DEPTH};
use net_info::NetInfoJson;
use radio::{ApAuth, ApConfig, RadioDriver, StaDriverConfig, WifiMode};
use sta_ip::StaIp;
use watchdog::{LogWatchdog, Watchdog};

/// Hooks for the hosting application. HTTP callbacks get first refusal on
/// paths the built-in router does not handle; `None` falls through to the
/// embedded assets and finally 404.
pub trait HostCallbacks: Send + Sync {
    fn on_http_get(&self, _path: &str, _flag_access_from_lan: bool) -> Option<HttpResponse> {
        None
    }

    fn on_http_post(
        &self,
        _path: &str,
        _body: &str,
        _flag_access_from_lan: bool,
    ) -> Option<HttpResponse> {
        None
    }

    fn on_http_delete(&self, _path: &str, _flag_access_from_lan: bool) -> Option<HttpResponse> {
        None
    }

    fn on_connect_eth(&self) {}
    fn on_disconnect_eth(&self) {}
    fn on_disconnect_sta(&self) {}
    fn on_ap_sta_connected(&self) {}
    fn on_ap_sta_disconnected(&self) {}
}

/// Host with no opinions.
#[derive(Default)]
pub struct NoCallbacks;

impl HostCallbacks for NoCallbacks {}

/// The whole control plane as one value. Construct, optionally replace the
/// collaborators, wrap in an [`Arc`] and [`start`](Core::start).
pub struct Core {
    pub(crate) config: Config,
    pub(crate) sta_config: Mutex<StaConfig>,
    pub(crate) flags: EventFlags,
    pub(crate) eth_state: AtomicEthState,
    pub sta_ip: StaIp,
    pub net_info: NetInfoJson,
    pub ap_list: ApListJson,
    pub auth: LanAuth,
    pub(crate) msg_tx: MsgSender,
    msg_rx: Mutex<Option<Receiver<WifiManagerMsg>>>,
    pub(crate) scan_waiter: Mutex<Option<oneshot::Sender<()>>>,
    pub(crate) cred_store: CredStore,
    pub(crate) radio: Arc<dyn RadioDriver>,
    pub(crate) callbacks: Box<dyn HostCallbacks>,
    pub(crate) assets: Box<dyn AssetStore>,
    pub(crate) watchdog: Arc<dyn Watchdog>,
    pub(crate) dns: DnsServer,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Core {
    pub fn new(mut config: Config, radio: Arc<dyn RadioDriver>, nvs: Arc<dyn NvsStore>) -> Self {
        config.validate();
        let (tx, rx) = sync_channel(QUEUE_DEPTH);
        let watchdog: Arc<dyn Watchdog> = Arc::new(LogWatchdog);
        let dns = DnsServer::new(
            config.ap_ip,
            config.dns_port,
            config.ap_ip,
            Arc::clone(&watchdog),
        );
        Self {
            sta_config: Mutex::new(StaConfig::from_config(&config)),
            flags: EventFlags::default(),
            eth_state: AtomicEthState::new(EthState::Down),
            sta_ip: StaIp::default(),
            net_info: NetInfoJson::default(),
            ap_list: ApListJson::default(),
            auth: LanAuth::new(config.lan_auth.clone()),
            msg_tx: MsgSender::new(tx),
            msg_rx: Mutex::new(Some(rx)),
            scan_waiter: Mutex::new(None),
            cred_store: CredStore::new(nvs),
            radio,
            callbacks: Box::new(NoCallbacks),
            assets: Box::new(BuiltinAssets::default()),
            watchdog,
            dns,
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Install the host's callbacks. Call before [`Core::start`].
    pub fn set_callbacks(&mut self, callbacks: Box<dyn HostCallbacks>) {
        self.callbacks = callbacks;
    }

    /// Replace the embedded UI. Call before [`Core::start`].
    pub fn set_assets(&mut self, assets: Box<dyn AssetStore>) {
        self.assets = assets;
    }

    /// Use a real task watchdog. Call before [`Core::start`].
    pub fn set_watchdog(&mut self, watchdog: Arc<dyn Watchdog>) {
        self.dns = DnsServer::new(
            self.config.ap_ip,
            self.config.dns_port,
            self.config.ap_ip,
            Arc::clone(&watchdog),
        );
        self.watchdog = watchdog;
    }

    /// Bring the radio up and spawn the manager and HTTP tasks. Posts the
    /// boot command: restore the saved station connection when one exists,
    /// start the provisioning AP otherwise.
    ///
    /// Radio hiccups are logged rather than returned; the next event
    /// re-enters the machine. Only a double start is an error.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        if self.flags.is_working.swap(true, Ordering::SeqCst) {
            anyhow::bail!("wifi manager is already running");
        }
        info!("WiFi manager init");

        match self.cred_store.load() {
            Ok(Some(saved)) => {
                info!("Loaded saved wifi config, ssid:{}", saved.creds.ssid());
                *self.sta_config.lock().unwrap() = saved;
            }
            Ok(None) => info!("No saved wifi config"),
            Err(e) => warn!("Loading saved wifi config failed: {e}"),
        }

        let settings = self.sta_config.lock().unwrap().settings.clone();
        let ap_config = ap_config_from_settings(&settings, &self.config);
        if let Err(e) = self.radio.configure_ap(&ap_config) {
            error!("configure_ap failed: {e}");
        }
        // The AP is not announced until it has to be.
        if let Err(e) = self.radio.set_mode(WifiMode::Sta) {
            error!("set_mode failed: {e}");
        }
        if let Err(e) = self.radio.start() {
            error!("radio start failed: {e}");
        }

        let Some(rx) = self.msg_rx.lock().unwrap().take() else {
            self.flags.is_working.store(false, Ordering::SeqCst);
            anyhow::bail!("wifi manager queue receiver already taken");
        };
        let mut handles = self.handles.lock().unwrap();
        {
            let core = Arc::clone(self);
            handles.push(thread_util::spawn_named("wifi_manager", move || {
                WifiManagerTask::new(core, rx).run();
            }));
        }
        if self.config.http_port != 0 {
            let core = Arc::clone(self);
            handles.push(thread_util::spawn_named("http_server", move || {
                http_server::http_server_task(&core);
            }));
        }
        drop(handles);

        let is_configured = self.sta_config.lock().unwrap().creds.is_configured();
        if is_configured && !self.config.start_ap_only {
            info!("Saved wifi found on startup. Will attempt to connect.");
            self.msg_tx
                .send(WifiManagerMsg::ConnectSta(ConnectionRequest::RestoreConnection));
        } else {
            if self.config.start_ap_only {
                info!("Force start WiFi hotspot on startup.");
            } else {
                info!("No saved wifi found on startup. Starting access point.");
            }
            self.msg_tx.send(WifiManagerMsg::StartAp);
        }
        Ok(())
    }

    /// Drain the state machine and stop every task. Safe to call more than
    /// once.
    pub fn stop_and_destroy(&self) {
        info!("WiFi manager stop");
        self.shutdown.store(true, Ordering::SeqCst);
        self.msg_tx.send(WifiManagerMsg::StopAndDestroy);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.dns.stop();
    }

    /// Handle for the radio driver and host to post events and commands.
    pub fn event_sink(&self) -> MsgSender {
        self.msg_tx.clone()
    }

    pub fn is_working(&self) -> bool {
        self.flags.is_working.load(Ordering::SeqCst)
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn is_connected_to_wifi(&self) -> bool {
        self.flags.wifi_connected.load(Ordering::SeqCst)
    }

    pub fn is_connected_to_ethernet(&self) -> bool {
        self.eth_state.load(Ordering::SeqCst) == EthState::Up
    }

    /// The host's network glue reports Ethernet link transitions here.
    pub fn set_eth_state(&self, state: EthState) {
        self.eth_state.store(state, Ordering::SeqCst);
    }

    /// By-value copy of settings plus credentials.
    pub fn sta_config_snapshot(&self) -> StaConfig {
        self.sta_config.lock().unwrap().clone()
    }

    pub(crate) fn sta_driver_config(&self) -> StaDriverConfig {
        let config = self.sta_config.lock().unwrap();
        StaDriverConfig {
            ssid: config.creds.ssid().to_string(),
            password: config.creds.password().to_string(),
            power_save: config.settings.sta_power_save,
            static_ip: config.settings.sta_static_ip,
        }
    }

    /// Stage new station credentials; they take effect on the next connect
    /// command and persist once it succeeds.
    pub fn set_ssid_and_password(
        &self,
        ssid: &str,
        password: &str,
    ) -> Result<(), config::InvalidCreds> {
        self.sta_config.lock().unwrap().creds.set(ssid, password)
    }

    /// Queue a user-initiated connection attempt. The status JSON is
    /// flushed first so the UI cannot mistake leftovers from a previous
    /// connection for progress.
    pub fn connect_async(&self) {
        self.net_info.clear();
        self.flags.request_sta_connect.store(true, Ordering::SeqCst);
        self.msg_tx
            .send(WifiManagerMsg::ConnectSta(ConnectionRequest::User));
    }

    /// Scan and block until the rendered AP list is fresh. `None` maps to
    /// HTTP 503.
    pub fn scan_sync(&self) -> Option<String> {
        manager::scan_sync(self)
    }

    /// Forget the stored station credentials and reset the persisted
    /// settings to this boot's defaults.
    pub fn clear_sta_config(&self) -> Result<(), NvsError> {
        let defaults = WifiSettings::from_config(&self.config);
        {
            let mut sta_config = self.sta_config.lock().unwrap();
            sta_config.creds.clear();
            sta_config.settings = defaults.clone();
        }
        self.cred_store.clear(&defaults)
    }
}

/// Build the driver-facing AP configuration. A password under the WPA2
/// minimum downgrades the AP to open auth instead of producing a network
/// nobody can join.
pub(crate) fn ap_config_from_settings(settings: &WifiSettings, config: &Config) -> ApConfig {
    let (auth, password) = if settings.ap_password.len() < WPA2_MINIMUM_PASSWORD_LENGTH {
        (ApAuth::Open, String::new())
    } else {
        (ApAuth::Wpa2Psk, settings.ap_password.clone())
    };
    ApConfig {
        ssid: settings.ap_ssid.clone(),
        password,
        auth,
        channel: settings.ap_channel,
        hidden: settings.ap_hidden,
        bandwidth: settings.ap_bandwidth,
        max_connections: config.ap_max_connections,
        beacon_interval_ms: config.ap_beacon_interval_ms,
    }
}
