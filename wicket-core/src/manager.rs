//! The connectivity state machine (CSM).
//!
//! One task owns every radio mutation and every write to the shared status
//! holders. Commands from the host and HTTP layer, and events from the
//! radio driver, arrive over a single bounded queue; the task blocks on it
//! and handles one message at a time. Driver callbacks must only ever
//! enqueue; the [`MsgSender`] handed to them is the whole of their
//! permitted surface.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use atomic_enum::atomic_enum;
use log::{debug, error, info, warn};

use crate::ap_list::{self, ApWorkingList, MAX_AP_NUM};
use crate::net_info::UpdateReason;
use crate::radio::{ScanParams, WifiMode, DEFAULT_COUNTRY};
use crate::thread_util;
use crate::Core;

/// Queue depth; producers block while it is full.
pub(crate) const QUEUE_DEPTH: usize = 8;

/// Backoff after a failed queue receive, to keep a broken queue from
/// spinning the task.
const RECV_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

/// Who asked for a station connection. Decides whether a failure surfaces
/// to the UI and whether success persists the credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRequest {
    User,
    AutoReconnect,
    RestoreConnection,
}

/// Everything the state machine processes: commands from the host/HTTP
/// side, events from the radio driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiManagerMsg {
    // Commands.
    StartWifiScan,
    ConnectEth,
    ConnectSta(ConnectionRequest),
    DisconnectEth,
    DisconnectSta,
    StartAp,
    StopAp,
    StopAndDestroy,
    TaskWatchdogFeed,
    // Events.
    StaDisconnected(u16),
    ScanNext,
    ScanDone,
    StaGotIp(Ipv4Addr),
    ApStaConnected,
    ApStaDisconnected,
    ApStaIpAssigned,
}

/// Cloneable handle for posting into the manager queue. Safe to use from
/// driver callbacks; a full queue blocks the producer.
#[derive(Clone)]
pub struct MsgSender {
    tx: SyncSender<WifiManagerMsg>,
}

impl MsgSender {
    pub(crate) fn new(tx: SyncSender<WifiManagerMsg>) -> Self {
        Self { tx }
    }

    /// Post a message; returns false (and logs) if the manager is gone.
    pub fn send(&self, msg: WifiManagerMsg) -> bool {
        match self.tx.send(msg) {
            Ok(()) => true,
            Err(e) => {
                error!("wifi manager queue send failed: {e}");
                false
            }
        }
    }
}

/// Ethernet uplink state, owned by the host's network glue.
#[atomic_enum]
#[derive(PartialEq, Eq)]
pub enum EthState {
    Down = 0,
    Connecting,
    Up,
}

/// Observable state bits. Explicit atomics instead of an event-bit word so
/// each flag has exactly one meaning and a greppable name.
#[derive(Default)]
pub(crate) struct EventFlags {
    pub wifi_connected: AtomicBool,
    pub ap_started: AtomicBool,
    pub ap_active: AtomicBool,
    pub ap_sta_connected: AtomicBool,
    pub ap_sta_ip_assigned: AtomicBool,
    pub scan_in_progress: AtomicBool,
    pub is_working: AtomicBool,
    pub request_sta_connect: AtomicBool,
    pub request_disconnect: AtomicBool,
    pub request_restore_sta: AtomicBool,
}

/// Progress of a multi-channel scan.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanProgress {
    pub first_chan: u8,
    pub last_chan: u8,
    pub cur_chan: u8,
    pub num_access_points: usize,
}

pub(crate) struct WifiManagerTask {
    core: Arc<Core>,
    rx: Receiver<WifiManagerMsg>,
    scan: ScanProgress,
    working: ApWorkingList,
}

impl WifiManagerTask {
    pub fn new(core: Arc<Core>, rx: Receiver<WifiManagerMsg>) -> Self {
        Self {
            core,
            rx,
            scan: ScanProgress::default(),
            working: ApWorkingList::new(),
        }
    }

    pub fn run(mut self) {
        loop {
            let msg = match self.rx.recv() {
                Ok(msg) => msg,
                Err(e) => {
                    // The core keeps a sender alive for the task's whole
                    // lifetime, so this path should be unreachable; back off
                    // instead of spinning if it ever is not.
                    error!("wifi manager queue recv failed: {e}");
                    std::thread::sleep(RECV_FAILURE_BACKOFF);
                    continue;
                }
            };
            if self.handle(msg) {
                break;
            }
        }

        info!("wifi manager task stopping");
        self.notify_scan_done();
        self.core.flags.is_working.store(false, Ordering::SeqCst);
        self.core.dns.stop();
    }

    /// Dispatch one message; true means terminate.
    fn handle(&mut self, msg: WifiManagerMsg) -> bool {
        match msg {
            WifiManagerMsg::StopAndDestroy => {
                info!("MESSAGE: STOP_AND_DESTROY");
                return true;
            }
            WifiManagerMsg::StartWifiScan => self.cmd_start_wifi_scan(),
            WifiManagerMsg::ConnectEth => self.cmd_connect_eth(),
            WifiManagerMsg::ConnectSta(request) => self.cmd_connect_sta(request),
            WifiManagerMsg::DisconnectEth => self.cmd_disconnect_eth(),
            WifiManagerMsg::DisconnectSta => self.cmd_disconnect_sta(),
            WifiManagerMsg::StartAp => self.cmd_start_ap(),
            WifiManagerMsg::StopAp => self.cmd_stop_ap(),
            WifiManagerMsg::TaskWatchdogFeed => self.core.watchdog.feed(),
            WifiManagerMsg::StaDisconnected(reason) => self.ev_sta_disconnected(reason),
            WifiManagerMsg::ScanNext => self.ev_scan_next(),
            WifiManagerMsg::ScanDone => self.ev_scan_done(),
            WifiManagerMsg::StaGotIp(ip) => self.ev_sta_got_ip(ip),
            WifiManagerMsg::ApStaConnected => self.ev_ap_sta_connected(),
            WifiManagerMsg::ApStaDisconnected => self.ev_ap_sta_disconnected(),
            WifiManagerMsg::ApStaIpAssigned => self.ev_ap_sta_ip_assigned(),
        }
        false
    }

    fn cmd_start_wifi_scan(&mut self) {
        info!("MESSAGE: ORDER_START_WIFI_SCAN");

        // A scan already in progress absorbs the command.
        if self.core.flags.scan_in_progress.swap(true, Ordering::SeqCst) {
            return;
        }

        let country = match self.core.radio.country() {
            Ok(country) => country,
            Err(e) => {
                error!("country query failed: {e}");
                DEFAULT_COUNTRY
            }
        };
        self.scan.first_chan = country.first_chan;
        // With zero channels last_chan lands below first_chan and the very
        // first advance reports the scan as finished.
        self.scan.last_chan = if country.num_chans == 0 {
            country.first_chan.saturating_sub(1)
        } else {
            country.first_chan + country.num_chans - 1
        };
        self.scan.cur_chan = country.first_chan.saturating_sub(1);
        self.scan.num_access_points = 0;
        self.working.clear();

        if self.scan_next_channel() {
            self.core.msg_tx.send(WifiManagerMsg::ScanDone);
        }
    }

    /// Advance to the next channel; true once every channel is done. The
    /// actual driver scan is kicked by the delayed `ScanNext` event so the
    /// AP side stays responsive between channels.
    fn scan_next_channel(&mut self) -> bool {
        self.scan.cur_chan += 1;
        if self.scan.cur_chan > self.scan.last_chan {
            return true;
        }
        let delay = self.core.config.scan_channel_delay_ms;
        info!(
            "Delay {delay} ms before scanning Wi-Fi APs on channel {}",
            self.scan.cur_chan
        );
        let tx = self.core.msg_tx.clone();
        thread_util::spawn_named("wifi_scan_tmr", move || {
            std::thread::sleep(Duration::from_millis(delay));
            tx.send(WifiManagerMsg::ScanNext);
        });
        false
    }

    fn ev_scan_next(&mut self) {
        let params = ScanParams {
            channel: self.scan.cur_chan,
            show_hidden: true,
            active_max_ms: self.core.config.scan_active_dwell_ms,
        };
        info!("Start scanning WiFi channel {}", params.channel);
        if let Err(e) = self.core.radio.scan_start(&params) {
            // A scan colliding with a connection attempt fails here; that is
            // fine, the connection matters more than fresh results.
            warn!("EVENT_SCAN_NEXT: scan start failed: {e}");
            self.notify_scan_done();
        }
    }

    fn ev_scan_done(&mut self) {
        debug!("MESSAGE: EVENT_SCAN_DONE: channel={}", self.scan.cur_chan);

        let records = match self.core.radio.scan_records(MAX_AP_NUM) {
            Ok(records) => records,
            Err(e) => {
                error!("EVENT_SCAN_DONE: fetching scan records failed: {e}");
                self.notify_scan_done();
                return;
            }
        };
        info!(
            "EVENT_SCAN_DONE: found {} Wi-Fi APs on channel {}",
            records.len(),
            self.scan.cur_chan
        );

        self.working.extend(records.into_iter().take(MAX_AP_NUM));
        ap_list::dedup_sort_truncate(&mut self.working);
        self.scan.num_access_points = self.working.len();
        self.core.ap_list.set_from(&self.working);

        if self.scan_next_channel() {
            info!("EVENT_SCAN_DONE: scanning finished");
            self.notify_scan_done();
        }
    }

    /// Clear the scan flag and release a waiting `scan_sync` caller.
    fn notify_scan_done(&self) {
        self.core.flags.scan_in_progress.store(false, Ordering::SeqCst);
        if let Some(waiter) = self.core.scan_waiter.lock().unwrap().take() {
            info!("NOTIFY: wifi scan done");
            let _ = waiter.send(());
        }
    }

    fn cmd_connect_sta(&mut self, request: ConnectionRequest) {
        info!("MESSAGE: ORDER_CONNECT_STA ({request:?})");

        match request {
            ConnectionRequest::User => {
                self.core.flags.request_sta_connect.store(true, Ordering::SeqCst);
            }
            ConnectionRequest::RestoreConnection => {
                self.core.flags.request_restore_sta.store(true, Ordering::SeqCst);
            }
            ConnectionRequest::AutoReconnect => {}
        }

        if self.core.flags.wifi_connected.load(Ordering::SeqCst) {
            // Already associated: force a clean disconnect first, then come
            // back around as an auto reconnect.
            self.core.msg_tx.send(WifiManagerMsg::DisconnectSta);
            self.core
                .msg_tx
                .send(WifiManagerMsg::ConnectSta(ConnectionRequest::AutoReconnect));
            return;
        }

        // Abort a scan that would race the association; the driver posts a
        // final ScanDone which clears the flag.
        if self.core.flags.scan_in_progress.load(Ordering::SeqCst) {
            if let Err(e) = self.core.radio.scan_stop() {
                warn!("scan stop failed: {e}");
            }
        }

        let sta_config = self.core.sta_driver_config();
        if let Err(e) = self.core.radio.configure_sta(&sta_config) {
            error!("configure_sta failed: {e}");
            return;
        }
        if let Err(e) = self.core.radio.connect() {
            error!("connect failed: {e}");
        }
    }

    fn cmd_disconnect_sta(&self) {
        info!("MESSAGE: ORDER_DISCONNECT_STA");
        self.core.flags.request_disconnect.store(true, Ordering::SeqCst);
        if let Err(e) = self.core.radio.disconnect() {
            error!("disconnect failed: {e}");
        }
        self.core.callbacks.on_disconnect_sta();
    }

    fn cmd_connect_eth(&self) {
        info!("MESSAGE: ORDER_CONNECT_ETH");
        self.core.eth_state.store(EthState::Connecting, Ordering::SeqCst);
        self.core.callbacks.on_connect_eth();
    }

    fn cmd_disconnect_eth(&self) {
        info!("MESSAGE: ORDER_DISCONNECT_ETH");
        self.core.eth_state.store(EthState::Down, Ordering::SeqCst);
        self.core.callbacks.on_disconnect_eth();
    }

    fn cmd_start_ap(&self) {
        info!("MESSAGE: ORDER_START_AP");
        if let Err(e) = self.core.radio.set_mode(WifiMode::ApSta) {
            error!("set_mode failed: {e}");
            return;
        }
        self.core.flags.ap_started.store(true, Ordering::SeqCst);
        self.core.flags.ap_active.store(true, Ordering::SeqCst);
    }

    fn cmd_stop_ap(&self) {
        info!("MESSAGE: ORDER_STOP_AP");
        info!("Configure WiFi mode: Station");
        if let Err(e) = self.core.radio.set_mode(WifiMode::Sta) {
            error!("set_mode failed: {e}");
        }
        self.core.flags.ap_started.store(false, Ordering::SeqCst);
        self.core.flags.ap_active.store(false, Ordering::SeqCst);
    }

    /// A disconnect arrives for wrong passwords, user disconnects and lost
    /// links alike; the request flags decide which one it was.
    fn ev_sta_disconnected(&mut self, reason: u16) {
        info!("MESSAGE: EVENT_STA_DISCONNECTED with Reason code: {reason}");

        self.core.flags.wifi_connected.store(false, Ordering::SeqCst);
        self.core.sta_ip.reset();

        // A disconnect while a scan is pending would leave the scan flag set
        // forever and any scan_sync caller parked; release both.
        if self.core.flags.scan_in_progress.swap(false, Ordering::SeqCst) {
            self.notify_scan_done();
        }

        let update_reason = if self.core.flags.request_sta_connect.swap(false, Ordering::SeqCst) {
            // No retries for a user-requested connection: a wrong password
            // should fail fast, not hang the UI.
            UpdateReason::FailedAttempt
        } else if self.core.flags.request_disconnect.swap(false, Ordering::SeqCst) {
            info!("User manually requested a disconnect so the lost connection is a normal event");
            UpdateReason::UserDisconnect
        } else {
            info!("lost connection");
            self.core
                .msg_tx
                .send(WifiManagerMsg::ConnectSta(ConnectionRequest::AutoReconnect));
            UpdateReason::LostConnection
        };

        let ssid = self.core.sta_config_snapshot().creds.ssid().to_string();
        self.core
            .net_info
            .update(Some(&ssid), None, None, update_reason);
    }

    fn ev_sta_got_ip(&mut self, ip: Ipv4Addr) {
        info!("MESSAGE: EVENT_STA_GOT_IP {ip}");

        let was_restore = self.core.flags.request_restore_sta.swap(false, Ordering::SeqCst);
        self.core.flags.request_sta_connect.store(false, Ordering::SeqCst);
        self.core.flags.wifi_connected.store(true, Ordering::SeqCst);

        let snapshot = self.core.sta_config_snapshot();
        // A restored connection is already on flash; everything else earns
        // its persistence by reaching this point.
        if !was_restore {
            if let Err(e) = self.core.cred_store.save(&snapshot) {
                error!("saving wifi config failed: {e}");
            }
        }

        match self.core.radio.sta_netif_info() {
            Ok(netif) => {
                self.core.sta_ip.set(netif.ip);
                self.core.net_info.update(
                    Some(snapshot.creds.ssid()),
                    Some(&netif),
                    netif.dhcp_server,
                    UpdateReason::ConnectionOk,
                );
            }
            Err(e) => error!("sta_netif_info failed: {e}"),
        }
    }

    fn ev_ap_sta_connected(&self) {
        info!("MESSAGE: EVENT_AP_STA_CONNECTED");
        self.core.flags.ap_sta_ip_assigned.store(false, Ordering::SeqCst);
        self.core.flags.ap_sta_connected.store(true, Ordering::SeqCst);
        self.core.callbacks.on_ap_sta_connected();
        if !self.core.flags.wifi_connected.load(Ordering::SeqCst) {
            self.core.dns.start();
        }
    }

    fn ev_ap_sta_disconnected(&self) {
        info!("MESSAGE: EVENT_AP_STA_DISCONNECTED");
        self.core.flags.ap_sta_connected.store(false, Ordering::SeqCst);
        self.core.flags.ap_sta_ip_assigned.store(false, Ordering::SeqCst);
        self.core.callbacks.on_ap_sta_disconnected();
        self.core.dns.stop();
    }

    fn ev_ap_sta_ip_assigned(&self) {
        info!("MESSAGE: EVENT_AP_STA_IP_ASSIGNED");
        self.core.flags.ap_sta_ip_assigned.store(true, Ordering::SeqCst);
    }
}

/// Kick a scan and wait for it to finish, then return the rendered AP list.
///
/// Runs on the HTTP task. The wait re-feeds the task watchdog at a third of
/// its timeout; a second concurrent caller gets `None` straight away, as
/// does anyone waiting when the manager shuts down.
pub(crate) fn scan_sync(core: &Core) -> Option<String> {
    let rx = {
        let mut waiter = core.scan_waiter.lock().unwrap();
        if waiter.is_some() {
            error!("Another thread tries to perform the same operation");
            return None;
        }
        let (tx, rx) = oneshot::channel();
        *waiter = Some(tx);
        rx
    };

    info!("scan_sync: requesting wifi scan");
    if !core.msg_tx.send(WifiManagerMsg::StartWifiScan) {
        core.scan_waiter.lock().unwrap().take();
        return None;
    }

    let feed_interval = core.config.watchdog_timeout / 3;
    loop {
        match rx.recv_timeout(feed_interval) {
            Ok(()) => break,
            Err(oneshot::RecvTimeoutError::Timeout) => core.watchdog.feed(),
            Err(oneshot::RecvTimeoutError::Disconnected) => {
                warn!("scan_sync: wifi manager went away");
                core.scan_waiter.lock().unwrap().take();
                return None;
            }
        }
    }

    Some(core.ap_list.get_copy())
}
