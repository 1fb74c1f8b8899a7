//! Shared "current network status" record and its JSON rendering.
//!
//! The state machine is the only writer; the HTTP task renders the JSON
//! inside the critical section and hands out an owned string, with a small
//! lock budget so a stuck writer degrades to 503 instead of stalling the
//! request pipeline.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::json;
use crate::radio::NetifInfo;

/// How long the HTTP task may wait for the status lock before answering 503.
pub const STATUS_LOCK_BUDGET: Duration = Duration::from_millis(100);

/// Why the network status was last updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum UpdateReason {
    Undefined = -1,
    ConnectionOk = 0,
    FailedAttempt = 1,
    UserDisconnect = 2,
    LostConnection = 3,
}

impl UpdateReason {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// The status record behind [`NetInfoJson`].
#[derive(Debug, Clone)]
pub struct NetworkInfo {
    pub ssid: Option<String>,
    pub ip: String,
    pub netmask: String,
    pub gw: String,
    pub dhcp: String,
    pub update_reason: UpdateReason,
    /// Raw JSON object fragment merged into the status as `"extra":{…}`.
    pub extra: String,
}

impl Default for NetworkInfo {
    fn default() -> Self {
        Self {
            ssid: None,
            ip: String::new(),
            netmask: String::new(),
            gw: String::new(),
            dhcp: String::new(),
            update_reason: UpdateReason::Undefined,
            extra: String::new(),
        }
    }
}

fn render(info: &NetworkInfo, flag_access_from_lan: bool) -> String {
    let mut out = String::from("{");
    if info.update_reason != UpdateReason::Undefined {
        out.push_str("\"ssid\":");
        match &info.ssid {
            None => out.push_str("null"),
            Some(ssid) => json::escape_into(&mut out, ssid),
        }
        out.push_str(&format!(
            ",\"ip\":\"{}\",\"netmask\":\"{}\",\"gw\":\"{}\",\"dhcp\":\"{}\",\"urc\":{}",
            info.ip,
            info.netmask,
            info.gw,
            info.dhcp,
            info.update_reason.code()
        ));
        if !info.extra.is_empty() {
            out.push_str(&format!(",\"extra\":{{{}}}", info.extra));
        }
        out.push_str(&format!(
            ",\"lan\":{}",
            if flag_access_from_lan { 1 } else { 0 }
        ));
    } else if !info.extra.is_empty() {
        out.push_str(&format!("\"extra\":{{{}}}", info.extra));
    }
    out.push_str("}\n");
    out
}

/// Mutex-protected holder of the status record.
#[derive(Default)]
pub struct NetInfoJson {
    info: Mutex<NetworkInfo>,
}

impl NetInfoJson {
    /// Drop the connection fields back to "nothing known yet". The extra
    /// fragment survives a clear.
    pub fn clear(&self) {
        let mut info = self.info.lock().unwrap();
        info.ssid = None;
        info.ip.clear();
        info.netmask.clear();
        info.gw.clear();
        info.dhcp.clear();
        info.update_reason = UpdateReason::Undefined;
    }

    /// Publish a transition outcome. `netif`/`dhcp` are only meaningful for
    /// [`UpdateReason::ConnectionOk`].
    pub fn update(
        &self,
        ssid: Option<&str>,
        netif: Option<&NetifInfo>,
        dhcp: Option<Ipv4Addr>,
        update_reason: UpdateReason,
    ) {
        let mut info = self.info.lock().unwrap();
        info.ssid = ssid.map(str::to_string);
        match netif {
            Some(netif) => {
                info.ip = netif.ip.to_string();
                info.netmask = netif.netmask.to_string();
                info.gw = netif.gw.to_string();
            }
            None => {
                info.ip.clear();
                info.netmask.clear();
                info.gw.clear();
            }
        }
        info.dhcp = dhcp.map(|ip| ip.to_string()).unwrap_or_default();
        info.update_reason = update_reason;
    }

    pub fn set_extra(&self, extra: &str) {
        self.info.lock().unwrap().extra = extra.to_string();
    }

    /// Snapshot of the current reason, for tests and callers that only need
    /// the coarse state.
    pub fn update_reason(&self) -> UpdateReason {
        self.info.lock().unwrap().update_reason
    }

    /// Render the status JSON, giving up after `budget` if the lock is held.
    pub fn generate_with_timeout(&self, flag_access_from_lan: bool, budget: Duration) -> Option<String> {
        let deadline = Instant::now() + budget;
        loop {
            if let Ok(info) = self.info.try_lock() {
                return Some(render(&info, flag_access_from_lan));
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}
