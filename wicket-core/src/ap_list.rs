//! Scan-result bookkeeping: deduplication, ordering and the shared JSON
//! rendering of the access-point list.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::json;

/// Maximum number of access points kept from a scan. 15 keeps the rendered
/// list small enough for a single response buffer on the original hardware.
pub const MAX_AP_NUM: usize = 15;

/// Wi-Fi authentication mode of a scanned network, in the driver's numeric
/// order. Rendered as its raw number in `ap.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ApAuthMode {
    Open = 0,
    Wep = 1,
    WpaPsk = 2,
    Wpa2Psk = 3,
    WpaWpa2Psk = 4,
    Wpa2Enterprise = 5,
    Wpa3Psk = 6,
    Wpa2Wpa3Psk = 7,
}

/// One scanned access point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    pub ssid: String,
    pub channel: u8,
    pub rssi: i8,
    pub authmode: ApAuthMode,
}

/// Working area for an in-progress multi-channel scan: the accumulated
/// unique list plus one channel's worth of fresh records.
pub type ApWorkingList = SmallVec<[AccessPoint; MAX_AP_NUM]>;

/// Remove duplicate `(ssid, authmode)` entries, keeping the strongest RSSI
/// in the earliest slot. Entries with an empty SSID (hidden networks) are
/// dropped as well, matching the compaction step.
pub fn filter_unique(aps: &mut ApWorkingList) {
    for i in 0..aps.len() {
        if aps[i].ssid.is_empty() {
            continue;
        }
        for j in (i + 1)..aps.len() {
            if aps[j].ssid == aps[i].ssid && aps[j].authmode == aps[i].authmode {
                if aps[j].rssi > aps[i].rssi {
                    aps[i].rssi = aps[j].rssi;
                }
                aps[j].ssid.clear();
            }
        }
    }
    aps.retain(|ap| !ap.ssid.is_empty());
}

/// Stable sort by RSSI, strongest first.
pub fn sort_by_rssi(aps: &mut [AccessPoint]) {
    aps.sort_by(|a, b| b.rssi.cmp(&a.rssi));
}

/// Dedup, sort and cap a scan working list in place.
pub fn dedup_sort_truncate(aps: &mut ApWorkingList) {
    filter_unique(aps);
    sort_by_rssi(aps);
    aps.truncate(MAX_AP_NUM);
}

fn render(aps: &[AccessPoint]) -> String {
    let n = aps.len().min(MAX_AP_NUM);
    let mut out = String::from("[");
    for (i, ap) in aps.iter().take(n).enumerate() {
        out.push_str("{\"ssid\":");
        json::escape_into(&mut out, &ap.ssid);
        out.push_str(&format!(
            ",\"chan\":{},\"rssi\":{},\"auth\":{}}}{}\n",
            ap.channel,
            ap.rssi,
            ap.authmode as u8,
            if i + 1 < n { "," } else { "" }
        ));
    }
    out.push_str("]\n");
    out
}

/// Shared holder of the last scan result rendered as JSON.
///
/// Rendering happens inside the lock and readers only ever get an owned
/// copy, so no reference into the buffer can outlive the critical section.
pub struct ApListJson {
    buf: Mutex<String>,
}

impl Default for ApListJson {
    fn default() -> Self {
        Self {
            buf: Mutex::new(String::from("[]\n")),
        }
    }
}

impl ApListJson {
    /// Replace the rendered list from a finished (deduplicated, sorted)
    /// working list.
    pub fn set_from(&self, aps: &[AccessPoint]) {
        let mut buf = self.buf.lock().unwrap();
        *buf = render(aps);
    }

    pub fn reset(&self) {
        let mut buf = self.buf.lock().unwrap();
        *buf = String::from("[]\n");
    }

    pub fn get_copy(&self) -> String {
        self.buf.lock().unwrap().clone()
    }
}
