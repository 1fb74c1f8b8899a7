//! Scripted Wi-Fi driver for running the portal on a workstation.
//!
//! Implements the driver trait against a canned neighborhood of networks:
//! scans answer per channel after a short delay, and a connect succeeds
//! when the requested SSID exists and the password matches the one the
//! simulated networks accept. Outcomes arrive as events on the manager
//! queue, just like the real driver's callbacks.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

use log::{debug, info};
use wicket_core::ap_list::{AccessPoint, ApAuthMode};
use wicket_core::radio::{
    ApConfig, Country, NetifInfo, RadioDriver, RadioError, ScanParams, StaDriverConfig, WifiMode,
};
use wicket_core::{MsgSender, WifiManagerMsg};

/// Reason code reported for a failed handshake (wrong password).
const REASON_4WAY_HANDSHAKE_TIMEOUT: u16 = 15;
/// Reason code when the SSID is nowhere to be found.
const REASON_NO_AP_FOUND: u16 = 201;
/// Reason code for a locally requested disconnect.
const REASON_ASSOC_LEAVE: u16 = 8;

const SCAN_DURATION: Duration = Duration::from_millis(50);
const CONNECT_DURATION: Duration = Duration::from_millis(300);

pub struct SimRadio {
    sink: Mutex<Option<MsgSender>>,
    join_password: String,
    networks: Vec<AccessPoint>,
    sta: Mutex<Option<StaDriverConfig>>,
    last_channel: Mutex<Option<u8>>,
}

fn ap(ssid: &str, channel: u8, rssi: i8, authmode: ApAuthMode) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        channel,
        rssi,
        authmode,
    }
}

impl SimRadio {
    pub fn new(join_password: String) -> Self {
        Self {
            sink: Mutex::new(None),
            join_password,
            networks: vec![
                ap("HomeNet", 6, -48, ApAuthMode::Wpa2Psk),
                // A weaker twin of HomeNet shows off the dedup.
                ap("HomeNet", 6, -61, ApAuthMode::Wpa2Psk),
                ap("CoffeeShop", 1, -70, ApAuthMode::Open),
                ap("Upstairs", 11, -60, ApAuthMode::Wpa3Psk),
            ],
            sta: Mutex::new(None),
            last_channel: Mutex::new(None),
        }
    }

    /// Hook the radio up to the manager queue. Must happen before
    /// `Core::start`.
    pub fn set_sink(&self, sink: MsgSender) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn sink(&self) -> Option<MsgSender> {
        self.sink.lock().unwrap().clone()
    }

    fn post_later(&self, delay: Duration, msg: WifiManagerMsg) {
        if let Some(sink) = self.sink() {
            std::thread::spawn(move || {
                std::thread::sleep(delay);
                sink.send(msg);
            });
        }
    }
}

impl RadioDriver for SimRadio {
    fn start(&self) -> Result<(), RadioError> {
        info!("sim radio started");
        Ok(())
    }

    fn set_mode(&self, mode: WifiMode) -> Result<(), RadioError> {
        info!("sim radio mode: {mode:?}");
        Ok(())
    }

    fn configure_ap(&self, config: &ApConfig) -> Result<(), RadioError> {
        info!(
            "sim AP configured: ssid '{}' channel {} ({:?})",
            config.ssid, config.channel, config.auth
        );
        Ok(())
    }

    fn configure_sta(&self, config: &StaDriverConfig) -> Result<(), RadioError> {
        debug!("sim STA configured: ssid '{}'", config.ssid);
        *self.sta.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn connect(&self) -> Result<(), RadioError> {
        let Some(sta) = self.sta.lock().unwrap().clone() else {
            return Err(RadioError::new("no station configuration"));
        };
        info!("sim connecting to '{}'", sta.ssid);

        let known = self.networks.iter().any(|n| n.ssid == sta.ssid);
        let outcome = if !known {
            WifiManagerMsg::StaDisconnected(REASON_NO_AP_FOUND)
        } else if sta.password != self.join_password {
            WifiManagerMsg::StaDisconnected(REASON_4WAY_HANDSHAKE_TIMEOUT)
        } else {
            WifiManagerMsg::StaGotIp(Ipv4Addr::new(192, 168, 7, 42))
        };
        self.post_later(CONNECT_DURATION, outcome);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), RadioError> {
        self.post_later(
            Duration::from_millis(10),
            WifiManagerMsg::StaDisconnected(REASON_ASSOC_LEAVE),
        );
        Ok(())
    }

    fn scan_start(&self, params: &ScanParams) -> Result<(), RadioError> {
        debug!("sim scanning channel {}", params.channel);
        *self.last_channel.lock().unwrap() = Some(params.channel);
        self.post_later(SCAN_DURATION, WifiManagerMsg::ScanDone);
        Ok(())
    }

    fn scan_stop(&self) -> Result<(), RadioError> {
        self.post_later(Duration::from_millis(1), WifiManagerMsg::ScanDone);
        Ok(())
    }

    fn scan_records(&self, max: usize) -> Result<Vec<AccessPoint>, RadioError> {
        let channel = self.last_channel.lock().unwrap().take();
        Ok(self
            .networks
            .iter()
            .filter(|n| Some(n.channel) == channel)
            .take(max)
            .cloned()
            .collect())
    }

    fn country(&self) -> Result<Country, RadioError> {
        Ok(Country {
            first_chan: 1,
            num_chans: 11,
        })
    }

    fn sta_netif_info(&self) -> Result<NetifInfo, RadioError> {
        Ok(NetifInfo {
            ip: Ipv4Addr::new(192, 168, 7, 42),
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(192, 168, 7, 1),
            dhcp_server: Some(Ipv4Addr::new(192, 168, 7, 1)),
        })
    }
}
