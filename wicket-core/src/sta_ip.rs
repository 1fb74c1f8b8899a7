//! Thread-safe holder of the current station IP address.

use std::net::Ipv4Addr;
use std::sync::Mutex;

use log::info;

/// The station IP published by the state machine after a successful
/// association.
///
/// `None` while the station is unconfigured or disconnected; callers that
/// match the captive-portal `Host:` header must skip the comparison in that
/// case rather than matching against a placeholder string.
#[derive(Default)]
pub struct StaIp {
    ip: Mutex<Option<Ipv4Addr>>,
}

impl StaIp {
    pub fn set(&self, ip: Ipv4Addr) {
        *self.ip.lock().unwrap() = Some(ip);
        info!("Set STA IP to: {ip}");
    }

    pub fn reset(&self) {
        *self.ip.lock().unwrap() = None;
        info!("Reset STA IP");
    }

    pub fn get(&self) -> Option<Ipv4Addr> {
        *self.ip.lock().unwrap()
    }

    /// Dotted-decimal copy, when set.
    pub fn get_string(&self) -> Option<String> {
        self.get().map(|ip| ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset_and_round_trips() {
        let holder = StaIp::default();
        assert_eq!(holder.get(), None);
        assert_eq!(holder.get_string(), None);

        holder.set(Ipv4Addr::new(192, 168, 7, 42));
        assert_eq!(holder.get_string().as_deref(), Some("192.168.7.42"));

        holder.reset();
        assert_eq!(holder.get(), None);
    }
}
