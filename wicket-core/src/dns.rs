//! Captive-portal DNS hijack.
//!
//! A UDP responder on port 53 that answers every well-formed query with the
//! access point's own address, TTL 0, so captive-portal probes resolve to
//! the provisioning UI and nothing gets poisoned into a cache. Queries over
//! the size limit (multi-question packets and such) are silently dropped.
//! The state machine starts it when a station joins the AP and stops it
//! again once upstream connectivity exists.

use std::net::{Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::thread_util;
use crate::watchdog::Watchdog;

/// Longest query the hijack answers.
pub const DNS_QUERY_MAX_SIZE: usize = 80;

const DNS_HEADER_SIZE: usize = 12;
const DNS_ANSWER_SIZE: usize = 16;

/// Controls the DNS task. `start`/`stop` are idempotent and may be called
/// from the state machine on every AP client transition.
pub struct DnsServer {
    bind_ip: Ipv4Addr,
    port: u16,
    resolve_to: Ipv4Addr,
    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    watchdog: Arc<dyn Watchdog>,
}

impl DnsServer {
    pub fn new(
        bind_ip: Ipv4Addr,
        port: u16,
        resolve_to: Ipv4Addr,
        watchdog: Arc<dyn Watchdog>,
    ) -> Self {
        Self {
            bind_ip,
            port,
            resolve_to,
            running: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
            watchdog,
        }
    }

    pub fn start(&self) {
        if self.port == 0 {
            debug!("DNS hijack disabled (port 0)");
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let bind_ip = self.bind_ip;
        let port = self.port;
        let resolve_to = self.resolve_to;
        let running = Arc::clone(&self.running);
        let watchdog = Arc::clone(&self.watchdog);
        let handle = thread_util::spawn_named("dns_srv", move || {
            if let Err(e) = run_dns_server(bind_ip, port, resolve_to, &running, watchdog.as_ref()) {
                error!("DNS server error: {e}");
            }
            running.store(false, Ordering::SeqCst);
        });
        *self.thread.lock().unwrap() = Some(handle);
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("DNS server stopping");
        // The thread notices the cleared flag at its next receive timeout.
        let _ = self.thread.lock().unwrap().take();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

fn run_dns_server(
    bind_ip: Ipv4Addr,
    port: u16,
    resolve_to: Ipv4Addr,
    running: &AtomicBool,
    watchdog: &dyn Watchdog,
) -> std::io::Result<()> {
    info!("DNS server starting on {bind_ip}:{port}...");

    let socket = UdpSocket::bind((bind_ip, port))?;
    // Wake often enough to feed the watchdog and notice a stop request.
    socket.set_read_timeout(Some(Duration::from_secs(3)))?;

    info!("DNS server listening on {port}/udp");

    let mut buf = [0u8; DNS_QUERY_MAX_SIZE + 1];
    while running.load(Ordering::SeqCst) {
        watchdog.feed();

        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!("DNS recv error: {e}");
                continue;
            }
        };

        match build_dns_response(&buf[..len], resolve_to) {
            Some(response) => {
                debug!("DNS: answering {len}-byte query from {src}");
                if let Err(e) = socket.send_to(&response, src) {
                    warn!("DNS send error: {e}");
                }
            }
            None => debug!("DNS: dropping query from {src} ({len} bytes)"),
        }
    }
    Ok(())
}

/// Build the hijack answer for one query, or `None` to drop it silently.
///
/// The response echoes the question and appends a single A/IN record
/// pointing at `resolve_to` with TTL 0; ANCOUNT mirrors QDCOUNT.
pub fn build_dns_response(query: &[u8], resolve_to: Ipv4Addr) -> Option<Vec<u8>> {
    if query.len() < DNS_HEADER_SIZE || query.len() > DNS_QUERY_MAX_SIZE {
        return None;
    }

    let flags = u16::from_be_bytes([query[2], query[3]]);
    // Only standard queries: QR must be 0 and OPCODE 0.
    if flags & 0xf800 != 0 {
        return None;
    }
    let qdcount = u16::from_be_bytes([query[4], query[5]]);
    if qdcount == 0 {
        return None;
    }

    let mut response = Vec::with_capacity(query.len() + DNS_ANSWER_SIZE);

    // Header: copied id, QR=1, AA=1, RD=0, TC=0, RCODE=0.
    response.extend_from_slice(&query[0..2]);
    response.extend_from_slice(&0x8400u16.to_be_bytes());
    response.extend_from_slice(&qdcount.to_be_bytes()); // QDCOUNT
    response.extend_from_slice(&qdcount.to_be_bytes()); // ANCOUNT = QDCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    response.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    // Question section, echoed verbatim.
    response.extend_from_slice(&query[DNS_HEADER_SIZE..]);

    // One answer: pointer to the first question name.
    response.extend_from_slice(&0xC00Cu16.to_be_bytes());
    response.extend_from_slice(&1u16.to_be_bytes()); // TYPE = A
    response.extend_from_slice(&1u16.to_be_bytes()); // CLASS = IN
    response.extend_from_slice(&0u32.to_be_bytes()); // TTL = 0, no caching
    response.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
    response.extend_from_slice(&resolve_to.octets());

    Some(response)
}
