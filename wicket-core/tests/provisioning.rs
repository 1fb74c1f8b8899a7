//! End-to-end provisioning scenarios: the full stack (state machine task,
//! HTTP task, auth layer) driven through real sockets against a scripted
//! radio driver.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use md5::Md5;
use sha2::{Digest, Sha256};

use wicket_core::ap_list::{AccessPoint, ApAuthMode};
use wicket_core::auth::{LanAuthConfig, LanAuthType};
use wicket_core::cred_store::InMemoryNvs;
use wicket_core::radio::{
    ApConfig, Country, NetifInfo, RadioDriver, RadioError, ScanParams, StaDriverConfig, WifiMode,
};
use wicket_core::{Config, Core, MsgSender, WifiManagerMsg};

const JOIN_PASSWORD: &str = "secret123";
const STA_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 7, 42);

/// Radio with one neighborhood network per channel; association outcomes
/// are posted asynchronously like a real driver's event callbacks.
struct ScriptedRadio {
    sink: Mutex<Option<MsgSender>>,
    sta: Mutex<Option<StaDriverConfig>>,
    last_channel: Mutex<Option<u8>>,
}

impl ScriptedRadio {
    fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            sta: Mutex::new(None),
            last_channel: Mutex::new(None),
        }
    }

    fn set_sink(&self, sink: MsgSender) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    fn post_later(&self, delay: Duration, msg: WifiManagerMsg) {
        let sink = self.sink.lock().unwrap().clone().expect("sink installed");
        std::thread::spawn(move || {
            std::thread::sleep(delay);
            sink.send(msg);
        });
    }

    fn networks() -> Vec<AccessPoint> {
        vec![
            AccessPoint {
                ssid: "HomeNet".to_string(),
                channel: 1,
                rssi: -48,
                authmode: ApAuthMode::Wpa2Psk,
            },
            AccessPoint {
                ssid: "CoffeeShop".to_string(),
                channel: 2,
                rssi: -70,
                authmode: ApAuthMode::Open,
            },
        ]
    }
}

impl RadioDriver for ScriptedRadio {
    fn start(&self) -> Result<(), RadioError> {
        Ok(())
    }

    fn set_mode(&self, _mode: WifiMode) -> Result<(), RadioError> {
        Ok(())
    }

    fn configure_ap(&self, _config: &ApConfig) -> Result<(), RadioError> {
        Ok(())
    }

    fn configure_sta(&self, config: &StaDriverConfig) -> Result<(), RadioError> {
        *self.sta.lock().unwrap() = Some(config.clone());
        Ok(())
    }

    fn connect(&self) -> Result<(), RadioError> {
        let sta = self.sta.lock().unwrap().clone().expect("sta configured");
        let known = Self::networks().iter().any(|n| n.ssid == sta.ssid);
        let outcome = if known && sta.password == JOIN_PASSWORD {
            WifiManagerMsg::StaGotIp(STA_IP)
        } else {
            // 4WAY_HANDSHAKE_TIMEOUT / NO_AP_FOUND territory.
            WifiManagerMsg::StaDisconnected(if known { 15 } else { 201 })
        };
        self.post_later(Duration::from_millis(50), outcome);
        Ok(())
    }

    fn disconnect(&self) -> Result<(), RadioError> {
        self.post_later(Duration::from_millis(10), WifiManagerMsg::StaDisconnected(8));
        Ok(())
    }

    fn scan_start(&self, params: &ScanParams) -> Result<(), RadioError> {
        *self.last_channel.lock().unwrap() = Some(params.channel);
        self.post_later(Duration::from_millis(5), WifiManagerMsg::ScanDone);
        Ok(())
    }

    fn scan_stop(&self) -> Result<(), RadioError> {
        self.post_later(Duration::from_millis(1), WifiManagerMsg::ScanDone);
        Ok(())
    }

    fn scan_records(&self, max: usize) -> Result<Vec<AccessPoint>, RadioError> {
        let channel = self.last_channel.lock().unwrap().take();
        Ok(Self::networks()
            .into_iter()
            .filter(|n| Some(n.channel) == channel)
            .take(max)
            .collect())
    }

    fn country(&self) -> Result<Country, RadioError> {
        Ok(Country {
            first_chan: 1,
            num_chans: 2,
        })
    }

    fn sta_netif_info(&self) -> Result<NetifInfo, RadioError> {
        Ok(NetifInfo {
            ip: STA_IP,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gw: Ipv4Addr::new(192, 168, 7, 1),
            dhcp_server: Some(Ipv4Addr::new(192, 168, 7, 1)),
        })
    }
}

fn free_port() -> u16 {
    let probe = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    probe.local_addr().unwrap().port()
}

fn boot(lan_auth: LanAuthConfig) -> (Arc<Core>, u16) {
    let port = free_port();
    let config = Config {
        ap_ssid: "RuuviGatewayEEFF".to_string(),
        http_port: port,
        dns_port: 0,
        scan_channel_delay_ms: 1,
        lan_auth,
        ..Config::default()
    };
    let radio = Arc::new(ScriptedRadio::new());
    let core = Arc::new(Core::new(
        config,
        Arc::clone(&radio) as Arc<dyn RadioDriver>,
        Arc::new(InMemoryNvs::default()),
    ));
    radio.set_sink(core.event_sink());
    core.start().unwrap();
    (core, port)
}

/// Fire one request and return the raw response text.
fn http(port: u16, request: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut stream = loop {
        match TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
            Ok(stream) => break stream,
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10))
            }
            Err(e) => panic!("server never came up: {e}"),
        }
    };
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    stream.write_all(request.as_bytes()).unwrap();
    let mut reply = String::new();
    stream.read_to_string(&mut reply).unwrap();
    reply
}

fn body_of(response: &str) -> &str {
    response
        .split_once("\r\n\r\n")
        .map(|(_, body)| body)
        .unwrap_or("")
}

fn header_value<'a>(response: &'a str, name: &str) -> Option<&'a str> {
    response.lines().find_map(|line| {
        line.strip_prefix(name)
            .map(|value| value.trim_start_matches(' ').trim_end())
    })
}

fn extract_quoted<'a>(haystack: &'a str, key: &str) -> &'a str {
    let start = haystack.find(key).expect("token present") + key.len();
    let end = haystack[start..].find('"').unwrap() + start;
    &haystack[start..end]
}

fn wait_for_status(port: u16, predicate: impl Fn(&str) -> bool, what: &str) -> String {
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let reply = http(port, "GET /status.json HTTP/1.1\r\nHost: 10.10.0.1\r\n\r\n");
        let body = body_of(&reply).to_string();
        if predicate(&body) {
            return body;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}; last: {body}");
        std::thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn provisioning_happy_path() {
    let (core, port) = boot(LanAuthConfig::default());

    // Fresh boot: no saved network, nothing to report.
    let status = wait_for_status(port, |body| body == "{}\n", "empty status");
    assert_eq!(status, "{}\n");

    // The scan surfaces the neighborhood, deduplicated and sorted.
    let reply = http(port, "GET /ap.json HTTP/1.1\r\nHost: 10.10.0.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(reply.contains("Cache-Control: no-store, no-cache, must-revalidate, max-age=0"));
    let body = body_of(&reply);
    assert!(body.contains("{\"ssid\":\"HomeNet\",\"chan\":1,\"rssi\":-48,\"auth\":3}"));
    assert!(body.contains("\"ssid\":\"CoffeeShop\""));

    // The user picks HomeNet.
    let reply = http(
        port,
        "POST /connect.json HTTP/1.1\r\nHost: 10.10.0.1\r\n\
         X-Custom-ssid: HomeNet\r\nX-Custom-pwd: secret123\r\n\r\n",
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
    assert_eq!(body_of(&reply), "{}");

    // The driver associates and the status fills in.
    let status = wait_for_status(port, |body| body.contains("\"urc\":0"), "connection");
    assert!(status.contains("\"ssid\":\"HomeNet\""));
    assert!(status.contains("\"ip\":\"192.168.7.42\""));
    assert!(status.contains("\"netmask\":\"255.255.255.0\""));
    assert!(status.contains("\"gw\":\"192.168.7.1\""));
    assert!(status.contains("\"dhcp\":\"192.168.7.1\""));

    // Credentials survived to the store.
    let saved = core.sta_config_snapshot();
    assert_eq!(saved.creds.ssid(), "HomeNet");

    core.stop_and_destroy();
}

#[test]
fn wrong_password_surfaces_a_failed_attempt() {
    let (core, port) = boot(LanAuthConfig::default());

    let reply = http(
        port,
        "POST /connect.json HTTP/1.1\r\nHost: 10.10.0.1\r\n\
         X-Custom-ssid: HomeNet\r\nX-Custom-pwd: wrong\r\n\r\n",
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));

    // No auto-retry: the failure is reported and the machine waits for the
    // user.
    let status = wait_for_status(port, |body| body.contains("\"urc\":1"), "failed attempt");
    assert!(status.contains("\"ssid\":\"HomeNet\""));
    assert!(status.contains("\"ip\":\"\""));

    core.stop_and_destroy();
}

#[test]
fn ruuvi_login_over_http() {
    let user = "user1";
    let plaintext = "qwe";
    let stored_pass = hex::encode(Md5::digest(
        format!("{user}:RuuviGatewayEEFF:{plaintext}").as_bytes(),
    ));
    let (core, port) = boot(LanAuthConfig {
        auth_type: LanAuthType::Ruuvi,
        user: user.to_string(),
        pass: stored_pass.clone(),
    });

    // First contact: 401 with a challenge and a session cookie.
    let reply = http(port, "GET /auth HTTP/1.1\r\nHost: 10.10.0.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
    let www = header_value(&reply, "WWW-Authenticate:").expect("challenge header");
    assert!(www.starts_with("x-ruuvi-interactive realm=\"RuuviGatewayEEFF\""));
    let challenge = extract_quoted(www, "challenge=\"");
    let session_id = extract_quoted(www, "session_id=\"");
    let expected_cookie = format!("RUUVISESSION={session_id}");
    assert_eq!(
        header_value(&reply, "Set-Cookie:"),
        Some(expected_cookie.as_str()),
        "session cookie must match the advertised id"
    );
    assert!(body_of(&reply).contains("\"lan_auth_type\": \"lan_auth_ruuvi\""));

    // Answer the challenge.
    let password = hex::encode(Sha256::digest(format!("{challenge}:{stored_pass}").as_bytes()));
    let body = format!("{{\"login\":\"{user}\",\"password\":\"{password}\"}}");
    let reply = http(
        port,
        &format!(
            "POST /auth HTTP/1.1\r\nHost: 10.10.0.1\r\n\
             Cookie: RUUVISESSION={session_id}\r\n\
             Content-Length: {}\r\n\r\n{body}",
            body.len()
        ),
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"), "login failed: {reply}");
    assert_eq!(body_of(&reply), "{}");

    // The cookie now opens the JSON API.
    let reply = http(
        port,
        &format!(
            "GET /status.json HTTP/1.1\r\nHost: 10.10.0.1\r\n\
             Cookie: RUUVISESSION={session_id}\r\n\r\n"
        ),
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));

    // Without it, HTML is bounced to the login page with a return-URL
    // cookie.
    let reply = http(port, "GET /index.html HTTP/1.1\r\nHost: 10.10.0.1\r\n\r\n");
    assert!(reply.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(reply.contains("Location: http://127.0.0.1/auth.html\r\n"));
    assert!(reply.contains("Set-Cookie: RUUVI_PREV_URL=/index.html\r\n"));

    // Logout invalidates the session; the next probe gets a new challenge.
    let reply = http(
        port,
        &format!(
            "DELETE /auth HTTP/1.1\r\nHost: 10.10.0.1\r\n\
             Cookie: RUUVISESSION={session_id}\r\n\r\n"
        ),
    );
    assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));

    let reply = http(
        port,
        &format!(
            "GET /auth HTTP/1.1\r\nHost: 10.10.0.1\r\n\
             Cookie: RUUVISESSION={session_id}\r\n\r\n"
        ),
    );
    assert!(reply.starts_with("HTTP/1.1 401 Unauthorized\r\n"));
    let www = header_value(&reply, "WWW-Authenticate:").unwrap();
    assert_ne!(extract_quoted(www, "session_id=\""), session_id);

    core.stop_and_destroy();
}

#[test]
fn captive_probe_is_redirected_while_provisioning() {
    let (core, port) = boot(LanAuthConfig::default());

    let reply = http(
        port,
        "GET /hotspot-detect.html HTTP/1.1\r\nHost: captive.apple.com\r\n\r\n",
    );
    assert!(reply.starts_with("HTTP/1.1 302 Found\r\n"));
    assert_eq!(header_value(&reply, "Location:"), Some("http://10.10.0.1/"));

    core.stop_and_destroy();
}
