//! Captive HTTP server: accept loop, request pipeline and router.
//!
//! One task accepts connections on port 80 and serves them inline, one
//! request per connection. Every response funnels through the writer in
//! [`crate::http_resp`]; IO failures abort the request, never the task.
//!
//! Request handling order: parse, captive-portal redirect, then the router
//! (auth endpoints first, auth gating for everything else, JSON API,
//! host callbacks, embedded assets).

use std::io::Read;
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use time::OffsetDateTime;

use crate::auth::{LanAuthType, PREV_URL_COOKIE};
use crate::config::{MAX_PASSWORD_LEN, MAX_SSID_LEN};
use crate::http_req::{self, HeaderBlock, HttpReq, RequestBuf};
use crate::http_resp::{self, HttpResponse};
use crate::manager::WifiManagerMsg;
use crate::net_info::STATUS_LOCK_BUDGET;
use crate::Core;

/// How often the accept loop re-checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-connection receive deadline.
const RECV_TIMEOUT: Duration = Duration::from_millis(1500);

pub(crate) fn http_server_task(core: &Arc<Core>) {
    let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, core.config.http_port)) {
        Ok(listener) => listener,
        Err(e) => {
            error!("HTTP server bind failed: {e}");
            return;
        }
    };
    if let Err(e) = listener.set_nonblocking(true) {
        error!("HTTP server set_nonblocking failed: {e}");
        return;
    }
    info!("HTTP Server listening on {}/tcp", core.config.http_port);

    loop {
        if core.is_shut_down() {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => accept_and_handle(core, stream, peer),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => error!("accept failed: {e}"),
        }
    }
    info!("HTTP server stopped");
}

fn accept_and_handle(core: &Core, mut stream: TcpStream, peer: SocketAddr) {
    // The listener is non-blocking; the connection must not be.
    if let Err(e) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(RECV_TIMEOUT)))
        .and_then(|()| stream.set_write_timeout(Some(http_resp::SEND_TIMEOUT)))
    {
        error!("configuring accepted connection failed: {e}");
        return;
    }

    serve(core, &mut stream, peer);

    if let Err(e) = stream.shutdown(Shutdown::Both) {
        // Already closed by the peer, usually.
        debug!("connection close failed: {e}");
    }
}

/// Process one request on one connection.
fn serve(core: &Core, stream: &mut TcpStream, peer: SocketAddr) {
    let local_ip = match stream.local_addr() {
        Ok(addr) => addr.ip().to_string(),
        Err(e) => {
            // Accept can hand over a connection that died underneath us.
            error!("local_addr failed on accepted connection: {e}");
            return;
        }
    };
    let remote_ip = peer.ip().to_string();

    let mut req_buf = RequestBuf::default();
    let mut chunk = [0u8; 1024];
    let req_ready = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break false,
            Ok(n) => {
                if req_buf.append(&chunk[..n]).is_err() {
                    // Overflow: drop the connection without a reply.
                    return;
                }
                if req_buf.is_ready() {
                    break true;
                }
            }
            Err(e) => {
                warn!("recv failed: {e}");
                break false;
            }
        }
    };
    if !req_ready {
        warn!("The connection was closed by the client side");
        return;
    }

    let ap_ip_str = core.config.ap_ip.to_string();

    let Some(req) = http_req::parse(req_buf.as_bytes()) else {
        warn!("Request from {remote_ip} to {local_ip}: failed to parse request");
        write_resp(stream, &HttpResponse::bad_request(), "", &ap_ip_str, &local_ip);
        return;
    };
    info!("Request from {remote_ip} to {local_ip}: {} {}", req.method, req.uri);

    // Captive portal: anything addressed to a foreign host is herded to the
    // provisioning UI while the manager is up.
    let host = req.header.field("Host:");
    let sta_ip = core.sta_ip.get_string();
    if needs_captive_redirect(core.is_working(), host, &ap_ip_str, sta_ip.as_deref()) {
        write_resp(
            stream,
            &HttpResponse::redirect_captive_portal(),
            "",
            &ap_ip_str,
            &local_ip,
        );
        return;
    }

    let flag_access_from_lan = local_ip != ap_ip_str;
    let mut extra = String::new();
    let resp = handle_req(core, &req, &remote_ip, flag_access_from_lan, &mut extra);
    if !extra.is_empty() {
        info!("Extra HTTP-header resp: {}", extra.trim_end());
    }
    write_resp(stream, &resp, &extra, &ap_ip_str, &local_ip);
}

fn write_resp(
    stream: &mut TcpStream,
    resp: &HttpResponse,
    extra: &str,
    ap_ip: &str,
    local_ip: &str,
) {
    if let Err(e) =
        http_resp::write_response(stream, resp, extra, ap_ip, local_ip, OffsetDateTime::now_utc())
    {
        error!("sending response failed: {e}");
    }
}

/// Decide whether a request must be rerouted to the provisioning UI.
///
/// The station IP only participates when one is actually published;
/// comparing against a placeholder like "0.0.0.0" would false-positive on
/// probes addressed there.
pub(crate) fn needs_captive_redirect(
    is_working: bool,
    host: Option<&str>,
    ap_ip: &str,
    sta_ip: Option<&str>,
) -> bool {
    if !is_working {
        return false;
    }
    let is_request_to_ap = host.is_some_and(|h| h.contains(ap_ip));
    let is_request_to_sta = match (host, sta_ip) {
        (Some(host), Some(sta_ip)) => host.contains(sta_ip),
        _ => false,
    };
    !is_request_to_ap && !is_request_to_sta
}

/// Method/path dispatch after redirect handling.
pub(crate) fn handle_req(
    core: &Core,
    req: &HttpReq<'_>,
    remote_ip: &str,
    flag_access_from_lan: bool,
    extra: &mut String,
) -> HttpResponse {
    let path = req.uri.strip_prefix('/').unwrap_or(req.uri);
    let ap_ssid = core.sta_config_snapshot().settings.ap_ssid;

    match req.method {
        "GET" => handle_get(core, path, &req.header, remote_ip, flag_access_from_lan, &ap_ssid, extra),
        "POST" => handle_post(
            core,
            path,
            &req.header,
            remote_ip,
            flag_access_from_lan,
            req.body,
            &ap_ssid,
            extra,
        ),
        "DELETE" => {
            handle_delete(core, path, &req.header, remote_ip, flag_access_from_lan, &ap_ssid, extra)
        }
        _ => HttpResponse::bad_request(),
    }
}

/// Swap whatever the auth check wrote for the prev-URL cookie and redirect
/// to the login page.
fn redirect_to_login(file_name: &str, extra: &mut String) -> HttpResponse {
    extra.clear();
    extra.push_str(&format!("Set-Cookie: {PREV_URL_COOKIE}=/{file_name}\r\n"));
    HttpResponse::redirect_to_auth_html()
}

fn handle_get(
    core: &Core,
    path: &str,
    header: &HeaderBlock<'_>,
    remote_ip: &str,
    flag_access_from_lan: bool,
    ap_ssid: &str,
    extra: &mut String,
) -> HttpResponse {
    info!("GET /{path}");
    let file_name = if path.is_empty() { "index.html" } else { path };

    if file_name == "auth" || file_name.starts_with("auth?") {
        return core
            .auth
            .handle_get_auth(flag_access_from_lan, header, remote_ip, ap_ssid, extra);
    }

    let auth_check = core
        .auth
        .check_auth(flag_access_from_lan, header, remote_ip, ap_ssid, extra);
    let file_ext = file_name.rsplit_once('.').map(|(_, ext)| ext);

    if matches!(file_ext, Some("html" | "json")) {
        if auth_check.code != 200 && file_name != "auth.html" {
            let auth_type = core.auth.auth_type();
            if auth_type == LanAuthType::Ruuvi || auth_type == LanAuthType::Deny {
                return redirect_to_login(file_name, extra);
            }
            return auth_check;
        }

        if file_name == "ap.json" {
            return match core.scan_sync() {
                Some(json) => {
                    info!("ap.json: {}", json.trim_end());
                    HttpResponse::ok_json(json)
                }
                None => {
                    error!("GET /ap.json: failed to get scan results, return HTTP error 503");
                    HttpResponse::service_unavailable()
                }
            };
        }
        if file_name == "status.json" {
            return match core
                .net_info
                .generate_with_timeout(flag_access_from_lan, STATUS_LOCK_BUDGET)
            {
                Some(json) => {
                    info!("status.json: {}", json.trim_end());
                    HttpResponse::ok_json(json)
                }
                None => {
                    error!("GET /status.json: failed to obtain mutex");
                    HttpResponse::service_unavailable()
                }
            };
        }
    }

    if file_ext.is_none() && auth_check.code != 200 {
        if core.auth.auth_type() == LanAuthType::Ruuvi {
            return redirect_to_login(file_name, extra);
        }
        return auth_check;
    }

    if let Some(resp) = core.callbacks.on_http_get(file_name, flag_access_from_lan) {
        return resp;
    }
    match core.assets.get(file_name) {
        Some(asset) => asset.into_response(),
        None => HttpResponse::not_found(),
    }
}

#[allow(clippy::too_many_arguments)]
fn handle_post(
    core: &Core,
    path: &str,
    header: &HeaderBlock<'_>,
    remote_ip: &str,
    flag_access_from_lan: bool,
    body: &str,
    ap_ssid: &str,
    extra: &mut String,
) -> HttpResponse {
    info!("POST /{path}");

    if path == "auth" {
        return core.auth.handle_post_auth(
            flag_access_from_lan,
            header,
            remote_ip,
            body,
            ap_ssid,
            extra,
        );
    }

    let auth_check = core
        .auth
        .check_auth(flag_access_from_lan, header, remote_ip, ap_ssid, extra);
    if auth_check.code != 200 {
        extra.clear();
        return HttpResponse::redirect_to_auth_html();
    }

    if path == "connect.json" {
        return handle_post_connect_json(core, header);
    }
    core.callbacks
        .on_http_post(path, body, flag_access_from_lan)
        .unwrap_or_else(HttpResponse::not_found)
}

/// `POST /connect.json` carries the target network in two custom headers.
/// Both absent means "use the Ethernet uplink"; SSID without password means
/// "reconnect to the saved network".
fn handle_post_connect_json(core: &Core, header: &HeaderBlock<'_>) -> HttpResponse {
    let ssid = header.field("X-Custom-ssid:");
    let password = header.field("X-Custom-pwd:");

    match (ssid, password) {
        (None, None) => {
            info!("POST /connect.json: SSID:NULL, PWD:NULL - connect to Ethernet");
            core.msg_tx.send(WifiManagerMsg::ConnectEth);
            HttpResponse::ok_json("{}".to_string())
        }
        (Some(ssid), None) if ssid.len() <= MAX_SSID_LEN => {
            let saved = core.sta_config_snapshot().creds;
            if saved.ssid() == ssid {
                info!("POST /connect.json: SSID:{ssid}, PWD: NULL - reconnect to saved WiFi");
            } else {
                warn!(
                    "POST /connect.json: SSID:{ssid}, PWD: NULL - try to reconnect, \
                     but previous SSID={}",
                    saved.ssid()
                );
                if core.set_ssid_and_password(ssid, "").is_err() {
                    return HttpResponse::bad_request();
                }
            }
            core.connect_async();
            HttpResponse::ok_json("{}".to_string())
        }
        (Some(ssid), Some(password))
            if ssid.len() <= MAX_SSID_LEN && password.len() <= MAX_PASSWORD_LEN =>
        {
            info!("POST /connect.json: SSID:{ssid}, PWD: ******** - connect to WiFi");
            if core.set_ssid_and_password(ssid, password).is_err() {
                return HttpResponse::bad_request();
            }
            core.connect_async();
            HttpResponse::ok_json("{}".to_string())
        }
        _ => HttpResponse::bad_request(),
    }
}

fn handle_delete(
    core: &Core,
    path: &str,
    header: &HeaderBlock<'_>,
    remote_ip: &str,
    flag_access_from_lan: bool,
    ap_ssid: &str,
    extra: &mut String,
) -> HttpResponse {
    info!("DELETE /{path}");

    let auth_check = core
        .auth
        .check_auth(flag_access_from_lan, header, remote_ip, ap_ssid, extra);
    if auth_check.code != 200 {
        extra.clear();
        return HttpResponse::redirect_to_auth_html();
    }

    if path == "auth" {
        return core.auth.handle_delete_auth(header, remote_ip, ap_ssid, extra);
    }
    if path == "connect.json" {
        if core.is_connected_to_ethernet() {
            core.msg_tx.send(WifiManagerMsg::DisconnectEth);
        } else {
            // Request a disconnection from wifi and forget about it.
            core.msg_tx.send(WifiManagerMsg::DisconnectSta);
        }
        return HttpResponse::ok_json("{}".to_string());
    }
    core.callbacks
        .on_http_delete(path, flag_access_from_lan)
        .unwrap_or_else(HttpResponse::not_found)
}
