//! LAN authentication subsystem.
//!
//! Five modes share one response envelope and one decision entry point.
//! `allow` and `deny` are unconditional; `basic` and `digest` are the
//! standard HTTP schemes; `ruuvi` is an interactive challenge-response
//! scheme carried by the `RUUVISESSION` cookie. Requests that did not come
//! in over the LAN-facing interface are trusted outright.
//!
//! All mutation happens from the HTTP task; the mutexes document that
//! single-writer discipline rather than arbitrating real contention.

use std::str::FromStr;
use std::sync::Mutex;

use log::{debug, info, warn};
use md5::Md5;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::http_req::HeaderBlock;
use crate::http_resp::HttpResponse;
use crate::json;

/// Length of a ruuvi session id (uppercase ASCII letters).
pub const SESSION_ID_LEN: usize = 16;

/// Size of the authorized-session table. Oldest entries are shifted out.
pub const MAX_AUTHORIZED_SESSIONS: usize = 4;

pub const SESSION_COOKIE: &str = "RUUVISESSION";
pub const PREV_URL_COOKIE: &str = "RUUVI_PREV_URL";

/// The configured authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanAuthType {
    #[default]
    Allow,
    Basic,
    Digest,
    Ruuvi,
    Deny,
}

impl LanAuthType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "lan_auth_allow",
            Self::Basic => "lan_auth_basic",
            Self::Digest => "lan_auth_digest",
            Self::Ruuvi => "lan_auth_ruuvi",
            Self::Deny => "lan_auth_deny",
        }
    }
}

#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("unknown LAN auth type")]
pub struct UnknownAuthType;

impl FromStr for LanAuthType {
    type Err = UnknownAuthType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lan_auth_allow" => Ok(Self::Allow),
            "lan_auth_basic" => Ok(Self::Basic),
            "lan_auth_digest" => Ok(Self::Digest),
            "lan_auth_ruuvi" => Ok(Self::Ruuvi),
            "lan_auth_deny" => Ok(Self::Deny),
            _ => Err(UnknownAuthType),
        }
    }
}

/// Mode plus credentials. `pass` stores a mode-specific pre-image:
/// base64(`user:plaintext`) for `basic`, MD5(`user:realm:plaintext`) hex for
/// `digest` and `ruuvi`.
#[derive(Debug, Clone, Default)]
pub struct LanAuthConfig {
    pub auth_type: LanAuthType,
    pub user: String,
    pub pass: String,
}

/// One authorized browser session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub session_id: String,
    pub remote_ip: String,
}

/// The transient challenge issued with the last ruuvi 401. Only the most
/// recent one is valid.
#[derive(Debug, Clone)]
struct LoginSession {
    challenge: String,
    session_id: String,
    remote_ip: String,
}

#[derive(Default)]
struct RuuviTable {
    login: Option<LoginSession>,
    authorized: [Option<AuthSession>; MAX_AUTHORIZED_SESSIONS],
}

impl RuuviTable {
    fn find(&self, session_id: &str, remote_ip: &str) -> Option<usize> {
        self.authorized.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|s| s.session_id == session_id && s.remote_ip == remote_ip)
        })
    }

    /// Insert at the front, shifting the rest right; the oldest entry falls
    /// off the end.
    fn insert_front(&mut self, session: AuthSession) {
        self.authorized.rotate_right(1);
        self.authorized[0] = Some(session);
    }
}

#[derive(Deserialize)]
struct RuuviLoginBody {
    login: String,
    password: String,
}

pub(crate) fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn auth_json(success: bool, gateway_name: &str, auth_type: LanAuthType) -> String {
    format!(
        "{{\"success\": {}, \"gateway_name\": {}, \"lan_auth_type\": \"{}\"}}",
        success,
        json::escape(gateway_name),
        auth_type.as_str()
    )
}

/// The eight-or-nine token payload of a `Digest` Authorization header.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DigestAuthRequest {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub uri: String,
    pub response: String,
    pub opaque: String,
    pub qop: String,
    pub nc: String,
    pub cnonce: String,
}

fn token_between<'a>(s: &'a str, prefix: &str, suffix: &str) -> Option<&'a str> {
    let start = s.find(prefix)? + prefix.len();
    let end = s[start..].find(suffix)? + start;
    Some(&s[start..end])
}

impl DigestAuthRequest {
    /// Parse an `Authorization: Digest …` value. Any missing token rejects
    /// the whole header.
    pub fn parse(authorization: &str) -> Option<Self> {
        if !authorization.starts_with("Digest ") {
            return None;
        }
        Some(Self {
            username: token_between(authorization, "username=\"", "\"")?.to_string(),
            realm: token_between(authorization, "realm=\"", "\"")?.to_string(),
            nonce: token_between(authorization, "nonce=\"", "\"")?.to_string(),
            uri: token_between(authorization, "uri=\"", "\"")?.to_string(),
            qop: token_between(authorization, "qop=", ",")?.to_string(),
            nc: token_between(authorization, "nc=", ",")?.to_string(),
            cnonce: token_between(authorization, "cnonce=\"", "\"")?.to_string(),
            response: token_between(authorization, "response=\"", "\"")?.to_string(),
            opaque: token_between(authorization, "opaque=\"", "\"")?.to_string(),
        })
    }
}

/// Authentication state and handlers.
pub struct LanAuth {
    info: Mutex<LanAuthConfig>,
    ruuvi: Mutex<RuuviTable>,
    rng: Mutex<Box<dyn RngCore + Send>>,
}

impl LanAuth {
    pub fn new(config: LanAuthConfig) -> Self {
        Self {
            info: Mutex::new(config),
            ruuvi: Mutex::new(RuuviTable::default()),
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
        }
    }

    /// Swap the random source; tests install a seeded generator to get a
    /// reproducible challenge/session-id stream.
    pub fn set_rng(&self, rng: Box<dyn RngCore + Send>) {
        *self.rng.lock().unwrap() = rng;
    }

    /// Reconfigure mode and credentials; wipes all sessions.
    pub fn set_auth(&self, config: LanAuthConfig) {
        info!("LAN auth set to {}", config.auth_type.as_str());
        *self.info.lock().unwrap() = config;
        *self.ruuvi.lock().unwrap() = RuuviTable::default();
    }

    pub fn auth_type(&self) -> LanAuthType {
        self.info.lock().unwrap().auth_type
    }

    /// Snapshot of the authorized sessions, newest first. Test hook.
    pub fn authorized_sessions(&self) -> Vec<AuthSession> {
        self.ruuvi
            .lock()
            .unwrap()
            .authorized
            .iter()
            .filter_map(|slot| slot.clone())
            .collect()
    }

    fn ok_resp(&self, ap_ssid: &str, auth_type: LanAuthType) -> HttpResponse {
        HttpResponse::ok_json(auth_json(true, ap_ssid, auth_type))
    }

    /// `GET /auth`: verify, or issue the mode's challenge.
    pub fn handle_get_auth(
        &self,
        flag_access_from_lan: bool,
        header: &HeaderBlock<'_>,
        remote_ip: &str,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        if !flag_access_from_lan {
            return self.ok_resp(ap_ssid, LanAuthType::Allow);
        }
        let info = self.info.lock().unwrap().clone();
        match info.auth_type {
            LanAuthType::Allow => self.ok_resp(ap_ssid, LanAuthType::Allow),
            LanAuthType::Basic => self.get_auth_basic(&info, header, ap_ssid, extra),
            LanAuthType::Digest => self.get_auth_digest(&info, header, ap_ssid, extra),
            LanAuthType::Ruuvi => self.get_auth_ruuvi(header, remote_ip, ap_ssid, extra),
            LanAuthType::Deny => self.resp_403_deny(ap_ssid),
        }
    }

    /// Gate an ordinary resource request. Same verification as
    /// [`Self::handle_get_auth`], except a failed ruuvi lookup does not mint
    /// a fresh challenge: an asset fetch must not clobber the login session
    /// a browser is in the middle of answering.
    pub fn check_auth(
        &self,
        flag_access_from_lan: bool,
        header: &HeaderBlock<'_>,
        remote_ip: &str,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        if !flag_access_from_lan {
            return self.ok_resp(ap_ssid, LanAuthType::Allow);
        }
        let info = self.info.lock().unwrap().clone();
        match info.auth_type {
            LanAuthType::Allow => self.ok_resp(ap_ssid, LanAuthType::Allow),
            LanAuthType::Basic => self.get_auth_basic(&info, header, ap_ssid, extra),
            LanAuthType::Digest => self.get_auth_digest(&info, header, ap_ssid, extra),
            LanAuthType::Ruuvi => {
                let authorized = header
                    .cookie(SESSION_COOKIE)
                    .map(|sid| self.ruuvi.lock().unwrap().find(&sid, remote_ip).is_some())
                    .unwrap_or(false);
                if authorized {
                    self.ok_resp(ap_ssid, LanAuthType::Ruuvi)
                } else {
                    HttpResponse::json_with_code(
                        401,
                        auth_json(false, ap_ssid, LanAuthType::Ruuvi),
                    )
                }
            }
            LanAuthType::Deny => self.resp_403_deny(ap_ssid),
        }
    }

    fn get_auth_basic(
        &self,
        info: &LanAuthConfig,
        header: &HeaderBlock<'_>,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        let Some(authorization) = header.field("Authorization:") else {
            return self.resp_401_basic(ap_ssid, extra);
        };
        let Some(token) = authorization.strip_prefix("Basic ") else {
            return self.resp_401_basic(ap_ssid, extra);
        };
        if !constant_time_eq(token.as_bytes(), info.pass.as_bytes()) {
            return self.resp_401_basic(ap_ssid, extra);
        }
        self.ok_resp(ap_ssid, LanAuthType::Basic)
    }

    fn resp_401_basic(&self, ap_ssid: &str, extra: &mut String) -> HttpResponse {
        extra.push_str(&format!(
            "WWW-Authenticate: Basic realm=\"{ap_ssid}\", charset=\"UTF-8\"\r\n"
        ));
        HttpResponse::json_with_code(401, auth_json(false, ap_ssid, LanAuthType::Basic))
    }

    fn get_auth_digest(
        &self,
        info: &LanAuthConfig,
        header: &HeaderBlock<'_>,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        let Some(authorization) = header.field("Authorization:") else {
            return self.resp_401_digest(ap_ssid, extra);
        };
        let Some(req) = DigestAuthRequest::parse(authorization) else {
            debug!("digest authorization header does not parse");
            return self.resp_401_digest(ap_ssid, extra);
        };
        if req.username != info.user {
            return self.resp_401_digest(ap_ssid, extra);
        }

        let ha2 = md5_hex(format!("GET:{}", req.uri).as_bytes());
        let expected = md5_hex(
            format!(
                "{}:{}:{}:{}:{}:{}",
                info.pass, req.nonce, req.nc, req.cnonce, req.qop, ha2
            )
            .as_bytes(),
        );
        if !constant_time_eq(expected.as_bytes(), req.response.as_bytes()) {
            return self.resp_401_digest(ap_ssid, extra);
        }
        self.ok_resp(ap_ssid, LanAuthType::Digest)
    }

    fn resp_401_digest(&self, ap_ssid: &str, extra: &mut String) -> HttpResponse {
        let nonce = {
            let mut rng = self.rng.lock().unwrap();
            let mut random = [0u8; 32];
            rng.fill_bytes(&mut random);
            sha256_hex(&random)
        };
        let opaque = sha256_hex(ap_ssid.as_bytes());
        extra.push_str(&format!(
            "WWW-Authenticate: Digest realm=\"{ap_ssid}\" qop=\"auth\" nonce=\"{nonce}\" opaque=\"{opaque}\"\r\n"
        ));
        HttpResponse::json_with_code(401, auth_json(false, ap_ssid, LanAuthType::Digest))
    }

    fn get_auth_ruuvi(
        &self,
        header: &HeaderBlock<'_>,
        remote_ip: &str,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        let Some(session_id) = header.cookie(SESSION_COOKIE) else {
            return self.resp_401_ruuvi(remote_ip, ap_ssid, extra);
        };
        if self.ruuvi.lock().unwrap().find(&session_id, remote_ip).is_none() {
            return self.resp_401_ruuvi(remote_ip, ap_ssid, extra);
        }
        self.ok_resp(ap_ssid, LanAuthType::Ruuvi)
    }

    /// Issue a fresh challenge + session id, replacing any pending login
    /// session.
    fn resp_401_ruuvi(&self, remote_ip: &str, ap_ssid: &str, extra: &mut String) -> HttpResponse {
        let (challenge, session_id) = {
            let mut rng = self.rng.lock().unwrap();
            let mut random = [0u8; 32];
            rng.fill_bytes(&mut random);
            let challenge = sha256_hex(&random);
            let session_id: String = (0..SESSION_ID_LEN)
                .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
                .collect();
            (challenge, session_id)
        };

        self.ruuvi.lock().unwrap().login = Some(LoginSession {
            challenge: challenge.clone(),
            session_id: session_id.clone(),
            remote_ip: remote_ip.to_string(),
        });

        extra.push_str(&format!(
            "WWW-Authenticate: x-ruuvi-interactive realm=\"{ap_ssid}\" challenge=\"{challenge}\" \
             session_cookie=\"{SESSION_COOKIE}\" session_id=\"{session_id}\"\r\n\
             Set-Cookie: {SESSION_COOKIE}={session_id}\r\n"
        ));
        HttpResponse::json_with_code(401, auth_json(false, ap_ssid, LanAuthType::Ruuvi))
    }

    fn resp_403_deny(&self, ap_ssid: &str) -> HttpResponse {
        HttpResponse::json_with_code(403, auth_json(false, ap_ssid, LanAuthType::Deny))
    }

    /// `POST /auth`: answer to the ruuvi challenge.
    pub fn handle_post_auth(
        &self,
        flag_access_from_lan: bool,
        header: &HeaderBlock<'_>,
        remote_ip: &str,
        body: &str,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        if !flag_access_from_lan {
            return HttpResponse::ok_json("{}".to_string());
        }
        let info = self.info.lock().unwrap().clone();
        if info.auth_type != LanAuthType::Ruuvi {
            return HttpResponse::service_unavailable();
        }

        let Some(session_id) = header.cookie(SESSION_COOKIE) else {
            return self.resp_401_ruuvi(remote_ip, ap_ssid, extra);
        };
        let prev_url = header.cookie(PREV_URL_COOKIE);

        let accepted = {
            let mut table = self.ruuvi.lock().unwrap();
            let verified = match &table.login {
                Some(login) if login.session_id == session_id && login.remote_ip == remote_ip => {
                    match serde_json::from_str::<RuuviLoginBody>(body) {
                        Ok(req) if !req.login.is_empty() && req.login == info.user => {
                            let expected = sha256_hex(
                                format!("{}:{}", login.challenge, info.pass).as_bytes(),
                            );
                            constant_time_eq(expected.as_bytes(), req.password.as_bytes())
                        }
                        Ok(_) => false,
                        Err(e) => {
                            debug!("login body does not parse: {e}");
                            false
                        }
                    }
                }
                _ => false,
            };
            if verified {
                table.insert_front(AuthSession {
                    session_id: session_id.clone(),
                    remote_ip: remote_ip.to_string(),
                });
                table.login = None;
            }
            verified
        };

        if !accepted {
            warn!("login attempt from {remote_ip} rejected");
            return self.resp_401_ruuvi(remote_ip, ap_ssid, extra);
        }

        info!("login from {remote_ip} accepted, session {session_id}");
        if let Some(url) = prev_url {
            extra.push_str(&format!(
                "Ruuvi-prev-url: {url}\r\n\
                 Set-Cookie: {PREV_URL_COOKIE}=; Max-Age=-1; Expires=Thu, 01 Jan 1970 00:00:00 GMT\r\n"
            ));
        }
        HttpResponse::ok_json("{}".to_string())
    }

    /// `DELETE /auth`: log the session out.
    pub fn handle_delete_auth(
        &self,
        header: &HeaderBlock<'_>,
        remote_ip: &str,
        ap_ssid: &str,
        extra: &mut String,
    ) -> HttpResponse {
        if self.auth_type() != LanAuthType::Ruuvi {
            return HttpResponse::service_unavailable();
        }
        let Some(session_id) = header.cookie(SESSION_COOKIE) else {
            return self.resp_401_ruuvi(remote_ip, ap_ssid, extra);
        };
        let mut table = self.ruuvi.lock().unwrap();
        match table.find(&session_id, remote_ip) {
            Some(index) => {
                table.authorized[index] = None;
                info!("session {session_id} logged out");
                HttpResponse::ok_json("{}".to_string())
            }
            None => {
                drop(table);
                self.resp_401_ruuvi(remote_ip, ap_ssid, extra)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AP_SSID: &str = "RuuviGatewayEEFF";
    const REMOTE_IP: &str = "192.168.1.10";

    fn ruuvi_auth(user: &str, plaintext: &str) -> LanAuth {
        let pass = md5_hex(format!("{user}:{AP_SSID}:{plaintext}").as_bytes());
        let auth = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Ruuvi,
            user: user.to_string(),
            pass,
        });
        auth.set_rng(Box::new(StdRng::seed_from_u64(42)));
        auth
    }

    fn extract_quoted(extra: &str, key: &str) -> String {
        let start = extra.find(key).unwrap() + key.len();
        let end = extra[start..].find('"').unwrap() + start;
        extra[start..end].to_string()
    }

    fn body_of(resp: &HttpResponse) -> String {
        String::from_utf8(resp.body.clone().unwrap().into_owned()).unwrap()
    }

    /// Run the full challenge/response for one simulated client and return
    /// its session id.
    fn login(auth: &LanAuth, user: &str, plaintext: &str, remote_ip: &str) -> String {
        let mut extra = String::new();
        let no_cookie = HeaderBlock("");
        let resp = auth.handle_get_auth(true, &no_cookie, remote_ip, AP_SSID, &mut extra);
        assert_eq!(resp.code, 401);

        let challenge = extract_quoted(&extra, "challenge=\"");
        let session_id = extract_quoted(&extra, "session_id=\"");
        assert_eq!(session_id.len(), SESSION_ID_LEN);
        assert!(session_id.chars().all(|c| c.is_ascii_uppercase()));

        let stored_pass = md5_hex(format!("{user}:{AP_SSID}:{plaintext}").as_bytes());
        let password = sha256_hex(format!("{challenge}:{stored_pass}").as_bytes());
        let body = format!("{{\"login\":\"{user}\",\"password\":\"{password}\"}}");
        let cookie_line = format!("Cookie: {SESSION_COOKIE}={session_id}\r\n");

        let mut extra = String::new();
        let resp = auth.handle_post_auth(
            true,
            &HeaderBlock(&cookie_line),
            remote_ip,
            &body,
            AP_SSID,
            &mut extra,
        );
        assert_eq!(resp.code, 200, "login failed: {}", body_of(&resp));
        session_id
    }

    #[test]
    fn off_lan_requests_are_trusted() {
        let auth = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Deny,
            ..Default::default()
        });
        let mut extra = String::new();
        let resp = auth.handle_get_auth(false, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);
    }

    #[test]
    fn allow_and_deny_envelopes() {
        let allow = LanAuth::new(LanAuthConfig::default());
        let mut extra = String::new();
        let resp = allow.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);
        assert_eq!(
            body_of(&resp),
            "{\"success\": true, \"gateway_name\": \"RuuviGatewayEEFF\", \
             \"lan_auth_type\": \"lan_auth_allow\"}"
        );

        let deny = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Deny,
            ..Default::default()
        });
        let resp = deny.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 403);
        assert!(body_of(&resp).contains("\"lan_auth_type\": \"lan_auth_deny\""));
    }

    #[test]
    fn basic_auth_accepts_the_exact_token() {
        let auth = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Basic,
            user: "user1".to_string(),
            pass: "dXNlcjE6cGFzczE=".to_string(),
        });

        let mut extra = String::new();
        let header = HeaderBlock("Authorization: Basic dXNlcjE6cGFzczE=\r\n");
        let resp = auth.handle_get_auth(true, &header, REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);

        let mut extra = String::new();
        let header = HeaderBlock("Authorization: Basic d3Jvbmc=\r\n");
        let resp = auth.handle_get_auth(true, &header, REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 401);
        assert_eq!(
            extra,
            "WWW-Authenticate: Basic realm=\"RuuviGatewayEEFF\", charset=\"UTF-8\"\r\n"
        );
    }

    #[test]
    fn digest_challenge_carries_nonce_and_opaque() {
        let auth = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Digest,
            user: "user1".to_string(),
            pass: md5_hex(format!("user1:{AP_SSID}:qwe").as_bytes()),
        });
        auth.set_rng(Box::new(StdRng::seed_from_u64(7)));

        let mut extra = String::new();
        let resp = auth.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 401);
        let nonce = extract_quoted(&extra, "nonce=\"");
        assert_eq!(nonce.len(), 64);
        let opaque = extract_quoted(&extra, "opaque=\"");
        assert_eq!(opaque, sha256_hex(AP_SSID.as_bytes()));
        assert!(extra.contains("qop=\"auth\""));
    }

    #[test]
    fn digest_round_trip_verifies() {
        let stored = md5_hex(format!("user1:{AP_SSID}:qwe").as_bytes());
        let auth = LanAuth::new(LanAuthConfig {
            auth_type: LanAuthType::Digest,
            user: "user1".to_string(),
            pass: stored.clone(),
        });

        let nonce = "9689933745abb987e2cfae61d46f50c9";
        let cnonce = "3e48baed2616a1e9";
        let ha2 = md5_hex(b"GET:/auth");
        let response = md5_hex(format!("{stored}:{nonce}:00000001:{cnonce}:auth:{ha2}").as_bytes());
        let header_str = format!(
            "Authorization: Digest username=\"user1\", realm=\"{AP_SSID}\", nonce=\"{nonce}\", \
             uri=\"/auth\", response=\"{response}\", opaque=\"x\", qop=auth, nc=00000001, \
             cnonce=\"{cnonce}\"\r\n"
        );
        let mut extra = String::new();
        let resp = auth.handle_get_auth(true, &HeaderBlock(&header_str), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);

        // Tampered response hash is rejected.
        let bad = header_str.replace(&response, &md5_hex(b"bogus"));
        let resp = auth.handle_get_auth(true, &HeaderBlock(&bad), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 401);
    }

    #[test]
    fn digest_parse_requires_every_token() {
        let full = "Digest username=\"u\", realm=\"r\", nonce=\"n\", uri=\"/\", \
                    response=\"x\", opaque=\"o\", qop=auth, nc=00000001, cnonce=\"c\"";
        assert!(DigestAuthRequest::parse(full).is_some());
        for token in [
            "username=\"u\", ",
            "realm=\"r\", ",
            "nonce=\"n\", ",
            "uri=\"/\", ",
            "response=\"x\", ",
            "qop=auth, ",
            "nc=00000001, ",
            "cnonce=\"c\"",
        ] {
            let broken = full.replace(token, "");
            assert!(
                DigestAuthRequest::parse(&broken).is_none(),
                "parse accepted a header missing {token:?}"
            );
        }
        assert!(DigestAuthRequest::parse("Basic abc").is_none());
    }

    #[test]
    fn ruuvi_login_round_trip() {
        let auth = ruuvi_auth("user1", "qwe");
        let session_id = login(&auth, "user1", "qwe", REMOTE_IP);

        // The cookie now authorizes GETs.
        let cookie_line = format!("Cookie: {SESSION_COOKIE}={session_id}\r\n");
        let mut extra = String::new();
        let resp = auth.handle_get_auth(true, &HeaderBlock(&cookie_line), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);
        assert!(body_of(&resp).contains("\"success\": true"));

        // Logout invalidates it; the next GET gets a fresh challenge.
        let mut extra = String::new();
        let resp = auth.handle_delete_auth(&HeaderBlock(&cookie_line), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 200);

        let mut extra = String::new();
        let resp = auth.handle_get_auth(true, &HeaderBlock(&cookie_line), REMOTE_IP, AP_SSID, &mut extra);
        assert_eq!(resp.code, 401);
        let new_session = extract_quoted(&extra, "session_id=\"");
        assert_ne!(new_session, session_id);
    }

    #[test]
    fn ruuvi_rejects_wrong_ip_and_stale_session() {
        let auth = ruuvi_auth("user1", "qwe");
        let session_id = login(&auth, "user1", "qwe", REMOTE_IP);
        let cookie_line = format!("Cookie: {SESSION_COOKIE}={session_id}\r\n");

        // Same cookie from another address is not authorized.
        let mut extra = String::new();
        let resp = auth.handle_get_auth(
            true,
            &HeaderBlock(&cookie_line),
            "192.168.1.99",
            AP_SSID,
            &mut extra,
        );
        assert_eq!(resp.code, 401);

        // A POST replaying an old session id fails and re-challenges.
        let mut extra = String::new();
        let resp = auth.handle_post_auth(
            true,
            &HeaderBlock("Cookie: RUUVISESSION=AAAAAAAAAAAAAAAA\r\n"),
            REMOTE_IP,
            "{\"login\":\"user1\",\"password\":\"x\"}",
            AP_SSID,
            &mut extra,
        );
        assert_eq!(resp.code, 401);
        assert!(extra.contains("challenge=\""));
    }

    #[test]
    fn ruuvi_wrong_password_is_rejected() {
        let auth = ruuvi_auth("user1", "qwe");
        let mut extra = String::new();
        auth.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        let session_id = extract_quoted(&extra, "session_id=\"");
        let cookie_line = format!("Cookie: {SESSION_COOKIE}={session_id}\r\n");

        let mut extra = String::new();
        let resp = auth.handle_post_auth(
            true,
            &HeaderBlock(&cookie_line),
            REMOTE_IP,
            "{\"login\":\"user1\",\"password\":\"deadbeef\"}",
            AP_SSID,
            &mut extra,
        );
        assert_eq!(resp.code, 401);
        assert!(auth.authorized_sessions().is_empty());
    }

    #[test]
    fn prev_url_cookie_is_echoed_and_expired_on_login() {
        let auth = ruuvi_auth("user1", "qwe");
        let mut extra = String::new();
        auth.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
        let challenge = extract_quoted(&extra, "challenge=\"");
        let session_id = extract_quoted(&extra, "session_id=\"");

        let stored = md5_hex(format!("user1:{AP_SSID}:qwe").as_bytes());
        let password = sha256_hex(format!("{challenge}:{stored}").as_bytes());
        let header_str = format!(
            "Cookie: {SESSION_COOKIE}={session_id}; {PREV_URL_COOKIE}=/settings.html\r\n"
        );

        let mut extra = String::new();
        let resp = auth.handle_post_auth(
            true,
            &HeaderBlock(&header_str),
            REMOTE_IP,
            &format!("{{\"login\":\"user1\",\"password\":\"{password}\"}}"),
            AP_SSID,
            &mut extra,
        );
        assert_eq!(resp.code, 200);
        assert!(extra.contains("Ruuvi-prev-url: /settings.html\r\n"));
        assert!(extra.contains(
            "Set-Cookie: RUUVI_PREV_URL=; Max-Age=-1; Expires=Thu, 01 Jan 1970 00:00:00 GMT\r\n"
        ));
    }

    #[test]
    fn five_logins_keep_the_last_four_newest_first() {
        let auth = ruuvi_auth("user1", "qwe");
        let mut session_ids = Vec::new();
        for i in 0..5 {
            let remote_ip = format!("192.168.1.{}", 10 + i);
            session_ids.push((login(&auth, "user1", "qwe", &remote_ip), remote_ip));
        }

        let sessions = auth.authorized_sessions();
        assert_eq!(sessions.len(), MAX_AUTHORIZED_SESSIONS);
        for (slot, (session_id, remote_ip)) in sessions.iter().zip(session_ids.iter().rev()) {
            assert_eq!(&slot.session_id, session_id);
            assert_eq!(&slot.remote_ip, remote_ip);
        }
        // The first login was evicted.
        let (first_id, first_ip) = &session_ids[0];
        assert!(sessions
            .iter()
            .all(|s| !(s.session_id == *first_id && s.remote_ip == *first_ip)));
    }

    #[test]
    fn seeded_rng_reproduces_the_challenge_stream() {
        let make = || {
            let auth = ruuvi_auth("user1", "qwe");
            let mut extra = String::new();
            auth.handle_get_auth(true, &HeaderBlock(""), REMOTE_IP, AP_SSID, &mut extra);
            (
                extract_quoted(&extra, "challenge=\""),
                extract_quoted(&extra, "session_id=\""),
            )
        };
        assert_eq!(make(), make());
    }
}
