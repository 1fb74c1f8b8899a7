//! HTTP response values and the wire writer.
//!
//! Responses are built as plain values by the router and auth layer, then
//! serialized by one writer. All socket writes go through a deadline-bounded
//! loop; large bodies are streamed in 4 KiB chunks so a slow reader cannot
//! pin a whole asset in one write call.

use std::borrow::Cow;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use log::debug;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

/// Chunk size for streamed bodies.
pub const BODY_CHUNK_SIZE: usize = 4 * 1024;

/// Per-connection send deadline.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    TextHtml,
    TextPlain,
    TextCss,
    TextJavascript,
    ImagePng,
    ImageSvgXml,
    ApplicationJson,
    OctetStream,
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TextHtml => "text/html",
            Self::TextPlain => "text/plain",
            Self::TextCss => "text/css",
            Self::TextJavascript => "text/javascript",
            Self::ImagePng => "image/png",
            Self::ImageSvgXml => "image/svg+xml",
            Self::ApplicationJson => "application/json",
            Self::OctetStream => "application/octet-stream",
        }
    }

    /// Pick a content type from a file extension.
    pub fn from_ext(ext: &str) -> Self {
        match ext {
            "html" | "htm" => Self::TextHtml,
            "css" => Self::TextCss,
            "js" => Self::TextJavascript,
            "json" => Self::ApplicationJson,
            "png" => Self::ImagePng,
            "svg" => Self::ImageSvgXml,
            "txt" => Self::TextPlain,
            _ => Self::OctetStream,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    Identity,
    Gzip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheControl {
    /// No cache header at all.
    Unspecified,
    /// `no-store, no-cache, must-revalidate, max-age=0` plus `Pragma`.
    NoCache,
    /// `public, max-age=31536000` for immutable static assets.
    LongLived,
}

impl CacheControl {
    fn header_fragment(self) -> &'static str {
        match self {
            Self::Unspecified => "",
            Self::NoCache => {
                "Cache-Control: no-store, no-cache, must-revalidate, max-age=0\r\n\
                 Pragma: no-cache\r\n"
            }
            Self::LongLived => "Cache-Control: public, max-age=31536000\r\n",
        }
    }
}

/// Where a 302 should send the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    /// Captive-portal catch: `http://<ap-ip>/`.
    CaptivePortal,
    /// Login page on whichever interface the request came in on:
    /// `http://<local-ip>/auth.html`.
    AuthHtml,
}

/// A response about to be written. Bodies are owned or borrowed from static
/// assets; nothing in here points into a lock-protected buffer.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub code: u16,
    pub content_type: ContentType,
    pub content_type_param: Option<&'static str>,
    pub content_encoding: ContentEncoding,
    pub cache: CacheControl,
    pub add_date: bool,
    pub body: Option<Cow<'static, [u8]>>,
    pub redirect: Option<Redirect>,
}

impl HttpResponse {
    fn empty(code: u16) -> Self {
        Self {
            code,
            content_type: ContentType::TextHtml,
            content_type_param: None,
            content_encoding: ContentEncoding::Identity,
            cache: CacheControl::NoCache,
            add_date: true,
            body: None,
            redirect: None,
        }
    }

    pub fn ok_json(json: String) -> Self {
        Self {
            code: 200,
            content_type: ContentType::ApplicationJson,
            content_type_param: None,
            content_encoding: ContentEncoding::Identity,
            cache: CacheControl::NoCache,
            add_date: true,
            body: Some(Cow::Owned(json.into_bytes())),
            redirect: None,
        }
    }

    pub fn json_with_code(code: u16, json: String) -> Self {
        Self {
            body: Some(Cow::Owned(json.into_bytes())),
            ..Self::empty(code)
        }
    }

    /// Static content served out of the embedded asset store.
    pub fn ok_static(
        content: &'static [u8],
        content_type: ContentType,
        content_encoding: ContentEncoding,
        cache: CacheControl,
    ) -> Self {
        Self {
            code: 200,
            content_type,
            content_type_param: None,
            content_encoding,
            cache,
            add_date: false,
            body: Some(Cow::Borrowed(content)),
            redirect: None,
        }
    }

    pub fn redirect_to_auth_html() -> Self {
        Self {
            redirect: Some(Redirect::AuthHtml),
            ..Self::empty(302)
        }
    }

    pub fn redirect_captive_portal() -> Self {
        Self {
            redirect: Some(Redirect::CaptivePortal),
            ..Self::empty(302)
        }
    }

    pub fn bad_request() -> Self {
        Self::empty(400)
    }

    pub fn not_found() -> Self {
        Self::empty(404)
    }

    pub fn service_unavailable() -> Self {
        Self::empty(503)
    }

    pub fn gateway_timeout() -> Self {
        Self::empty(504)
    }
}

fn status_message(code: u16) -> &'static str {
    match code {
        200 => "OK",
        302 => "Found",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        503 => "Service Unavailable",
        504 => "Gateway timeout",
        _ => "Internal Server Error",
    }
}

const IMF_FIXDATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// `Date:` header line in RFC 7231 IMF-fixdate, UTC.
pub fn date_header_line(now: OffsetDateTime) -> String {
    match now.format(IMF_FIXDATE) {
        Ok(formatted) => format!("Date: {formatted}\r\n"),
        Err(_) => String::new(),
    }
}

/// Write `buf` fully, retrying short and would-block writes until
/// `deadline`.
pub fn write_all_deadline<W: Write>(w: &mut W, buf: &[u8], deadline: Instant) -> io::Result<()> {
    let mut offset = 0;
    while offset < buf.len() {
        if Instant::now() >= deadline {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "send deadline expired"));
        }
        match w.write(&buf[offset..]) {
            Ok(0) => {
                return Err(io::Error::new(io::ErrorKind::WriteZero, "connection closed"));
            }
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut =>
            {
                // The per-write timeout fired; the outer deadline decides
                // whether we get another attempt.
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Serialize a response: status/header block first, then the body in
/// [`BODY_CHUNK_SIZE`] chunks.
///
/// `extra_header_fields` carries per-request lines such as
/// `WWW-Authenticate:` and `Set-Cookie:`, already CRLF-terminated.
/// `local_ip` is the interface address the request arrived on, used for the
/// auth-page redirect.
pub fn write_response<W: Write>(
    w: &mut W,
    resp: &HttpResponse,
    extra_header_fields: &str,
    ap_ip: &str,
    local_ip: &str,
    now: OffsetDateTime,
) -> io::Result<()> {
    let deadline = Instant::now() + SEND_TIMEOUT;

    if let Some(redirect) = &resp.redirect {
        let location = match redirect {
            Redirect::CaptivePortal => format!("http://{ap_ip}/"),
            Redirect::AuthHtml => format!("http://{local_ip}/auth.html"),
        };
        let header = format!(
            "HTTP/1.1 302 Found\r\n\
             Server: Ruuvi Gateway\r\n\
             Location: {location}\r\n\
             {extra_header_fields}\r\n"
        );
        return write_all_deadline(w, header.as_bytes(), deadline);
    }

    let Some(body) = &resp.body else {
        let header = format!(
            "HTTP/1.1 {} {}\r\n\
             Server: Ruuvi Gateway\r\n\
             Content-Length: 0\r\n\r\n",
            resp.code,
            status_message(resp.code)
        );
        return write_all_deadline(w, header.as_bytes(), deadline);
    };

    let date = if resp.add_date {
        date_header_line(now)
    } else {
        String::new()
    };
    let content_type_param = match resp.content_type_param {
        Some(param) => format!("; {param}"),
        None => String::new(),
    };
    let encoding = match resp.content_encoding {
        ContentEncoding::Identity => "",
        ContentEncoding::Gzip => "Content-Encoding: gzip\r\n",
    };
    let header = format!(
        "HTTP/1.1 {} {}\r\n\
         Server: Ruuvi Gateway\r\n\
         {date}\
         Content-type: {}; charset=utf-8{content_type_param}\r\n\
         Content-Length: {}\r\n\
         {extra_header_fields}\
         {encoding}\
         {}\r\n",
        resp.code,
        status_message(resp.code),
        resp.content_type.as_str(),
        body.len(),
        resp.cache.header_fragment(),
    );
    write_all_deadline(w, header.as_bytes(), deadline)?;

    for chunk in body.chunks(BODY_CHUNK_SIZE) {
        debug!("write body chunk: {} bytes", chunk.len());
        write_all_deadline(w, chunk, deadline)?;
    }
    Ok(())
}
