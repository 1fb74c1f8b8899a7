//! HTTP/1.1 request accumulation and parsing.
//!
//! Requests arrive over possibly many `recv` calls into one flat buffer
//! capped at 4 KiB. A request is complete once the received body length
//! matches the declared `Content-Length`, or, without that header, once
//! the header terminator has been seen. The parser is deliberately lax in
//! the same places the portal's browser clients are: both `\r\n\r\n` and
//! `\n\n` terminate the header block.

use log::{debug, warn};

/// Upper bound for a whole request (start line + headers + body).
pub const FULLBUF_SIZE: usize = 4 * 1024;

/// Growing request buffer with the overflow policy of the serve loop: a
/// request that does not fit is dropped without a reply.
pub struct RequestBuf {
    buf: Vec<u8>,
}

/// Request exceeded [`FULLBUF_SIZE`].
#[derive(Debug, PartialEq, Eq)]
pub struct Overflow;

impl Default for RequestBuf {
    fn default() -> Self {
        Self {
            buf: Vec::with_capacity(1024),
        }
    }
}

impl RequestBuf {
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), Overflow> {
        if self.buf.len() + chunk.len() > FULLBUF_SIZE {
            warn!(
                "request buffer full, have {} bytes, got {} more",
                self.buf.len(),
                chunk.len()
            );
            return Err(Overflow);
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Whether the buffered bytes form a complete request.
    pub fn is_ready(&self) -> bool {
        let Ok(text) = std::str::from_utf8(&self.buf) else {
            // Undecodable bytes cannot satisfy a Content-Length match; wait
            // for more data (or the read timeout).
            return false;
        };
        let header = HeaderBlock(text);
        match header.field("Content-Length:") {
            Some(value) => {
                let content_len: usize = match value.parse() {
                    Ok(len) => len,
                    Err(_) => return false,
                };
                match body_offset(text) {
                    Some(offset) => {
                        let body_len = self.buf.len() - offset;
                        debug!("Content-Length: {content_len}, body so far: {body_len}");
                        body_len == content_len
                    }
                    None => false,
                }
            }
            None => body_offset(text).is_some(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

fn body_offset(text: &str) -> Option<usize> {
    if let Some(pos) = text.find("\r\n\r\n") {
        return Some(pos + 4);
    }
    text.find("\n\n").map(|pos| pos + 2)
}

/// The raw header block of a parsed request.
#[derive(Debug, Clone, Copy)]
pub struct HeaderBlock<'a>(pub &'a str);

impl<'a> HeaderBlock<'a> {
    /// Field lookup in the original's manner: a case-sensitive substring
    /// match on `name` (including the colon), leading spaces skipped, value
    /// ending at the first CR or LF.
    pub fn field(&self, name: &str) -> Option<&'a str> {
        let start = self.0.find(name)? + name.len();
        let rest = &self.0[start..];
        let rest = rest.trim_start_matches(' ');
        let end = rest.find(['\r', '\n']).unwrap_or(rest.len());
        Some(&rest[..end])
    }

    /// Exact-name cookie lookup. Unlike the header fields this is a real
    /// per-name scan: `XRUUVISESSION=…` does not match `RUUVISESSION`.
    pub fn cookie(&self, name: &str) -> Option<String> {
        let cookies = self.field("Cookie:")?;
        for parsed in cookie::Cookie::split_parse(cookies) {
            match parsed {
                Ok(c) if c.name() == name => {
                    if c.value().is_empty() {
                        return None;
                    }
                    return Some(c.value().to_string());
                }
                Ok(_) => {}
                Err(e) => debug!("unparseable cookie fragment: {e}"),
            }
        }
        None
    }
}

/// A parsed request. All fields borrow from the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct HttpReq<'a> {
    pub method: &'a str,
    pub uri: &'a str,
    pub ver: &'a str,
    pub header: HeaderBlock<'a>,
    pub body: &'a str,
}

/// Split a complete request into method/uri/version/headers/body.
/// `None` means the request is unparseable and deserves a 400.
pub fn parse(buf: &[u8]) -> Option<HttpReq<'_>> {
    let text = std::str::from_utf8(buf).ok()?;

    let (head, body) = if let Some(pos) = text.find("\r\n\r\n") {
        (&text[..pos], &text[pos + 4..])
    } else if let Some(pos) = text.find("\n\n") {
        (&text[..pos], &text[pos + 2..])
    } else {
        return None;
    };

    let (request_line, header) = if let Some(pos) = head.find("\r\n") {
        (&head[..pos], &head[pos + 2..])
    } else if let Some(pos) = head.find('\n') {
        (&head[..pos], &head[pos + 1..])
    } else {
        (head, "")
    };

    let (method, rest) = request_line.split_once(' ')?;
    let (uri, ver) = rest.split_once(' ')?;

    Some(HttpReq {
        method,
        uri,
        ver,
        header: HeaderBlock(header),
        body,
    })
}
