//! Embedded UI assets.
//!
//! On the appliance the static UI lives in flash; here it is compiled into
//! the binary. The store is a trait so a host application can mount its own
//! UI while keeping the routing and cache policy in one place: CSS and JS
//! are immutable (fingerprinted by firmware version), HTML and JSON must
//! never be cached by a captive-portal browser.

use indexmap::IndexMap;

use crate::http_resp::{CacheControl, ContentEncoding, ContentType, HttpResponse};

/// One embedded file.
#[derive(Debug, Clone, Copy)]
pub struct Asset {
    pub content: &'static [u8],
    pub content_type: ContentType,
    pub content_encoding: ContentEncoding,
    pub cache: CacheControl,
}

impl Asset {
    pub fn into_response(self) -> HttpResponse {
        HttpResponse::ok_static(self.content, self.content_type, self.content_encoding, self.cache)
    }
}

/// Lookup of embedded files by their URI file name.
pub trait AssetStore: Send + Sync {
    fn get(&self, name: &str) -> Option<Asset>;
}

/// Cache policy by file type: HTML/JSON no-cache, CSS/JS long-lived.
pub fn cache_policy_for(content_type: ContentType) -> CacheControl {
    match content_type {
        ContentType::TextHtml | ContentType::ApplicationJson => CacheControl::NoCache,
        ContentType::TextCss | ContentType::TextJavascript => CacheControl::LongLived,
        _ => CacheControl::Unspecified,
    }
}

/// The provisioning UI shipped with this crate.
pub struct BuiltinAssets {
    files: IndexMap<&'static str, Asset>,
}

impl Default for BuiltinAssets {
    fn default() -> Self {
        let mut files = IndexMap::new();
        for (name, content) in [
            ("index.html", include_str!("../assets/index.html").as_bytes()),
            ("auth.html", include_str!("../assets/auth.html").as_bytes()),
            ("style.css", include_str!("../assets/style.css").as_bytes()),
        ] {
            let content_type = content_type_of(name);
            files.insert(
                name,
                Asset {
                    content,
                    content_type,
                    content_encoding: ContentEncoding::Identity,
                    cache: cache_policy_for(content_type),
                },
            );
        }
        Self { files }
    }
}

fn content_type_of(name: &str) -> ContentType {
    match name.rsplit_once('.') {
        Some((_, ext)) => ContentType::from_ext(ext),
        None => ContentType::OctetStream,
    }
}

impl AssetStore for BuiltinAssets {
    fn get(&self, name: &str) -> Option<Asset> {
        self.files.get(name).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_served_as_no_cache_html() {
        let store = BuiltinAssets::default();
        let asset = store.get("index.html").unwrap();
        assert_eq!(asset.content_type, ContentType::TextHtml);
        assert_eq!(asset.cache, CacheControl::NoCache);
        assert!(!asset.content.is_empty());
    }

    #[test]
    fn css_is_long_lived() {
        let store = BuiltinAssets::default();
        let asset = store.get("style.css").unwrap();
        assert_eq!(asset.content_type, ContentType::TextCss);
        assert_eq!(asset.cache, CacheControl::LongLived);
    }

    #[test]
    fn unknown_files_are_absent() {
        let store = BuiltinAssets::default();
        assert!(store.get("missing.bin").is_none());
    }
}
