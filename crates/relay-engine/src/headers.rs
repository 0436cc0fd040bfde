//! Header policy: the outbound identity a given upstream host requires.
//!
//! Embed CDNs key access off `Referer`/`Origin`. When the caller supplies an
//! explicit referer (carried through relay URLs) it wins; otherwise the host
//! name is matched against a table of known CDN fragments.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, ORIGIN, REFERER, USER_AGENT};
use url::Url;

/// Matches the desktop Chrome UA used for anti-hotlink upstreams.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Ordered host-fragment table. First fragment contained in the target host
/// (or full URL) wins.
const REFERER_TABLE: &[(&str, &str)] = &[
    ("megacloud", "https://megacloud.tv/"),
    ("rapid-cloud", "https://rapid-cloud.co/"),
    ("rabbitstream", "https://rabbitstream.net/"),
    ("netmagcdn", "https://megacloud.blog/"),
    ("vidcloud", "https://vidcloud9.com/"),
];

const FALLBACK_REFERER: &str = "https://hianime.to/";

/// Derive the Origin header value (scheme + host) from a referer URL.
fn origin_of(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    let host = url.host_str()?;
    match url.port() {
        Some(port) => Some(format!("{}://{}:{}", url.scheme(), host, port)),
        None => Some(format!("{}://{}", url.scheme(), host)),
    }
}

/// Pick the default referer for a target with no explicit override.
fn referer_for(target: &Url) -> &'static str {
    let host = target.host_str().unwrap_or_default();
    for (fragment, referer) in REFERER_TABLE {
        if host.contains(fragment) || target.as_str().contains(fragment) {
            return referer;
        }
    }
    FALLBACK_REFERER
}

/// Build the outbound header set for `target`.
///
/// Pure: same inputs always yield the same headers.
pub fn upstream_headers(target: &Url, explicit_referer: Option<&str>) -> HeaderMap {
    let referer = explicit_referer
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| referer_for(target).to_string());

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    if let Ok(value) = HeaderValue::from_str(&referer) {
        headers.insert(REFERER, value);
    }
    if let Some(origin) = origin_of(&referer)
        && let Ok(value) = HeaderValue::from_str(&origin)
    {
        headers.insert(ORIGIN, value);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_referer_wins_and_derives_origin() {
        let target = Url::parse("https://megacloud.tv/seg-1.ts").unwrap();
        let headers = upstream_headers(&target, Some("https://player.example.com/watch/ep-1"));
        assert_eq!(
            headers.get(REFERER).unwrap(),
            "https://player.example.com/watch/ep-1"
        );
        assert_eq!(headers.get(ORIGIN).unwrap(), "https://player.example.com");
    }

    #[test]
    fn known_cdn_fragment_selects_table_referer() {
        let target = Url::parse("https://eb.netmagcdn.com:2228/hls-playback/x/index.m3u8").unwrap();
        let headers = upstream_headers(&target, None);
        assert_eq!(headers.get(REFERER).unwrap(), "https://megacloud.blog/");
        assert_eq!(headers.get(ORIGIN).unwrap(), "https://megacloud.blog");
    }

    #[test]
    fn unknown_host_gets_fallback_referer() {
        let target = Url::parse("https://cdn.unknown-host.example/seg.ts").unwrap();
        let headers = upstream_headers(&target, None);
        assert_eq!(headers.get(REFERER).unwrap(), FALLBACK_REFERER);
        assert_eq!(headers.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);
        assert_eq!(headers.get(ACCEPT).unwrap(), "*/*");
    }

    #[test]
    fn empty_explicit_referer_is_ignored() {
        let target = Url::parse("https://megacloud.tv/seg-1.ts").unwrap();
        let headers = upstream_headers(&target, Some(""));
        assert_eq!(headers.get(REFERER).unwrap(), "https://megacloud.tv/");
    }
}
