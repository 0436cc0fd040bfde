//! Transport-safe encoding for relay URL parameters.
//!
//! Target URLs and referer overrides travel inside the relay's own query
//! string, so they are wrapped in URL-safe base64. Decoding is deliberately
//! lenient: a value that does not decode is assumed to already be plain text
//! and is passed through, so callers that skip encoding still work.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Encode a value for embedding in a relay URL query string.
pub fn encode(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Decode a relay URL parameter, falling back to the literal input when it is
/// not valid base64 / UTF-8.
pub fn decode(value: &str) -> String {
    match URL_SAFE_NO_PAD.decode(value.as_bytes()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(_) => value.to_string(),
        },
        Err(_) => value.to_string(),
    }
}

/// A decoded relay request: the upstream target plus the referer identity the
/// upstream fetch must carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    pub url: String,
    pub referer: Option<String>,
}

impl RelayTarget {
    pub fn new(url: impl Into<String>, referer: Option<String>) -> Self {
        Self {
            url: url.into(),
            referer,
        }
    }

    /// Decode from the raw `target` / `ref` query parameters.
    pub fn from_query(target: &str, referer: Option<&str>) -> Self {
        Self {
            url: decode(target),
            referer: referer
                .filter(|r| !r.is_empty())
                .map(decode),
        }
    }

    /// Render the query string for a relay endpoint.
    pub fn to_query(&self) -> String {
        match &self.referer {
            Some(referer) => format!("target={}&ref={}", encode(&self.url), encode(referer)),
            None => format!("target={}", encode(&self.url)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip_is_identity() {
        let urls = [
            "https://cdn.example.com/hls/ep-1080/segment_00001.ts",
            "https://cdn.example.com/path?query=a&b=c#frag",
            "https://例え.テスト/動画/セグメント.ts",
            "",
            "relative/path/key.bin",
        ];
        for url in urls {
            assert_eq!(decode(&encode(url)), url);
        }
    }

    #[test]
    fn decode_falls_back_to_literal_input() {
        // Not base64 at all; must come back untouched rather than erroring.
        assert_eq!(decode("https://plain.example/seg.ts"), "https://plain.example/seg.ts");
        // Valid base64 that is not UTF-8 also falls back.
        let raw = URL_SAFE_NO_PAD.encode([0xff, 0xfe, 0x00]);
        assert_eq!(decode(&raw), raw);
    }

    #[test]
    fn relay_target_query_roundtrip() {
        let target = RelayTarget::new(
            "https://cdn.example.com/master.m3u8",
            Some("https://embed.example.com/".to_string()),
        );
        let query = target.to_query();
        let encoded_target = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("target="))
            .unwrap()
            .to_string();
        let encoded_ref = query
            .split('&')
            .find_map(|kv| kv.strip_prefix("ref="))
            .map(str::to_string);
        let decoded = RelayTarget::from_query(&encoded_target, encoded_ref.as_deref());
        assert_eq!(decoded, target);
    }

    #[test]
    fn empty_ref_is_treated_as_absent() {
        let decoded = RelayTarget::from_query(&encode("http://a/x.ts"), Some(""));
        assert_eq!(decoded.referer, None);
    }
}
