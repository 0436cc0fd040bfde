//! Block-page detection.
//!
//! Origins that reject our identity usually answer 200 with an HTML error or
//! interstitial page instead of media bytes. The heuristic is inherently
//! site-specific and expected to drift, so it lives behind a trait and is
//! injected wherever responses are classified.

use std::sync::Arc;

/// Classifies a response body prefix as a block/interstitial page.
pub trait BlockSniffer: Send + Sync {
    /// Returns the matched indicator when `body` looks like a block page.
    fn sniff(&self, body: &[u8]) -> Option<&'static str>;

    fn looks_blocked(&self, body: &[u8]) -> bool {
        self.sniff(body).is_some()
    }
}

pub type SharedSniffer = Arc<dyn BlockSniffer>;

/// How many leading bytes are inspected. Block pages declare themselves in
/// the first few hundred bytes.
const SNIFF_WINDOW: usize = 500;

const MARKUP_INDICATORS: &[&str] = &["<!doctype", "<html", "<head", "<body"];

const KEYWORD_INDICATORS: &[&str] = &[
    "cloudflare",
    "just a moment",
    "access denied",
    "attention required",
    "error code",
];

/// Default sniffer: HTML markup or a known blocking-service keyword within
/// the first [`SNIFF_WINDOW`] bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultSniffer;

impl DefaultSniffer {
    pub fn shared() -> SharedSniffer {
        Arc::new(Self)
    }
}

impl BlockSniffer for DefaultSniffer {
    fn sniff(&self, body: &[u8]) -> Option<&'static str> {
        let window = &body[..body.len().min(SNIFF_WINDOW)];
        let text = String::from_utf8_lossy(window).to_lowercase();

        for indicator in MARKUP_INDICATORS {
            if text.trim_start().starts_with(indicator) || text.contains(indicator) {
                return Some(indicator);
            }
        }
        for keyword in KEYWORD_INDICATORS {
            if text.contains(keyword) {
                return Some(keyword);
            }
        }
        None
    }
}
