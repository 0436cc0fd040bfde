//! Manifest rewriter.
//!
//! Fetches an HLS playlist and re-points every URI in it (media segments,
//! encryption keys, nested playlists) at the relay's own endpoints, carrying
//! the referer override forward so nested fetches present the same upstream
//! identity. The rewrite is line-based on purpose: playlists contain vendor
//! tags we must preserve byte-for-byte, and a parse/re-serialize cycle would
//! not.

use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

use crate::config::{EngineConfig, RelayEndpoints};
use crate::error::{RelayError, Result};
use crate::headers::upstream_headers;
use crate::sniff::BlockSniffer;
use crate::token::RelayTarget;

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

const PLAYLIST_EXT: &str = ".m3u8";

/// A playlist rewritten for relay, plus the content type to serve it with.
#[derive(Debug, Clone)]
pub struct RewrittenPlaylist {
    pub body: String,
    pub content_type: String,
}

/// Whether a resolved URL references another playlist (by extension).
fn is_playlist_url(url: &Url) -> bool {
    url.path().ends_with(PLAYLIST_EXT)
}

/// Build a relay URL for `absolute`, routed to the playlist or segment
/// endpoint depending on what it points at.
fn relay_url(absolute: &Url, referer: Option<&str>, endpoints: &RelayEndpoints) -> String {
    let endpoint = if is_playlist_url(absolute) {
        &endpoints.playlist
    } else {
        &endpoints.segment
    };
    let target = RelayTarget::new(absolute.as_str(), referer.map(str::to_string));
    format!("{}?{}", endpoint, target.to_query())
}

/// Rewrite every quoted `URI="..."` attribute value inside a tag line.
///
/// Key and init-segment URIs always route to the segment endpoint: they are
/// raw resources, never playlists.
fn rewrite_tag_uri(
    line: &str,
    base: &Url,
    referer: Option<&str>,
    endpoints: &RelayEndpoints,
) -> Result<String> {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    loop {
        let Some(start) = rest.find("URI=\"") else {
            out.push_str(rest);
            return Ok(out);
        };
        let value_start = start + "URI=\"".len();
        let Some(value_len) = rest[value_start..].find('"') else {
            // Unterminated attribute; leave the remainder alone.
            out.push_str(rest);
            return Ok(out);
        };
        let uri = &rest[value_start..value_start + value_len];
        let absolute = base
            .join(uri)
            .map_err(|e| RelayError::invalid_url(uri, e.to_string()))?;

        let target = RelayTarget::new(absolute.as_str(), referer.map(str::to_string));
        out.push_str(&rest[..value_start]);
        out.push_str(&format!("{}?{}", endpoints.segment, target.to_query()));
        out.push('"');
        rest = &rest[value_start + value_len + 1..];
    }
}

/// Rewrite playlist text against its own base URL.
///
/// Blank lines pass through; tag lines pass through except quoted `URI=`
/// values; every other line is a resource reference and is replaced with a
/// relay URL.
pub fn rewrite_playlist_text(
    text: &str,
    base: &Url,
    referer: Option<&str>,
    endpoints: &RelayEndpoints,
) -> Result<String> {
    let mut out = String::with_capacity(text.len() * 2);
    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() {
            out.push('\n');
            continue;
        }
        if line.starts_with('#') {
            out.push_str(&rewrite_tag_uri(line, base, referer, endpoints)?);
            out.push('\n');
            continue;
        }
        let absolute = base
            .join(line.trim())
            .map_err(|e| RelayError::invalid_url(line.trim(), e.to_string()))?;
        trace!(original = line.trim(), resolved = %absolute, "rewriting resource line");
        out.push_str(&relay_url(&absolute, referer, endpoints));
        out.push('\n');
    }
    Ok(out)
}

/// Fetch `target` and return it rewritten for relay.
pub async fn fetch_and_rewrite(
    client: &Client,
    target: &RelayTarget,
    config: &EngineConfig,
    sniffer: &dyn BlockSniffer,
) -> Result<RewrittenPlaylist> {
    let url = Url::parse(&target.url)
        .map_err(|e| RelayError::invalid_url(&target.url, e.to_string()))?;
    let headers = upstream_headers(&url, target.referer.as_deref());

    let response = client
        .get(url.clone())
        .headers(headers)
        .timeout(config.playlist_timeout)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        return Err(RelayError::upstream(status, url.as_str()));
    }

    let upstream_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body = response.bytes().await?;
    if let Some(indicator) = sniffer.sniff(&body) {
        return Err(RelayError::blocked(url.as_str(), indicator));
    }

    let text = std::str::from_utf8(&body)
        .map_err(|e| RelayError::playlist(format!("playlist at {url} is not UTF-8: {e}")))?;

    if !text.contains("#EXTM3U") && !is_playlist_url(&url) {
        return Err(RelayError::playlist(format!(
            "response from {url} does not look like an HLS playlist"
        )));
    }

    let rewritten = rewrite_playlist_text(text, &url, target.referer.as_deref(), &config.endpoints)?;
    debug!(url = %url, bytes = rewritten.len(), "playlist rewritten");

    Ok(RewrittenPlaylist {
        body: rewritten,
        content_type: upstream_type.unwrap_or_else(|| HLS_CONTENT_TYPE.to_string()),
    })
}
