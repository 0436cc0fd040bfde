//! Segment and key relay.
//!
//! Fetches one non-playlist resource upstream (media segment, init segment,
//! encryption key) and hands the raw bytes back with an inferred content
//! type. Segments are immutable once published and may be cached briefly;
//! keys never are.

use bytes::Bytes;
use reqwest::Client;
use tracing::trace;
use url::Url;

use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::headers::upstream_headers;
use crate::token::RelayTarget;

/// A relayed upstream resource.
#[derive(Debug, Clone)]
pub struct RelayedResource {
    pub bytes: Bytes,
    pub content_type: String,
    /// False for keys and anything else that must not be cached.
    pub cacheable: bool,
}

/// Whether a URL references an encryption key.
fn is_key_url(url: &Url) -> bool {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default()
        .to_ascii_lowercase();
    last.ends_with(".key") || last.contains("key")
}

/// Infer the content type to serve, preferring what the extension tells us
/// over what the upstream claims (CDNs routinely mislabel segments).
fn infer_content_type(url: &Url, upstream: Option<&str>) -> (String, bool) {
    let path = url.path().to_ascii_lowercase();
    if path.ends_with(".ts") {
        return ("video/mp2t".to_string(), true);
    }
    if path.ends_with(".aac") {
        return ("audio/aac".to_string(), true);
    }
    if path.ends_with(".m4a") {
        return ("audio/mp4".to_string(), true);
    }
    if path.ends_with(".mp4") || path.ends_with(".m4s") {
        return ("video/mp4".to_string(), true);
    }
    if is_key_url(url) {
        return ("application/octet-stream".to_string(), false);
    }
    (
        upstream
            .unwrap_or("application/octet-stream")
            .to_string(),
        true,
    )
}

/// Fetch one upstream resource on behalf of the client.
pub async fn fetch_resource(
    client: &Client,
    target: &RelayTarget,
    config: &EngineConfig,
) -> Result<RelayedResource> {
    let url = Url::parse(&target.url)
        .map_err(|e| RelayError::invalid_url(&target.url, e.to_string()))?;
    let headers = upstream_headers(&url, target.referer.as_deref());

    let response = client
        .get(url.clone())
        .headers(headers)
        .timeout(config.segment_timeout)
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

    let bytes = response.bytes().await?;
    let (content_type, cacheable) = infer_content_type(&url, upstream_type.as_deref());
    trace!(url = %url, bytes = bytes.len(), content_type, "relayed resource");

    Ok(RelayedResource {
        bytes,
        content_type,
        cacheable,
    })
}
