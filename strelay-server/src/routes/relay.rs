//! The relay endpoints every rewritten playlist URI points back at.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::net::IpAddr;
use url::Url;

use relay_engine::RelayTarget;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const NO_STORE: &str = "no-store";
const SEGMENT_CACHE: &str = "public, max-age=3600";

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    target: String,
    #[serde(rename = "ref")]
    referer: Option<String>,
}

impl RelayQuery {
    fn into_target(self) -> RelayTarget {
        RelayTarget::from_query(&self.target, self.referer.as_deref())
    }
}

/// Rejects targets that would let the relay be used to reach internal hosts.
/// Loopback stays reachable in test builds so routes can be exercised against
/// in-process upstreams.
fn guard_target(target: &RelayTarget) -> Result<(), ApiError> {
    let url = Url::parse(&target.url)
        .map_err(|_| ApiError::bad_request("target is not a valid absolute URL"))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ApiError::bad_request(
            "only http and https targets are relayed",
        ));
    }
    if !cfg!(test)
        && let Some(host) = url.host_str()
    {
        let internal = match host.parse::<IpAddr>() {
            Ok(IpAddr::V4(v4)) => {
                v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
            }
            Ok(IpAddr::V6(v6)) => v6.is_loopback() || v6.is_unspecified(),
            Err(_) => host.eq_ignore_ascii_case("localhost"),
        };
        if internal {
            return Err(ApiError::bad_request(
                "target resolves to an internal address",
            ));
        }
    }
    Ok(())
}

pub async fn relay_playlist(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> ApiResult<Response> {
    let target = query.into_target();
    guard_target(&target)?;
    let playlist = state.orchestrator.relay_playlist(&target).await?;
    Ok((
        [
            (header::CONTENT_TYPE, playlist.content_type),
            (header::CACHE_CONTROL, NO_STORE.to_string()),
        ],
        playlist.body,
    )
        .into_response())
}

pub async fn relay_segment(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
) -> ApiResult<Response> {
    let target = query.into_target();
    guard_target(&target)?;
    let resource = state.orchestrator.relay_resource(&target).await?;
    let cache_control = if resource.cacheable {
        SEGMENT_CACHE
    } else {
        NO_STORE
    };
    Ok((
        [
            (header::CONTENT_TYPE, resource.content_type),
            (header::CACHE_CONTROL, cache_control.to_string()),
        ],
        resource.bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(url: &str) -> RelayTarget {
        RelayTarget {
            url: url.to_string(),
            referer: None,
        }
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(guard_target(&target("file:///etc/passwd")).is_err());
        assert!(guard_target(&target("ftp://cdn.example.com/a.ts")).is_err());
        assert!(guard_target(&target("not a url")).is_err());
    }

    #[test]
    fn accepts_public_https() {
        assert!(guard_target(&target("https://cdn.example.com/seg-1.ts")).is_ok());
    }

    #[test]
    fn loopback_allowed_in_tests() {
        // In test builds the in-process upstreams live on 127.0.0.1.
        assert!(guard_target(&target("http://127.0.0.1:9999/a.ts")).is_ok());
    }
}
