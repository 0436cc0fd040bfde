//! Stream resolver seam.
//!
//! Turning an episode id into candidate video sources is scraping work that
//! lives outside this engine. The engine only consumes the resolved shape.
//! Field names are camelCase on the wire because the resolver service is
//! external.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubtitleTrack {
    pub language: String,
    pub url: String,
    #[serde(default)]
    pub label: Option<String>,
}

/// One playable source as resolved upstream. Immutable once returned; the
/// headers are authoritative for this source only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamSource {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default = "default_true")]
    pub is_playlist: bool,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

fn default_true() -> bool {
    true
}

impl StreamSource {
    /// The referer this source's headers mandate, if any.
    pub fn referer(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("referer"))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedServer {
    pub server_name: String,
    #[serde(default)]
    pub server_type: Option<String>,
    pub sources: Vec<StreamSource>,
    #[serde(default)]
    pub subtitles: Vec<SubtitleTrack>,
}

/// Resolves an episode id into candidate servers, in stable preference order.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    async fn resolve(
        &self,
        episode_id: &str,
        server_type: Option<&str>,
    ) -> Result<Vec<ResolvedServer>>;
}
