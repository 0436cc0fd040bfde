//! Download orchestration.
//!
//! Composes the relay pieces into the two public flows: the streaming relay
//! (rewrite one playlist per request, no local state) and materialization
//! (resolve, select a server, pick a variant, fetch every segment, assemble,
//! hand the file back). A job's temporary directory rides inside the returned
//! [`MaterializedFile`], so dropping the result (on success, failure, or a
//! client disconnect mid-stream) releases the storage exactly once.

use parking_lot::RwLock;
use reqwest::Client;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{info, instrument, warn};
use url::Url;

use crate::assemble::{AssembledFile, assemble};
use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::fetch::{JobCounters, SegmentTask, fetch_segments};
use crate::headers::upstream_headers;
use crate::proxy::{RelayedResource, fetch_resource};
use crate::resolver::{StreamResolver, StreamSource};
use crate::rewrite::{RewrittenPlaylist, fetch_and_rewrite};
use crate::select::{CandidateServer, select_server};
use crate::sniff::{DefaultSniffer, SharedSniffer};
use crate::token::RelayTarget;
use crate::variant::{Quality, VariantSelection, select_variant};

/// Options for a materialize request.
#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    /// Restrict resolution to servers of this type (e.g. "sub", "dub").
    pub server_type: Option<String>,
    /// Preferred candidate index; remaining candidates keep original order.
    pub server_index: usize,
    pub quality: Quality,
    /// When false, only the preferred server is probed and no fallback runs.
    pub fallback: bool,
}

/// The deliverable of a materialize run. Owns the job's temporary directory;
/// dropping this value releases all staged segment data.
#[derive(Debug)]
pub struct MaterializedFile {
    pub file_name: String,
    pub assembled: AssembledFile,
    _job_dir: TempDir,
}

impl MaterializedFile {
    pub fn path(&self) -> &std::path::Path {
        &self.assembled.path
    }
}

/// Best-effort progress of a materialize job.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Unknown,
    Resolving,
    SelectingServer,
    FetchingSegments,
    Assembling,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub phase: JobPhase,
    pub downloaded: usize,
    pub failed: usize,
    pub blocked: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressSnapshot {
    fn unknown() -> Self {
        Self {
            phase: JobPhase::Unknown,
            downloaded: 0,
            failed: 0,
            blocked: 0,
            total: 0,
            error: None,
        }
    }
}

struct JobEntry {
    phase: JobPhase,
    counters: Arc<JobCounters>,
    error: Option<String>,
}

/// Owns the HTTP client, the resolver handle, and the job registry. Tests can
/// instantiate independent orchestrators; nothing here is process-global.
pub struct Orchestrator {
    client: Client,
    config: EngineConfig,
    resolver: Arc<dyn StreamResolver>,
    sniffer: SharedSniffer,
    jobs: RwLock<HashMap<String, JobEntry>>,
}

impl Orchestrator {
    pub fn new(resolver: Arc<dyn StreamResolver>, config: EngineConfig) -> Result<Self> {
        Self::with_sniffer(resolver, config, DefaultSniffer::shared())
    }

    pub fn with_sniffer(
        resolver: Arc<dyn StreamResolver>,
        config: EngineConfig,
        sniffer: SharedSniffer,
    ) -> Result<Self> {
        // Long-lived streaming responses must not hit a global request
        // timeout; per-operation timeouts are applied at each call site.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .tcp_nodelay(true)
            .pool_max_idle_per_host(20)
            .build()?;

        Ok(Self {
            client,
            config,
            resolver,
            sniffer,
            jobs: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Streaming relay: rewrite one playlist for the client's player.
    pub async fn relay_playlist(&self, target: &RelayTarget) -> Result<RewrittenPlaylist> {
        fetch_and_rewrite(&self.client, target, &self.config, self.sniffer.as_ref()).await
    }

    /// Streaming relay: proxy one segment or key.
    pub async fn relay_resource(&self, target: &RelayTarget) -> Result<RelayedResource> {
        fetch_resource(&self.client, target, &self.config).await
    }

    /// Best-effort progress for an episode's most recent materialize job.
    pub fn progress(&self, episode_id: &str) -> ProgressSnapshot {
        let jobs = self.jobs.read();
        match jobs.get(episode_id) {
            Some(entry) => {
                let (downloaded, failed, blocked, total) = entry.counters.snapshot();
                ProgressSnapshot {
                    phase: entry.phase.clone(),
                    downloaded,
                    failed,
                    blocked,
                    total,
                    error: entry.error.clone(),
                }
            }
            None => ProgressSnapshot::unknown(),
        }
    }

    fn set_phase(&self, episode_id: &str, phase: JobPhase, counters: &Arc<JobCounters>) {
        let mut jobs = self.jobs.write();
        let entry = jobs.entry(episode_id.to_string()).or_insert_with(|| JobEntry {
            phase: phase.clone(),
            counters: Arc::clone(counters),
            error: None,
        });
        entry.phase = phase;
        entry.counters = Arc::clone(counters);
    }

    fn set_failed(&self, episode_id: &str, error: &RelayError) {
        let mut jobs = self.jobs.write();
        if let Some(entry) = jobs.get_mut(episode_id) {
            entry.phase = JobPhase::Failed;
            entry.error = Some(error.to_string());
        }
    }

    /// Materialize an episode into a single downloadable file.
    #[instrument(skip(self, options), fields(episode = %episode_id))]
    pub async fn materialize(
        &self,
        episode_id: &str,
        options: MaterializeOptions,
    ) -> Result<MaterializedFile> {
        let counters = Arc::new(JobCounters::default());
        self.set_phase(episode_id, JobPhase::Resolving, &counters);

        let result = self
            .materialize_inner(episode_id, options, Arc::clone(&counters))
            .await;
        match &result {
            Ok(file) => {
                self.set_phase(episode_id, JobPhase::Complete, &counters);
                info!(file = %file.file_name, "materialize complete");
            }
            Err(e) => {
                self.set_failed(episode_id, e);
                warn!(error = %e, "materialize failed");
            }
        }
        result
    }

    async fn materialize_inner(
        &self,
        episode_id: &str,
        options: MaterializeOptions,
        counters: Arc<JobCounters>,
    ) -> Result<MaterializedFile> {
        let servers = self
            .resolver
            .resolve(episode_id, options.server_type.as_deref())
            .await?;

        let mut candidates: Vec<CandidateServer> = servers
            .into_iter()
            .filter(|s| !s.sources.is_empty())
            .enumerate()
            .map(|(priority, server)| CandidateServer {
                priority,
                name: server.server_name.clone(),
                source: server.sources[0].clone(),
            })
            .collect();
        if candidates.is_empty() {
            return Err(RelayError::resolver(format!(
                "no sources resolved for episode {episode_id}"
            )));
        }
        if !options.fallback {
            let preferred = options.server_index.min(candidates.len() - 1);
            let chosen = candidates.swap_remove(preferred);
            candidates = vec![chosen];
        }

        self.set_phase(episode_id, JobPhase::SelectingServer, &counters);
        let selection = select_server(
            &self.client,
            &candidates,
            options.server_index,
            &self.config,
            self.sniffer.as_ref(),
        )
        .await?;
        let source = selection.source;
        let referer = source.referer().map(str::to_string);

        let job_dir = tempfile::tempdir()?;
        let stem = sanitize_stem(episode_id);

        // Direct (non-playlist) sources skip the whole HLS pipeline.
        if !source.is_playlist {
            return self
                .materialize_direct(&source, referer.as_deref(), job_dir, &stem, counters, episode_id)
                .await;
        }

        let source_url = Url::parse(&source.url)
            .map_err(|e| RelayError::invalid_url(&source.url, e.to_string()))?;
        let (text, base) = self
            .fetch_playlist_text(&source_url, referer.as_deref())
            .await?;

        let (media_text, media_base) =
            match select_variant(&text, &base, options.quality)? {
                VariantSelection::Media => (text, base),
                VariantSelection::Variant(variant) => {
                    self.fetch_playlist_text(&variant.url, referer.as_deref())
                        .await?
                }
            };

        let tasks = segment_tasks(&media_text, &media_base)?;
        info!(segments = tasks.len(), base = %media_base, "fetching segment list");

        self.set_phase(episode_id, JobPhase::FetchingSegments, &counters);
        let files = fetch_segments(
            &self.client,
            tasks,
            referer.as_deref(),
            job_dir.path(),
            Arc::clone(&counters),
            &self.config,
            Arc::clone(&self.sniffer),
        )
        .await?;

        self.set_phase(episode_id, JobPhase::Assembling, &counters);
        let assembled = assemble(&files, job_dir.path(), &stem, &self.config).await?;

        Ok(MaterializedFile {
            file_name: format!("{stem}.{}", assembled.container.extension()),
            assembled,
            _job_dir: job_dir,
        })
    }

    async fn materialize_direct(
        &self,
        source: &StreamSource,
        referer: Option<&str>,
        job_dir: TempDir,
        stem: &str,
        counters: Arc<JobCounters>,
        episode_id: &str,
    ) -> Result<MaterializedFile> {
        self.set_phase(episode_id, JobPhase::FetchingSegments, &counters);
        counters.total.store(1, std::sync::atomic::Ordering::Relaxed);

        let target = RelayTarget::new(source.url.clone(), referer.map(str::to_string));
        let resource = fetch_resource(&self.client, &target, &self.config).await?;
        counters
            .downloaded
            .store(1, std::sync::atomic::Ordering::Relaxed);

        let path = job_dir.path().join(format!("{stem}.mp4"));
        tokio::fs::write(&path, &resource.bytes).await?;

        Ok(MaterializedFile {
            file_name: format!("{stem}.mp4"),
            assembled: AssembledFile {
                path,
                container: crate::assemble::Container::Mp4,
            },
            _job_dir: job_dir,
        })
    }

    /// Fetch playlist text with the usual status and block checks.
    async fn fetch_playlist_text(
        &self,
        url: &Url,
        referer: Option<&str>,
    ) -> Result<(String, Url)> {
        let headers = upstream_headers(url, referer);
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .timeout(self.config.playlist_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::upstream(status, url.as_str()));
        }
        let body = response.bytes().await?;
        if let Some(indicator) = self.sniffer.sniff(&body) {
            return Err(RelayError::blocked(url.as_str(), indicator));
        }
        let text = std::str::from_utf8(&body)
            .map_err(|e| RelayError::playlist(format!("playlist at {url} is not UTF-8: {e}")))?
            .to_string();
        Ok((text, url.clone()))
    }
}

/// Episode ids become file stems; strip anything shell- or path-hostile.
fn sanitize_stem(episode_id: &str) -> String {
    let stem: String = episode_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if stem.is_empty() { "episode".to_string() } else { stem }
}

/// Extract the ordered segment list from media playlist text.
///
/// Parses with m3u8-rs; playlists that the parser rejects (some origins emit
/// slightly malformed manifests) fall back to a plain line scan, which is all
/// the segment list actually needs.
pub fn segment_tasks(text: &str, base: &Url) -> Result<Vec<SegmentTask>> {
    let uris: Vec<String> = match m3u8_rs::parse_media_playlist_res(text.as_bytes()) {
        Ok(playlist) => playlist.segments.iter().map(|s| s.uri.clone()).collect(),
        Err(_) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .map(str::to_string)
            .collect(),
    };

    uris.into_iter()
        .enumerate()
        .map(|(index, uri)| {
            let url = base
                .join(&uri)
                .map_err(|e| RelayError::invalid_url(&uri, e.to_string()))?;
            Ok(SegmentTask { index, url })
        })
        .collect()
}
