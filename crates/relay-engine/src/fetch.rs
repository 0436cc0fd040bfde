//! Bounded-concurrency segment acquisition.
//!
//! Downloads the full ordered segment list of a media playlist into a job's
//! temporary directory. Completion order is whatever the network gives us;
//! final ordering is always the playlist index, carried in the file name.
//!
//! Two thresholds guard the result: a majority of blocked segments means the
//! origin is rejecting us systematically (retrying the job is futile), and
//! anything under 90% downloaded cannot produce a valid container.

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::headers::upstream_headers;
use crate::sniff::SharedSniffer;

/// One segment to download. `index` is the playlist position and defines the
/// final ordering regardless of completion order.
#[derive(Debug, Clone)]
pub struct SegmentTask {
    pub index: usize,
    pub url: Url,
}

/// Shared per-job counters, updated by concurrent workers.
#[derive(Debug, Default)]
pub struct JobCounters {
    pub downloaded: AtomicUsize,
    pub failed: AtomicUsize,
    pub blocked: AtomicUsize,
    pub total: AtomicUsize,
}

impl JobCounters {
    pub fn snapshot(&self) -> (usize, usize, usize, usize) {
        (
            self.downloaded.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            self.blocked.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed),
        )
    }
}

enum SegmentOutcome {
    Done(PathBuf),
    Blocked,
    Failed,
}

/// Fetch one segment with retries. Blocks are terminal on the first sighting;
/// everything else retries up to the attempt limit with exponential backoff.
async fn fetch_one(
    client: &Client,
    task: &SegmentTask,
    referer: Option<&str>,
    dir: &Path,
    config: &EngineConfig,
    sniffer: &SharedSniffer,
) -> SegmentOutcome {
    let headers = upstream_headers(&task.url, referer);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let result = client
            .get(task.url.clone())
            .headers(headers.clone())
            .timeout(config.segment_timeout)
            .send()
            .await;

        match result {
            Ok(response) => {
                let status = response.status();
                if status == StatusCode::FORBIDDEN {
                    warn!(index = task.index, url = %task.url, "segment blocked (403)");
                    return SegmentOutcome::Blocked;
                }
                if status.is_success() {
                    match response.bytes().await {
                        Ok(body) => {
                            if sniffer.looks_blocked(&body) {
                                warn!(index = task.index, url = %task.url, "segment blocked (block page)");
                                return SegmentOutcome::Blocked;
                            }
                            if !body.is_empty() {
                                let path = dir.join(format!("seg_{:05}.ts", task.index));
                                match tokio::fs::write(&path, &body).await {
                                    Ok(()) => return SegmentOutcome::Done(path),
                                    Err(e) => {
                                        warn!(index = task.index, error = %e, "segment write failed");
                                    }
                                }
                            }
                            // Empty body: treat like any transient failure.
                        }
                        Err(e) => {
                            debug!(index = task.index, error = %e, "segment body read failed");
                        }
                    }
                } else {
                    debug!(index = task.index, status = %status, "segment fetch non-success");
                }
            }
            Err(e) => {
                debug!(index = task.index, error = %e, "segment fetch transport error");
            }
        }

        if attempt >= config.segment_attempts {
            warn!(
                index = task.index,
                url = %task.url,
                attempts = attempt,
                "segment failed permanently"
            );
            return SegmentOutcome::Failed;
        }
        let delay = config.segment_retry_delay_base * 2_u32.pow(attempt - 1);
        tokio::time::sleep(delay).await;
    }
}

/// Download every task under the configured concurrency bound and return the
/// downloaded files sorted by playlist index.
pub async fn fetch_segments(
    client: &Client,
    tasks: Vec<SegmentTask>,
    referer: Option<&str>,
    dir: &Path,
    counters: Arc<JobCounters>,
    config: &EngineConfig,
    sniffer: SharedSniffer,
) -> Result<Vec<PathBuf>> {
    let total = tasks.len();
    counters.total.store(total, Ordering::Relaxed);
    if total == 0 {
        return Err(RelayError::playlist("media playlist has no segments"));
    }

    let semaphore = Arc::new(Semaphore::new(config.segment_concurrency));
    let mut in_flight = FuturesUnordered::new();

    for task in tasks {
        let client = client.clone();
        let referer = referer.map(str::to_string);
        let dir = dir.to_path_buf();
        let config = config.clone();
        let sniffer = Arc::clone(&sniffer);
        let counters = Arc::clone(&counters);
        let semaphore = Arc::clone(&semaphore);

        in_flight.push(tokio::spawn(async move {
            // Semaphore never closes while held here; acquire cannot fail.
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            let outcome =
                fetch_one(&client, &task, referer.as_deref(), &dir, &config, &sniffer).await;
            match &outcome {
                SegmentOutcome::Done(_) => counters.downloaded.fetch_add(1, Ordering::Relaxed),
                SegmentOutcome::Blocked => counters.blocked.fetch_add(1, Ordering::Relaxed),
                SegmentOutcome::Failed => counters.failed.fetch_add(1, Ordering::Relaxed),
            };
            (task.index, outcome)
        }));
    }

    let mut downloaded: Vec<(usize, PathBuf)> = Vec::with_capacity(total);
    while let Some(joined) = in_flight.next().await {
        let (index, outcome) = joined.map_err(|e| RelayError::Assembly {
            reason: format!("segment worker panicked: {e}"),
        })?;
        if let SegmentOutcome::Done(path) = outcome {
            downloaded.push((index, path));
        }
    }

    let (done, failed, blocked, _) = counters.snapshot();
    info!(
        downloaded = done,
        failed, blocked, total, "segment fetch phase complete"
    );
    debug_assert_eq!(done + failed + blocked, total);

    if blocked as f64 > config.blocked_abort_ratio * total as f64 {
        return Err(RelayError::StreamBlocked { blocked, total });
    }
    if (done as f64) < config.min_complete_ratio * total as f64 {
        return Err(RelayError::IncompleteDownload {
            downloaded: done,
            total,
        });
    }

    downloaded.sort_by_key(|(index, _)| *index);
    Ok(downloaded.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::DefaultSniffer;
    use axum::Router;
    use axum::extract::Path as AxumPath;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn test_config() -> EngineConfig {
        EngineConfig {
            segment_retry_delay_base: Duration::from_millis(10),
            ..EngineConfig::default()
        }
    }

    async fn spawn_upstream(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        addr
    }

    fn tasks_for(addr: SocketAddr, path: &str, count: usize) -> Vec<SegmentTask> {
        (0..count)
            .map(|i| SegmentTask {
                index: i,
                url: Url::parse(&format!("http://{addr}/{path}/{i}")).unwrap(),
            })
            .collect()
    }

    /// Segment bodies carry their index; later indexes respond faster, so
    /// completion order is roughly the reverse of playlist order.
    async fn reversed_latency_segment(AxumPath(i): AxumPath<usize>) -> Vec<u8> {
        let delay = 50u64.saturating_sub(i as u64 * 3);
        tokio::time::sleep(Duration::from_millis(delay)).await;
        format!("segment-{i:05}").into_bytes()
    }

    #[tokio::test]
    async fn output_order_matches_playlist_order_not_completion_order() {
        let app = Router::new().route("/seg/{i}", get(reversed_latency_segment));
        let addr = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(JobCounters::default());
        let files = fetch_segments(
            &Client::new(),
            tasks_for(addr, "seg", 12),
            None,
            dir.path(),
            Arc::clone(&counters),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap();

        assert_eq!(files.len(), 12);
        for (i, path) in files.iter().enumerate() {
            let body = std::fs::read_to_string(path).unwrap();
            assert_eq!(body, format!("segment-{i:05}"));
        }
        assert_eq!(counters.downloaded.load(Ordering::Relaxed), 12);
    }

    #[tokio::test]
    async fn majority_blocked_aborts_with_stream_blocked() {
        // Even indexes plus index 1 are forbidden: 6 of 10 blocked.
        async fn handler(AxumPath(i): AxumPath<usize>) -> impl IntoResponse {
            if i % 2 == 0 || i == 1 {
                (StatusCode::FORBIDDEN, Vec::new())
            } else {
                (StatusCode::OK, format!("segment-{i}").into_bytes())
            }
        }
        let app = Router::new().route("/seg/{i}", get(handler));
        let addr = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(JobCounters::default());
        let err = fetch_segments(
            &Client::new(),
            tasks_for(addr, "seg", 10),
            None,
            dir.path(),
            Arc::clone(&counters),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RelayError::StreamBlocked { blocked: 6, total: 10 }
        ));
        assert_eq!(counters.blocked.load(Ordering::Relaxed), 6);
    }

    #[tokio::test]
    async fn ninety_five_percent_success_still_succeeds() {
        // Segment 7 of 20 is permanently missing: 19/20 = 95% downloaded.
        async fn handler(AxumPath(i): AxumPath<usize>) -> impl IntoResponse {
            if i == 7 {
                (StatusCode::NOT_FOUND, Vec::new())
            } else {
                (StatusCode::OK, format!("segment-{i:05}").into_bytes())
            }
        }
        let app = Router::new().route("/seg/{i}", get(handler));
        let addr = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(JobCounters::default());
        let files = fetch_segments(
            &Client::new(),
            tasks_for(addr, "seg", 20),
            None,
            dir.path(),
            Arc::clone(&counters),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap();

        assert_eq!(files.len(), 19);
        // The gap does not disturb the ordering of what remains.
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(!names.contains(&"seg_00007.ts".to_string()));
    }

    #[tokio::test]
    async fn below_ninety_percent_fails_incomplete() {
        async fn handler(AxumPath(i): AxumPath<usize>) -> impl IntoResponse {
            if i < 3 {
                (StatusCode::NOT_FOUND, Vec::new())
            } else {
                (StatusCode::OK, format!("segment-{i}").into_bytes())
            }
        }
        let app = Router::new().route("/seg/{i}", get(handler));
        let addr = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let err = fetch_segments(
            &Client::new(),
            tasks_for(addr, "seg", 20),
            None,
            dir.path(),
            Arc::new(JobCounters::default()),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            RelayError::IncompleteDownload { downloaded: 17, total: 20 }
        ));
    }

    #[tokio::test]
    async fn blocked_segments_are_not_retried_but_failures_are() {
        use std::sync::atomic::AtomicUsize;

        static BLOCKED_HITS: AtomicUsize = AtomicUsize::new(0);
        static FAILED_HITS: AtomicUsize = AtomicUsize::new(0);

        async fn handler(AxumPath(i): AxumPath<usize>) -> impl IntoResponse {
            match i {
                0 => {
                    BLOCKED_HITS.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::FORBIDDEN, Vec::new())
                }
                1 => {
                    FAILED_HITS.fetch_add(1, Ordering::SeqCst);
                    (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
                }
                _ => (StatusCode::OK, format!("segment-{i}").into_bytes()),
            }
        }
        let app = Router::new().route("/seg/{i}", get(handler));
        let addr = spawn_upstream(app).await;

        let dir = tempfile::tempdir().unwrap();
        let counters = Arc::new(JobCounters::default());
        // 2 bad of 20: under both thresholds, so the job itself succeeds.
        let files = fetch_segments(
            &Client::new(),
            tasks_for(addr, "seg", 20),
            None,
            dir.path(),
            Arc::clone(&counters),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap();

        assert_eq!(files.len(), 18);
        assert_eq!(BLOCKED_HITS.load(Ordering::SeqCst), 1);
        assert_eq!(FAILED_HITS.load(Ordering::SeqCst), 3);
        assert_eq!(counters.blocked.load(Ordering::Relaxed), 1);
        assert_eq!(counters.failed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn empty_task_list_is_a_playlist_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = fetch_segments(
            &Client::new(),
            Vec::new(),
            None,
            dir.path(),
            Arc::new(JobCounters::default()),
            &test_config(),
            DefaultSniffer::shared(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, RelayError::Playlist { .. }));
    }
}
