//! Engine configuration.
//!
//! All knobs have safe defaults; `from_env_or_default` overrides the ones an
//! operator actually tunes in practice.

use std::time::Duration;

/// Relay endpoint paths baked into rewritten playlists.
///
/// The rewriter produces URLs under these paths; the server must mount its
/// handlers at the same locations.
#[derive(Debug, Clone)]
pub struct RelayEndpoints {
    pub playlist: String,
    pub segment: String,
}

impl Default for RelayEndpoints {
    fn default() -> Self {
        Self {
            playlist: "/relay/playlist".to_string(),
            segment: "/relay/segment".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Relay endpoint paths used when rewriting playlists.
    pub endpoints: RelayEndpoints,
    /// Maximum concurrent segment downloads per job.
    pub segment_concurrency: usize,
    /// Attempts per segment (first try included).
    pub segment_attempts: u32,
    /// Base delay for exponential backoff between segment attempts.
    pub segment_retry_delay_base: Duration,
    /// Timeout for a single segment fetch attempt.
    pub segment_timeout: Duration,
    /// Timeout for playlist and key fetches.
    pub playlist_timeout: Duration,
    /// Timeout for a single server probe.
    pub probe_timeout: Duration,
    /// Timeout for one external muxer invocation.
    pub mux_timeout: Duration,
    /// Jobs with more than this fraction of blocked segments abort.
    pub blocked_abort_ratio: f64,
    /// Jobs must download at least this fraction of segments to assemble.
    pub min_complete_ratio: f64,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            endpoints: RelayEndpoints::default(),
            segment_concurrency: 100,
            segment_attempts: 3,
            segment_retry_delay_base: Duration::from_millis(500),
            segment_timeout: Duration::from_secs(30),
            playlist_timeout: Duration::from_secs(15),
            probe_timeout: Duration::from_secs(8),
            mux_timeout: Duration::from_secs(300),
            blocked_abort_ratio: 0.5,
            min_complete_ratio: 0.9,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load engine config from environment variables, falling back to defaults.
    ///
    /// Supported env vars:
    /// - `RELAY_SEGMENT_CONCURRENCY` (e.g. "50")
    /// - `RELAY_FFMPEG_PATH` (e.g. "/usr/local/bin/ffmpeg")
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(concurrency) = std::env::var("RELAY_SEGMENT_CONCURRENCY")
            && let Ok(parsed) = concurrency.parse::<usize>()
            && parsed > 0
        {
            config.segment_concurrency = parsed;
        }

        if let Ok(path) = std::env::var("RELAY_FFMPEG_PATH")
            && !path.trim().is_empty()
        {
            config.ffmpeg_path = path;
        }

        config
    }
}
