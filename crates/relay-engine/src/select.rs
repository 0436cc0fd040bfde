//! Server selection with fallback.
//!
//! Candidates are probed sequentially, never concurrently, because only the
//! first usable server is kept and a probe is cheap next to the download that
//! follows it. Each probe is a lightweight GET classified as usable, blocked,
//! or failed; the search short-circuits on the first usable candidate.

use reqwest::Client;
use reqwest::StatusCode;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::EngineConfig;
use crate::error::{RelayError, Result};
use crate::headers::upstream_headers;
use crate::resolver::StreamSource;
use crate::sniff::BlockSniffer;

/// A candidate in fallback order. `priority` is the caller-visible index.
#[derive(Debug, Clone)]
pub struct CandidateServer {
    pub priority: usize,
    pub name: String,
    pub source: StreamSource,
}

/// Terminal classification of one probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Usable,
    Blocked(String),
    Failed(String),
}

/// Which candidate won, plus the probe trail for diagnostics.
#[derive(Debug, Clone)]
pub struct Selection {
    pub priority: usize,
    pub name: String,
    pub source: StreamSource,
    pub probes: Vec<(usize, ProbeOutcome)>,
}

/// Reorder candidates as `[preferred, then the rest in original order]`.
///
/// An out-of-range preferred index is treated as 0.
pub fn probe_order(candidates: &[CandidateServer], preferred: usize) -> Vec<&CandidateServer> {
    if candidates.is_empty() {
        return Vec::new();
    }
    let preferred = if preferred < candidates.len() {
        preferred
    } else {
        0
    };
    let mut order = Vec::with_capacity(candidates.len());
    order.push(&candidates[preferred]);
    order.extend(
        candidates
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != preferred)
            .map(|(_, c)| c),
    );
    order
}

async fn probe(
    client: &Client,
    candidate: &CandidateServer,
    config: &EngineConfig,
    sniffer: &dyn BlockSniffer,
) -> ProbeOutcome {
    let url = match Url::parse(&candidate.source.url) {
        Ok(url) => url,
        Err(e) => return ProbeOutcome::Failed(format!("invalid url: {e}")),
    };
    let headers = upstream_headers(&url, candidate.source.referer());

    let response = match client
        .get(url.clone())
        .headers(headers)
        .timeout(config.probe_timeout)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => return ProbeOutcome::Failed(format!("transport: {e}")),
    };

    let status = response.status();
    if status == StatusCode::FORBIDDEN {
        return ProbeOutcome::Blocked(format!("HTTP 403 from {url}"));
    }
    if !status.is_success() {
        return ProbeOutcome::Failed(format!("HTTP {status} from {url}"));
    }

    // Only the first window of the body matters for classification.
    match response.bytes().await {
        Ok(body) => match sniffer.sniff(&body) {
            Some(indicator) => ProbeOutcome::Blocked(format!("block page ({indicator}) at {url}")),
            None => ProbeOutcome::Usable,
        },
        Err(e) => ProbeOutcome::Failed(format!("body read: {e}")),
    }
}

/// Probe candidates in priority order and return the first usable one.
pub async fn select_server(
    client: &Client,
    candidates: &[CandidateServer],
    preferred: usize,
    config: &EngineConfig,
    sniffer: &dyn BlockSniffer,
) -> Result<Selection> {
    let order = probe_order(candidates, preferred);
    let mut probes = Vec::with_capacity(order.len());
    let mut last_reason = "no candidates".to_string();

    for candidate in order {
        debug!(
            priority = candidate.priority,
            server = %candidate.name,
            url = %candidate.source.url,
            "probing candidate server"
        );
        let outcome = probe(client, candidate, config, sniffer).await;
        probes.push((candidate.priority, outcome.clone()));

        match outcome {
            ProbeOutcome::Usable => {
                info!(
                    priority = candidate.priority,
                    server = %candidate.name,
                    "selected server"
                );
                return Ok(Selection {
                    priority: candidate.priority,
                    name: candidate.name.clone(),
                    source: candidate.source.clone(),
                    probes,
                });
            }
            ProbeOutcome::Blocked(reason) => {
                warn!(priority = candidate.priority, reason = %reason, "candidate blocked, trying next");
                last_reason = reason;
            }
            ProbeOutcome::Failed(reason) => {
                warn!(priority = candidate.priority, reason = %reason, "candidate failed, trying next");
                last_reason = reason;
            }
        }
    }

    Err(RelayError::AllServersUnavailable {
        attempts: probes.len(),
        last_reason,
    })
}
