//! Segment assembly.
//!
//! Multiplexes downloaded segments into one deliverable file. Strategies are
//! an explicit ordered list, tried in sequence:
//!
//! 1. ffmpeg concat demuxer, stream-copy remux into MP4 (ADTS audio framing
//!    fixed up for the container),
//! 2. raw binary concatenation of all segments, then a second remux pass over
//!    the joined file,
//! 3. the joined raw file itself, served with a `.ts` extension, a playable
//!    but unoptimized result beats no result.
//!
//! Every muxer invocation runs under a timeout; a timeout counts as a process
//! failure and falls through to the next tier.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp4,
    MpegTs,
}

impl Container {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::MpegTs => "ts",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Mp4 => "video/mp4",
            Self::MpegTs => "video/mp2t",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AssembledFile {
    pub path: PathBuf,
    pub container: Container,
}

#[derive(Debug, Clone, Copy)]
enum Strategy {
    ConcatDemux,
    RemuxJoined,
    RawJoined,
}

const STRATEGIES: &[Strategy] = &[
    Strategy::ConcatDemux,
    Strategy::RemuxJoined,
    Strategy::RawJoined,
];

/// Escape a path for an ffmpeg concat list entry.
///
/// The concat demuxer quotes with single quotes; embedded single quotes are
/// closed, escaped, and reopened.
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', "'\\''");
    format!("file '{escaped}'\n")
}

async fn write_concat_list(segments: &[PathBuf], list_path: &Path) -> Result<()> {
    let mut body = String::with_capacity(segments.len() * 32);
    for segment in segments {
        body.push_str(&concat_list_entry(segment));
    }
    tokio::fs::write(list_path, body).await?;
    Ok(())
}

/// Binary-concatenate all segments into `joined`, creating it if needed.
async fn join_segments(segments: &[PathBuf], joined: &Path) -> Result<()> {
    let mut out = tokio::fs::File::create(joined).await?;
    for segment in segments {
        let bytes = tokio::fs::read(segment).await?;
        out.write_all(&bytes).await?;
    }
    out.flush().await?;
    Ok(())
}

/// Run one ffmpeg invocation under the configured timeout.
///
/// Any failure mode (spawn error, non-zero exit, timeout) comes back as an
/// error so the caller can fall through to the next tier.
async fn run_muxer(config: &EngineConfig, args: &[&str]) -> Result<()> {
    debug!(ffmpeg = %config.ffmpeg_path, ?args, "invoking muxer");
    let mut child = Command::new(&config.ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(config.mux_timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(RelayError::assembly(format!(
            "muxer exited with {status}"
        ))),
        Ok(Err(e)) => Err(RelayError::from(e)),
        Err(_) => {
            let _ = child.kill().await;
            Err(RelayError::Timeout {
                reason: format!("muxer exceeded {:?}", config.mux_timeout),
            })
        }
    }
}

/// A produced file counts only if it exists and is non-empty.
async fn output_is_valid(path: &Path) -> bool {
    match tokio::fs::metadata(path).await {
        Ok(meta) => meta.len() > 0,
        Err(_) => false,
    }
}

async fn try_strategy(
    strategy: Strategy,
    segments: &[PathBuf],
    work_dir: &Path,
    output_stem: &str,
    config: &EngineConfig,
) -> Result<AssembledFile> {
    let mp4_path = work_dir.join(format!("{output_stem}.mp4"));
    let joined_path = work_dir.join(format!("{output_stem}.joined.ts"));

    match strategy {
        Strategy::ConcatDemux => {
            let list_path = work_dir.join("concat.txt");
            write_concat_list(segments, &list_path).await?;
            let list = list_path.to_string_lossy().into_owned();
            let out = mp4_path.to_string_lossy().into_owned();
            run_muxer(
                config,
                &[
                    "-y", "-hide_banner", "-f", "concat", "-safe", "0", "-i", &list, "-c", "copy",
                    "-bsf:a", "aac_adtstoasc", &out,
                ],
            )
            .await?;
            if !output_is_valid(&mp4_path).await {
                return Err(RelayError::assembly("concat demux produced no output"));
            }
            Ok(AssembledFile {
                path: mp4_path,
                container: Container::Mp4,
            })
        }
        Strategy::RemuxJoined => {
            join_segments(segments, &joined_path).await?;
            let joined = joined_path.to_string_lossy().into_owned();
            let out = mp4_path.to_string_lossy().into_owned();
            run_muxer(
                config,
                &[
                    "-y", "-hide_banner", "-i", &joined, "-c", "copy", "-bsf:a", "aac_adtstoasc",
                    &out,
                ],
            )
            .await?;
            if !output_is_valid(&mp4_path).await {
                return Err(RelayError::assembly("joined remux produced no output"));
            }
            Ok(AssembledFile {
                path: mp4_path,
                container: Container::Mp4,
            })
        }
        Strategy::RawJoined => {
            if !output_is_valid(&joined_path).await {
                join_segments(segments, &joined_path).await?;
            }
            if !output_is_valid(&joined_path).await {
                return Err(RelayError::assembly("raw concatenation produced no output"));
            }
            Ok(AssembledFile {
                path: joined_path,
                container: Container::MpegTs,
            })
        }
    }
}

/// Assemble ordered segment files into one deliverable inside `work_dir`.
pub async fn assemble(
    segments: &[PathBuf],
    work_dir: &Path,
    output_stem: &str,
    config: &EngineConfig,
) -> Result<AssembledFile> {
    if segments.is_empty() {
        return Err(RelayError::assembly("no segments to assemble"));
    }

    let mut last_error = None;
    for strategy in STRATEGIES {
        match try_strategy(*strategy, segments, work_dir, output_stem, config).await {
            Ok(assembled) => {
                info!(
                    path = %assembled.path.display(),
                    container = assembled.container.extension(),
                    strategy = ?strategy,
                    "assembly complete"
                );
                return Ok(assembled);
            }
            Err(e) => {
                warn!(strategy = ?strategy, error = %e, "assembly strategy failed, trying next");
                last_error = Some(e);
            }
        }
    }

    Err(RelayError::assembly(format!(
        "all assembly strategies failed; last: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    )))
}
