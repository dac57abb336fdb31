//! Audio splitting for bounded remote transcription requests.
//!
//! The remote service caps a request at 25 MB / 25 min, so long inputs
//! are cut into re-encoded segments with absolute time offsets. Chunk
//! duration adapts to the source bitrate so projected chunk bytes stay
//! comfortably under the ceiling.

use super::probe::probe_duration;
use super::tools::{run_tool, ToolError};
use crate::job::JobContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Hard per-request body limit of the remote service.
pub const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;
/// Per-chunk byte target; deliberately under the service ceiling so
/// container overhead and bitrate variance cannot push a chunk over.
const TARGET_CHUNK_BYTES: u64 = 20 * 1024 * 1024;
/// Chunks shorter than this are rejected by the service as corrupted.
pub const MIN_CHUNK_SECS: f64 = 1.0;
/// Clamp bounds for the adaptive segment duration.
const MIN_SEGMENT_SECS: f64 = 60.0;
const MAX_SEGMENT_SECS: f64 = 300.0;

// ── Types ───────────────────────────────────────────────

/// Immutable descriptor of the source audio file.
#[derive(Debug, Clone)]
pub struct AudioInput {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub duration_secs: f64,
    /// Optional source metadata; `bitrate` (bits/s) refines chunk sizing.
    pub metadata: HashMap<String, String>,
}

impl AudioInput {
    pub fn bitrate_bps(&self) -> Option<f64> {
        self.metadata
            .get("bitrate")
            .and_then(|b| b.parse::<f64>().ok())
            .filter(|b| *b > 0.0)
    }
}

/// One chunk emitted by the splitter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub path: PathBuf,
    /// Seconds from the start of the original audio.
    pub start_time: f64,
    pub duration: f64,
    /// Dense, sorted sequence position.
    pub original_index: usize,
}

#[derive(Debug, Clone)]
pub struct SplitResult {
    pub chunks: Vec<ChunkInfo>,
    pub needs_split: bool,
    pub original_path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// External binary missing or unusable.
    #[error("environment: {0}")]
    Environment(String),
    /// The cutter process failed.
    #[error("split failed: {0}")]
    Process(String),
    #[error("no usable chunks produced")]
    NoUsableChunks,
    #[error("split cancelled")]
    Cancelled,
}

impl From<ToolError> for SplitError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Missing(_) => SplitError::Environment(e.to_string()),
            ToolError::Cancelled => SplitError::Cancelled,
            ToolError::Failed { .. } | ToolError::Io { .. } => SplitError::Process(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitterConfig {
    /// Root for per-job chunk directories.
    #[serde(default = "default_temp_root")]
    pub temp_root: PathBuf,
    /// Target chunk duration in minutes before bitrate adaptation.
    #[serde(default = "default_chunk_minutes")]
    pub chunk_minutes: f64,
}

fn default_temp_root() -> PathBuf {
    std::env::temp_dir().join("longscribe")
}

fn default_chunk_minutes() -> f64 {
    5.0
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            temp_root: default_temp_root(),
            chunk_minutes: default_chunk_minutes(),
        }
    }
}

// ── Splitter Trait ─────────────────────────────────────

/// Abstract splitter seam; production uses [`FfmpegSplitter`].
#[async_trait]
pub trait AudioSplitter: Send + Sync {
    /// Split `input` when it exceeds the size ceiling or
    /// `max_minutes`; otherwise return the single-chunk passthrough.
    async fn split(
        &self,
        input: &AudioInput,
        max_minutes: f64,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<SplitResult, SplitError>;

    /// Remove chunk files and their directory. Idempotent; must not
    /// assume the split succeeded.
    async fn cleanup(&self, result: &SplitResult);
}

// ── Planning (pure) ────────────────────────────────────

/// Segment duration in seconds: the configured target, lowered so
/// projected bytes per chunk stay ≤ 20 MB when the bitrate is known,
/// clamped to [60, 300].
pub fn plan_segment_secs(chunk_minutes: f64, bitrate_bps: Option<f64>) -> f64 {
    let mut target = chunk_minutes * 60.0;
    if let Some(bitrate) = bitrate_bps {
        let cap = (TARGET_CHUNK_BYTES * 8) as f64 / bitrate;
        target = target.min(cap);
    }
    target.clamp(MIN_SEGMENT_SECS, MAX_SEGMENT_SECS)
}

/// Parse the numeric suffix of `chunk_NNN.mp3`. Files that do not
/// match are ignored by the enumerator.
fn parse_chunk_index(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("chunk_")?
        .strip_suffix(".mp3")?
        .parse()
        .ok()
}

/// Drop sub-second chunks, returning kept (reindexed dense) and
/// dropped. Offsets are preserved from the probe pass.
fn filter_degenerate(chunks: Vec<ChunkInfo>) -> (Vec<ChunkInfo>, Vec<ChunkInfo>) {
    let (kept, dropped): (Vec<_>, Vec<_>) = chunks
        .into_iter()
        .partition(|c| c.duration >= MIN_CHUNK_SECS);
    let kept = kept
        .into_iter()
        .enumerate()
        .map(|(i, mut c)| {
            c.original_index = i;
            c
        })
        .collect();
    (kept, dropped)
}

// ── Ffmpeg Splitter ────────────────────────────────────

pub struct FfmpegSplitter {
    config: SplitterConfig,
}

impl FfmpegSplitter {
    pub fn new(config: SplitterConfig) -> Self {
        Self { config }
    }

    fn chunk_dir(&self, job: &JobContext) -> PathBuf {
        self.config.temp_root.join(&job.job_id).join("chunks")
    }
}

#[async_trait]
impl AudioSplitter for FfmpegSplitter {
    async fn split(
        &self,
        input: &AudioInput,
        max_minutes: f64,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<SplitResult, SplitError> {
        if input.duration_secs <= 0.0 {
            return Err(SplitError::InvalidInput(
                "audio duration must be positive".to_string(),
            ));
        }
        if !input.path.exists() {
            return Err(SplitError::InvalidInput(format!(
                "audio file not found: {}",
                input.path.display()
            )));
        }

        let log = job.log();
        let needs_split = input.size_bytes > MAX_UPLOAD_BYTES
            || input.duration_secs > max_minutes * 60.0;
        if !needs_split {
            log.append(&format!(
                "no split needed: {} bytes, {:.1}s",
                input.size_bytes, input.duration_secs
            ));
            return Ok(SplitResult {
                chunks: vec![ChunkInfo {
                    path: input.path.clone(),
                    start_time: 0.0,
                    duration: input.duration_secs,
                    original_index: 0,
                }],
                needs_split: false,
                original_path: input.path.clone(),
            });
        }

        let segment_secs = plan_segment_secs(self.config.chunk_minutes, input.bitrate_bps());
        let chunk_dir = self.chunk_dir(job);
        std::fs::create_dir_all(&chunk_dir)
            .map_err(|e| SplitError::Process(format!("create {}: {}", chunk_dir.display(), e)))?;

        log.append(&format!(
            "splitting {} ({} bytes, {:.1}s) into ~{:.0}s segments",
            input.path.display(),
            input.size_bytes,
            input.duration_secs,
            segment_secs
        ));

        // Re-encode rather than stream-copy: copied frames break at
        // non-frame boundaries on compressed sources and the service
        // then spends an order of magnitude longer decoding them.
        let pattern = chunk_dir.join("chunk_%03d.mp3");
        let args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            input.path.to_string_lossy().to_string(),
            "-f".to_string(),
            "segment".to_string(),
            "-segment_time".to_string(),
            format!("{}", segment_secs),
            "-reset_timestamps".to_string(),
            "1".to_string(),
            "-map".to_string(),
            "0:a".to_string(),
            "-ar".to_string(),
            "16000".to_string(),
            "-ac".to_string(),
            "1".to_string(),
            "-c:a".to_string(),
            "libmp3lame".to_string(),
            "-b:a".to_string(),
            "64k".to_string(),
            pattern.to_string_lossy().to_string(),
        ];
        run_tool("ffmpeg", &args, cancel).await?;

        // Enumerate what ffmpeg actually wrote and order by suffix.
        let mut indexed: Vec<(usize, PathBuf)> = Vec::new();
        let entries = std::fs::read_dir(&chunk_dir)
            .map_err(|e| SplitError::Process(format!("read {}: {}", chunk_dir.display(), e)))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(index) = parse_chunk_index(&name) {
                indexed.push((index, entry.path()));
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        if indexed.is_empty() {
            return Err(SplitError::NoUsableChunks);
        }

        // Probe real durations; estimate on probe failure (the last
        // chunk gets the remainder).
        let chunk_count = indexed.len();
        let mut durations = Vec::with_capacity(chunk_count);
        let mut cumulative = 0.0f64;
        for (position, (_, path)) in indexed.iter().enumerate() {
            let duration = match probe_duration(path, cancel).await {
                Ok(d) => d,
                Err(ToolError::Cancelled) => return Err(SplitError::Cancelled),
                Err(e) => {
                    warn!("probe failed for {}: {} — estimating", path.display(), e);
                    if position + 1 == chunk_count {
                        (input.duration_secs - cumulative).max(0.0)
                    } else {
                        segment_secs
                    }
                }
            };
            cumulative += duration;
            durations.push(duration);
        }

        let mut offset = 0.0f64;
        let chunks: Vec<ChunkInfo> = indexed
            .into_iter()
            .zip(durations)
            .enumerate()
            .map(|(i, ((_, path), duration))| {
                let chunk = ChunkInfo {
                    path,
                    start_time: offset,
                    duration,
                    original_index: i,
                };
                offset += duration;
                chunk
            })
            .collect();

        let (kept, dropped) = filter_degenerate(chunks);
        for chunk in &dropped {
            log.append(&format!(
                "dropping degenerate chunk {} ({:.3}s)",
                chunk.path.display(),
                chunk.duration
            ));
            let _ = std::fs::remove_file(&chunk.path);
        }
        if kept.is_empty() {
            return Err(SplitError::NoUsableChunks);
        }

        info!(
            "split {} into {} chunk(s) (~{:.0}s each, {} dropped)",
            input.path.display(),
            kept.len(),
            segment_secs,
            dropped.len()
        );
        log.append(&format!("split produced {} usable chunk(s)", kept.len()));

        Ok(SplitResult {
            chunks: kept,
            needs_split: true,
            original_path: input.path.clone(),
        })
    }

    async fn cleanup(&self, result: &SplitResult) {
        for chunk in &result.chunks {
            if chunk.path != result.original_path {
                let _ = std::fs::remove_file(&chunk.path);
            }
        }
        // Remove the chunks dir and its job parent; both may hold
        // leftovers from an aborted run, so errors are ignored.
        if let Some(first) = result.chunks.iter().find(|c| c.path != result.original_path) {
            if let Some(chunk_dir) = first.path.parent() {
                let _ = std::fs::remove_dir(chunk_dir);
                if let Some(job_dir) = chunk_dir.parent() {
                    let _ = std::fs::remove_dir(job_dir);
                }
            }
        }
    }
}
