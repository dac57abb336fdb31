//! Speaker-reference extraction.
//!
//! Diarized chunk output assigns speaker labels locally per request:
//! the same voice can be "A" in chunk 0 and "B" in chunk 1. The
//! sampler cuts a short reference clip per distinct label from the
//! first chunk's result; later requests carry those clips so the
//! service keeps labels consistent.

use crate::job::JobContext;
use crate::media::tools::{run_tool, ToolError};
use crate::stt::interface::{SpeakerSample, TranscriptResult, TranscriptSegment};
use async_trait::async_trait;
use base64::Engine;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Usable reference clips are 2–10 s; shorter ones carry too little
/// voice, longer ones waste request budget.
const MIN_REF_SECS: f64 = 2.0;
const MAX_REF_SECS: f64 = 10.0;
/// Max silence bridged when concatenating short segments.
const MAX_GAP_SECS: f64 = 1.0;
/// Above this the service may reject the reference outright.
const DATA_URL_WARN_BYTES: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("sample extraction failed: {0}")]
    Process(String),
    #[error("io: {0}")]
    Io(String),
    #[error("sampling cancelled")]
    Cancelled,
}

impl From<ToolError> for SampleError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::Cancelled => SampleError::Cancelled,
            other => SampleError::Process(other.to_string()),
        }
    }
}

// ── Window Selection (pure) ─────────────────────────────

/// Pick the interval to cut for one speaker, from that speaker's
/// segments:
///
/// 1. The longest segment already inside [2 s, 10 s], if any.
/// 2. Otherwise the longest segment, tail-trimmed to 10 s when longer.
/// 3. Otherwise a run of near-consecutive segments (gaps ≤ 1 s)
///    spanning at least 2 s, trimmed to 10 s.
///
/// Returns `None` when no window reaches 2 s.
pub fn select_reference_window(segments: &[&TranscriptSegment]) -> Option<(f64, f64)> {
    if segments.is_empty() {
        return None;
    }

    let mut by_duration: Vec<&TranscriptSegment> = segments.to_vec();
    by_duration.sort_by(|a, b| {
        let da = a.end - a.start;
        let db = b.end - b.start;
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });

    if let Some(ideal) = by_duration
        .iter()
        .find(|s| (MIN_REF_SECS..=MAX_REF_SECS).contains(&(s.end - s.start)))
    {
        return Some((ideal.start, ideal.end));
    }

    let longest = by_duration[0];
    let longest_duration = longest.end - longest.start;
    if longest_duration > MAX_REF_SECS {
        return Some((longest.start, longest.start + MAX_REF_SECS));
    }

    // Everything is under 2 s: stitch consecutive fragments.
    let mut by_start: Vec<&TranscriptSegment> = segments.to_vec();
    by_start.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));

    let mut run_start = by_start[0].start;
    let mut run_end = by_start[0].end;
    for segment in &by_start[1..] {
        if segment.start - run_end > MAX_GAP_SECS {
            run_start = segment.start;
            run_end = segment.end;
        } else {
            run_end = run_end.max(segment.end);
        }
        if run_end - run_start >= MIN_REF_SECS {
            break;
        }
    }

    let span = run_end - run_start;
    if span < MIN_REF_SECS {
        return None;
    }
    Some((run_start, run_start + span.min(MAX_REF_SECS)))
}

/// Segments grouped by non-empty speaker label, label-ordered.
fn group_by_speaker(result: &TranscriptResult) -> BTreeMap<String, Vec<&TranscriptSegment>> {
    let mut groups: BTreeMap<String, Vec<&TranscriptSegment>> = BTreeMap::new();
    for segment in &result.segments {
        if let Some(label) = segment.speaker.as_deref() {
            if !label.is_empty() {
                groups.entry(label.to_string()).or_default().push(segment);
            }
        }
    }
    groups
}

/// Encode clip bytes as a self-describing data URL for the request body.
pub fn encode_data_url(bytes: &[u8]) -> String {
    format!(
        "data:audio/mp3;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Recover the raw bytes from a data URL produced by [`encode_data_url`].
pub fn decode_data_url(url: &str) -> Option<Vec<u8>> {
    let b64 = url.strip_prefix("data:audio/mp3;base64,")?;
    base64::engine::general_purpose::STANDARD.decode(b64).ok()
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

// ── Sampler ─────────────────────────────────────────────

/// Abstract sampler seam; production uses [`FfmpegSpeakerSampler`].
#[async_trait]
pub trait SpeakerSampler: Send + Sync {
    /// Extract one reference clip per distinct speaker from the first
    /// chunk's diarized result. Speakers without a usable window are
    /// skipped; an empty result disables reference passing.
    async fn extract(
        &self,
        chunk_path: &Path,
        result: &TranscriptResult,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<SpeakerSample>, SampleError>;

    /// Delete extracted clip files. Idempotent.
    async fn cleanup(&self, samples: &[SpeakerSample]);
}

pub struct FfmpegSpeakerSampler;

impl FfmpegSpeakerSampler {
    pub fn new() -> Self {
        Self
    }

    fn samples_dir(job: &JobContext) -> PathBuf {
        job.output_dir.join("speaker_samples")
    }
}

impl Default for FfmpegSpeakerSampler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeakerSampler for FfmpegSpeakerSampler {
    async fn extract(
        &self,
        chunk_path: &Path,
        result: &TranscriptResult,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<SpeakerSample>, SampleError> {
        let groups = group_by_speaker(result);
        if groups.is_empty() {
            return Ok(Vec::new());
        }

        let dir = Self::samples_dir(job);
        std::fs::create_dir_all(&dir)
            .map_err(|e| SampleError::Io(format!("create {}: {}", dir.display(), e)))?;

        let log = job.log();
        let mut samples = Vec::new();
        for (label, segments) in groups {
            if cancel.is_cancelled() {
                return Err(SampleError::Cancelled);
            }
            let Some((start, end)) = select_reference_window(&segments) else {
                log.append(&format!(
                    "speaker {}: no usable reference window, skipping",
                    label
                ));
                continue;
            };

            let clip_path = dir.join(format!("speaker_{}.mp3", sanitize_label(&label)));
            let args = vec![
                "-hide_banner".to_string(),
                "-loglevel".to_string(),
                "error".to_string(),
                "-y".to_string(),
                "-i".to_string(),
                chunk_path.to_string_lossy().to_string(),
                "-ss".to_string(),
                format!("{:.3}", start),
                "-t".to_string(),
                format!("{:.3}", end - start),
                "-ar".to_string(),
                "16000".to_string(),
                "-ac".to_string(),
                "1".to_string(),
                "-c:a".to_string(),
                "libmp3lame".to_string(),
                "-b:a".to_string(),
                "64k".to_string(),
                clip_path.to_string_lossy().to_string(),
            ];
            match run_tool("ffmpeg", &args, cancel).await {
                Ok(_) => {}
                Err(ToolError::Cancelled) => return Err(SampleError::Cancelled),
                Err(e) => {
                    warn!("reference extraction for speaker {} failed: {}", label, e);
                    log.append(&format!("speaker {}: extraction failed: {}", label, e));
                    continue;
                }
            }

            let bytes = std::fs::read(&clip_path)
                .map_err(|e| SampleError::Io(format!("read {}: {}", clip_path.display(), e)))?;
            let data_url = encode_data_url(&bytes);
            if data_url.len() > DATA_URL_WARN_BYTES {
                warn!(
                    "speaker {} reference is {} bytes encoded; service may reject it",
                    label,
                    data_url.len()
                );
                log.append(&format!(
                    "speaker {}: reference data URL is {} bytes (over 1 MB)",
                    label,
                    data_url.len()
                ));
            }

            log.append(&format!(
                "speaker {}: reference clip {:.1}s-{:.1}s ({} bytes)",
                label,
                start,
                end,
                bytes.len()
            ));
            samples.push(SpeakerSample {
                speaker_label: label,
                start_time: start,
                end_time: end,
                local_audio_path: clip_path,
                data_url,
            });
        }

        info!(
            "extracted {} speaker reference(s) from {}",
            samples.len(),
            chunk_path.display()
        );
        Ok(samples)
    }

    async fn cleanup(&self, samples: &[SpeakerSample]) {
        for sample in samples {
            let _ = std::fs::remove_file(&sample.local_audio_path);
        }
        if let Some(dir) = samples
            .first()
            .and_then(|s| s.local_audio_path.parent())
        {
            let _ = std::fs::remove_dir(dir);
        }
    }
}
