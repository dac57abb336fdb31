//! STT Engine Interface & Core Types
//!
//! Defines the abstract contract for remote transcription engines, the
//! standardized transcript data structures shared across the pipeline,
//! and semantic error handling.

use crate::job::JobContext;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// ── Core Data Structures ────────────────────────────────

/// A single segment of transcribed text with timing.
///
/// Timestamps are seconds relative to the containing result's timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Short diarization label (e.g. "A"). The label namespace is local
    /// to one engine call; cross-chunk reconciliation happens in merge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A single word with timing, same timeline semantics as segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    pub start: f64,
    pub end: f64,
    pub word: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

/// The full result of a transcription task.
///
/// Later pipeline stages build new results rather than mutating earlier
/// ones; the value is moved forward through the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    /// The full transcribed text (concatenated segments).
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Detailed segments with timestamps, ordered by start.
    pub segments: Vec<TranscriptSegment>,
    /// Word-level timestamps where the engine provides them.
    #[serde(default)]
    pub word_segments: Vec<TranscriptWord>,
    /// Average decode confidence (0.0–1.0), if available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Identifier of the model that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Wall-clock processing duration in seconds.
    #[serde(default)]
    pub processing_time_secs: f64,
    /// Free-form annotations (`chunks_processed`, `ai_postprocessed`, ...).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A short reference clip for one diarized speaker, passed to later
/// chunk requests to bias the service toward consistent labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSample {
    pub speaker_label: String,
    /// Interval within the source chunk the clip was cut from.
    pub start_time: f64,
    pub end_time: f64,
    /// Extracted clip on disk. Removed by the sampler's cleanup.
    pub local_audio_path: PathBuf,
    /// `data:audio/mp3;base64,…` encoding of the clip bytes.
    pub data_url: String,
}

// ── Model Selection ─────────────────────────────────────

/// The remote transcription model families this adapter knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TranscriptionModel {
    /// Classic whisper endpoint: verbose JSON with word + segment timestamps.
    #[default]
    Whisper,
    /// GPT-4o transcription: plain-text JSON only.
    Gpt4oTranscribe,
    Gpt4oMiniTranscribe,
    /// GPT-4o diarizing transcription: per-segment speaker labels.
    Gpt4oDiarize,
}

impl TranscriptionModel {
    /// Parse the externally-facing model parameter. Unknown values fall
    /// back to the standard whisper model.
    pub fn from_param(value: &str) -> Self {
        match value {
            "gpt4o-transcribe" => Self::Gpt4oTranscribe,
            "gpt4o-mini-transcribe" => Self::Gpt4oMiniTranscribe,
            "gpt4o-diarize" => Self::Gpt4oDiarize,
            _ => Self::Whisper,
        }
    }

    /// Model identifier sent on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Whisper => "whisper-1",
            Self::Gpt4oTranscribe => "gpt-4o-transcribe",
            Self::Gpt4oMiniTranscribe => "gpt-4o-mini-transcribe",
            Self::Gpt4oDiarize => "gpt-4o-transcribe-diarize",
        }
    }

    /// `response_format` the endpoint expects for this model.
    pub fn response_format(&self) -> &'static str {
        match self {
            Self::Whisper => "verbose_json",
            Self::Gpt4oTranscribe | Self::Gpt4oMiniTranscribe => "json",
            Self::Gpt4oDiarize => "diarized_json",
        }
    }

    pub fn supports_diarization(&self) -> bool {
        matches!(self, Self::Gpt4oDiarize)
    }

    /// Longest chunk the model handles reliably. The diarize family
    /// truncates output near 10 minutes of speech (2,000-token response
    /// budget), so it gets a much lower ceiling than the nominal 25-min
    /// request limit.
    pub fn max_chunk_minutes(&self) -> f64 {
        if self.supports_diarization() {
            5.0
        } else {
            25.0
        }
    }
}

// ── Request Parameters ──────────────────────────────────

/// Per-call transcription parameters.
#[derive(Debug, Clone, Default)]
pub struct TranscribeParams {
    /// Overrides the engine-level credential when set.
    pub api_key: Option<String>,
    pub model: TranscriptionModel,
    /// ISO-639-1 language hint.
    pub language: Option<String>,
    /// Context text to bias decoding.
    pub prompt: Option<String>,
    /// Sampling temperature in [0, 1]; 0 when unset.
    pub temperature: Option<f32>,
    /// Cross-chunk speaker-identity hints.
    pub speaker_references: Vec<SpeakerSample>,
}

// ── Error Handling ─────────────────────────────────────

#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Network failure, including exhausted retries.
    #[error("transport failure: {0}")]
    Transport(String),
    /// HTTP non-2xx from the service.
    #[error("service returned HTTP {status}: {body}")]
    Remote { status: u16, body: String },
    /// Body did not parse or violated the expected shape.
    #[error("unexpected response shape: {0}")]
    Protocol(String),
    #[error("transcription cancelled")]
    Cancelled,
}

// ── Engine Trait ───────────────────────────────────────

/// Abstract interface for a transcription backend.
#[async_trait]
pub trait SttEngine: Send + Sync {
    /// Unique identifier for this engine instance.
    fn id(&self) -> String;

    /// Check if the engine is ready (e.g. credential present).
    async fn is_available(&self) -> bool;

    /// Transcribe one audio file. `job` carries identity and the
    /// diagnostic-log directory; `cancel` aborts in-flight work.
    async fn transcribe(
        &self,
        audio_path: &Path,
        params: &TranscribeParams,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<TranscriptResult, TranscribeError>;
}
