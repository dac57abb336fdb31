//! OpenAI-compatible transcription adapter.
//!
//! Uses the Audio Transcription API (`/v1/audio/transcriptions`) with a
//! multipart upload per chunk. Handles the three response shapes the
//! service produces (`verbose_json`, `json`, `diarized_json`), carries
//! cross-chunk speaker-reference hints, and retries transient network
//! failures with a fully rebuilt body per attempt.

use super::config::TranscriberConfig;
use super::interface::{
    SpeakerSample, SttEngine, TranscribeError, TranscribeParams, TranscriptResult,
    TranscriptSegment, TranscriptWord, TranscriptionModel,
};
use crate::job::JobContext;
use crate::utils::http::{request_with_retry, RetryError};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Longest body snippet attached to a `Remote` error.
const ERROR_BODY_SNIPPET: usize = 500;

pub struct OpenAITranscriber {
    provider_id: String,
    client: reqwest::Client,
    config: TranscriberConfig,
}

impl OpenAITranscriber {
    pub fn new(config: TranscriberConfig) -> Result<Self, TranscribeError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs));
        // The service front-end kills long-running HTTP/2 uploads
        // mid-stream; stay on HTTP/1.1 unless explicitly allowed.
        if config.http1_only {
            builder = builder.http1_only();
        }
        let client = builder
            .build()
            .map_err(|e| TranscribeError::InvalidInput(format!("http client: {}", e)))?;
        Ok(Self {
            provider_id: "openai".to_string(),
            client,
            config,
        })
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.provider_id = id.into();
        self
    }

    fn resolve_key(&self, params: &TranscribeParams) -> Result<String, TranscribeError> {
        params
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| self.config.resolve_api_key())
            .ok_or_else(|| TranscribeError::InvalidInput("missing API key".to_string()))
    }

    /// Build the multipart body. Called once per attempt: a consumed
    /// form cannot be replayed, so retries re-encode from the bytes.
    fn build_form(
        &self,
        audio_bytes: &[u8],
        audio_path: &Path,
        params: &TranscribeParams,
    ) -> multipart::Form {
        let file_name = audio_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio.mp3".to_string());
        let ext = audio_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_else(|| "mp3".to_string());

        let file_part = match multipart::Part::bytes(audio_bytes.to_vec())
            .file_name(file_name.clone())
            .mime_str(&format!("audio/{}", mime_subtype(&ext)))
        {
            Ok(part) => part,
            // The subtype table only yields valid MIME strings; fall
            // back to an untyped part rather than failing the upload.
            Err(_) => multipart::Part::bytes(audio_bytes.to_vec()).file_name(file_name),
        };

        let model = params.model;
        let mut form = multipart::Form::new()
            .part("file", file_part)
            .text("model", model.wire_name().to_string())
            .text(
                "temperature",
                params.temperature.unwrap_or(0.0).to_string(),
            )
            .text("response_format", model.response_format().to_string());

        if let Some(ref lang) = params.language {
            form = form.text("language", lang.clone());
        }
        if let Some(ref prompt) = params.prompt {
            form = form.text("prompt", prompt.clone());
        }

        match model {
            TranscriptionModel::Whisper => {
                form = form
                    .text("timestamp_granularities[]", "word".to_string())
                    .text("timestamp_granularities[]", "segment".to_string());
            }
            TranscriptionModel::Gpt4oDiarize => {
                form = form.text("chunking_strategy", "auto".to_string());
            }
            _ => {}
        }

        // References attach whenever the caller supplied them; which
        // models honor them is the service's concern, not the form's.
        append_speaker_references(form, &params.speaker_references)
    }
}

/// Attach speaker-identity hints with bracketed indices. The endpoint
/// matches names to references positionally, so the field names must be
/// `known_speaker_names[0]`, `known_speaker_references[0]`, and so on,
/// not the repeated `[]` form.
fn append_speaker_references(
    mut form: multipart::Form,
    references: &[SpeakerSample],
) -> multipart::Form {
    for (i, sample) in references.iter().enumerate() {
        form = form
            .text(
                format!("known_speaker_names[{}]", i),
                sample.speaker_label.clone(),
            )
            .text(
                format!("known_speaker_references[{}]", i),
                sample.data_url.clone(),
            );
    }
    form
}

fn mime_subtype(ext: &str) -> &str {
    match ext {
        "mp3" | "mpeg" => "mpeg",
        "wav" => "wav",
        "webm" => "webm",
        "m4a" | "mp4" => "mp4",
        "ogg" | "oga" => "ogg",
        "flac" => "flac",
        _ => "mpeg",
    }
}

#[async_trait]
impl SttEngine for OpenAITranscriber {
    fn id(&self) -> String {
        self.provider_id.clone()
    }

    async fn is_available(&self) -> bool {
        self.config.resolve_api_key().is_some()
    }

    async fn transcribe(
        &self,
        audio_path: &Path,
        params: &TranscribeParams,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<TranscriptResult, TranscribeError> {
        if !audio_path.exists() {
            return Err(TranscribeError::InvalidInput(format!(
                "audio file not found: {}",
                audio_path.display()
            )));
        }
        let api_key = self.resolve_key(params)?;

        let audio_bytes = tokio::fs::read(audio_path).await.map_err(|e| {
            TranscribeError::InvalidInput(format!("read {}: {}", audio_path.display(), e))
        })?;
        let model = params.model;
        let log = job.log();
        log.append(&format!(
            "uploading {} ({} bytes, model {}, format {}, {} speaker reference(s))",
            audio_path.display(),
            audio_bytes.len(),
            model.wire_name(),
            model.response_format(),
            params.speaker_references.len()
        ));

        let url = format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        );
        let started = Instant::now();

        let send = request_with_retry(
            || {
                let form = self.build_form(&audio_bytes, audio_path, params);
                let request = self
                    .client
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .multipart(form);
                async move { request.send().await }
            },
            self.config.max_attempts,
            cancel,
            &log,
        );

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TranscribeError::Cancelled),
            result = send => result.map_err(|e| match e {
                RetryError::Cancelled => TranscribeError::Cancelled,
                RetryError::Exhausted(msg) | RetryError::Fatal(msg) => {
                    TranscribeError::Transport(msg)
                }
            })?,
        };

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TranscribeError::Transport(format!("reading response body: {}", e)))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_SNIPPET).collect();
            log.append(&format!("service returned HTTP {}: {}", status, snippet));
            return Err(TranscribeError::Remote {
                status: status.as_u16(),
                body: snippet,
            });
        }

        let mut result = parse_response(&body, model)?;
        result.model = Some(model.wire_name().to_string());
        result.processing_time_secs = started.elapsed().as_secs_f64();

        info!(
            "transcribed {} -> {} segment(s), {} word(s)",
            audio_path.display(),
            result.segments.len(),
            result.word_segments.len()
        );
        log.append(&format!(
            "transcription complete: {} segment(s), {} word(s) in {:.1}s",
            result.segments.len(),
            result.word_segments.len(),
            result.processing_time_secs
        ));
        Ok(result)
    }
}

// ── Response Parsing ───────────────────────────────────

#[derive(Debug, Deserialize)]
struct VerboseResponse {
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<VerboseSegment>,
    #[serde(default)]
    words: Vec<VerboseWord>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct VerboseWord {
    word: String,
    start: f64,
    end: f64,
    #[serde(default)]
    probability: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct DiarizedResponse {
    #[serde(default)]
    text: String,
    segments: Vec<DiarizedSegment>,
}

#[derive(Debug, Deserialize)]
struct DiarizedSegment {
    start: f64,
    end: f64,
    text: String,
    #[serde(default)]
    speaker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SimpleResponse {
    text: String,
    #[serde(default)]
    duration: Option<f64>,
}

fn parse_response(
    body: &str,
    model: TranscriptionModel,
) -> Result<TranscriptResult, TranscribeError> {
    match model.response_format() {
        "diarized_json" => parse_diarized(body),
        "verbose_json" => parse_verbose(body),
        _ => parse_simple(body),
    }
}

fn parse_diarized(body: &str) -> Result<TranscriptResult, TranscribeError> {
    let parsed: DiarizedResponse = serde_json::from_str(body)
        .map_err(|e| TranscribeError::Protocol(format!("diarized_json: {}", e)))?;

    let segments: Vec<TranscriptSegment> = parsed
        .segments
        .iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.clone(),
            speaker: s.speaker.clone(),
            language: None,
        })
        .collect();

    let text = if parsed.text.is_empty() {
        join_segment_texts(&segments)
    } else {
        parsed.text
    };

    Ok(TranscriptResult {
        text,
        segments,
        ..Default::default()
    })
}

fn parse_verbose(body: &str) -> Result<TranscriptResult, TranscribeError> {
    let parsed: VerboseResponse = serde_json::from_str(body)
        .map_err(|e| TranscribeError::Protocol(format!("verbose_json: {}", e)))?;

    let mut segments: Vec<TranscriptSegment> = parsed
        .segments
        .iter()
        .map(|s| TranscriptSegment {
            start: s.start,
            end: s.end,
            text: s.text.clone(),
            speaker: None,
            language: parsed.language.clone(),
        })
        .collect();

    // Some decodes return text without segment boundaries; synthesize
    // one spanning the reported duration.
    if segments.is_empty() && !parsed.text.trim().is_empty() {
        segments.push(TranscriptSegment {
            start: 0.0,
            end: parsed.duration.unwrap_or(0.0),
            text: parsed.text.clone(),
            speaker: None,
            language: parsed.language.clone(),
        });
    }

    let words: Vec<TranscriptWord> = parsed
        .words
        .iter()
        .map(|w| TranscriptWord {
            start: w.start,
            end: w.end,
            word: w.word.clone(),
            score: w.probability,
            speaker: None,
        })
        .collect();

    let logprobs: Vec<f64> = parsed
        .segments
        .iter()
        .filter_map(|s| s.avg_logprob)
        .collect();
    let confidence = if logprobs.is_empty() {
        None
    } else {
        Some(logprobs.iter().map(|lp| lp.exp()).sum::<f64>() / logprobs.len() as f64)
    };

    Ok(TranscriptResult {
        text: parsed.text,
        language: parsed.language,
        segments,
        word_segments: words,
        confidence,
        ..Default::default()
    })
}

fn parse_simple(body: &str) -> Result<TranscriptResult, TranscribeError> {
    let parsed: SimpleResponse =
        serde_json::from_str(body).map_err(|e| TranscribeError::Protocol(format!("json: {}", e)))?;

    let mut segments = Vec::new();
    if !parsed.text.trim().is_empty() {
        segments.push(TranscriptSegment {
            start: 0.0,
            end: parsed.duration.unwrap_or(0.0),
            text: parsed.text.clone(),
            speaker: None,
            language: None,
        });
    }

    Ok(TranscriptResult {
        text: parsed.text,
        segments,
        ..Default::default()
    })
}

fn join_segment_texts(segments: &[TranscriptSegment]) -> String {
    segments
        .iter()
        .map(|s| s.text.trim())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
