//! Batched LLM transcript cleanup.
//!
//! The LLM's text is authoritative; its structural claims are not.
//! Fewer segments than sent means it pre-merged (fine); more is a
//! protocol violation. Returned timestamps are ignored at the batch
//! boundary: each output batch is clamped to the envelope
//! `[first input start, last input end]`, so timelines cannot drift
//! even under a misbehaving model.

use super::config::PostprocessConfig;
use super::prompts::CLEANUP_SYSTEM_PROMPT;
use crate::job::JobContext;
use crate::llm::provider::{LlmError, LlmProvider, OpenAIProvider};
use crate::llm::Message;
use crate::stt::interface::{TranscriptResult, TranscriptSegment, TranscriptWord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Sentinel the model uses to mark a noise-only segment.
const REMOVE_SENTINEL: &str = "[REMOVE]";

/// The LLM-exchange segment form: flat scalar speaker, optional
/// merge flag. Distinct from [`TranscriptSegment`] on purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedSegment {
    pub text: String,
    #[serde(default)]
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_with_next: Option<bool>,
}

impl CleanedSegment {
    fn from_segment(segment: &TranscriptSegment) -> Self {
        Self {
            text: segment.text.clone(),
            speaker: segment.speaker.clone().unwrap_or_default(),
            start: segment.start,
            end: segment.end,
            merge_with_next: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum PostprocessError {
    #[error("llm call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("cleanup response parse failed: {0}")]
    Parse(String),
    #[error("segment count increased: sent {sent}, received {received}")]
    SegmentCountIncreased { sent: usize, received: usize },
}

/// Optional transcript cleanup stage. Inactive unless enabled and a
/// credential resolves; when inactive, `process` is the identity.
pub struct AiPostprocessor {
    config: PostprocessConfig,
    provider: Option<Arc<dyn LlmProvider>>,
}

impl AiPostprocessor {
    pub fn new(config: PostprocessConfig) -> Self {
        let provider = if config.enabled {
            config.resolve_api_key().map(|key| {
                Arc::new(OpenAIProvider::new(
                    key,
                    Some(config.base_url.clone()),
                    Some(config.model.clone()),
                )) as Arc<dyn LlmProvider>
            })
        } else {
            None
        };
        Self { config, provider }
    }

    /// Inject a provider directly (tests, alternative backends).
    pub fn with_provider(config: PostprocessConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let provider = config.enabled.then_some(provider);
        Self { config, provider }
    }

    pub fn is_active(&self) -> bool {
        self.provider.is_some()
    }

    /// Clean a merged transcript. Batch failures fall back to that
    /// batch's original segments; this stage never fails the job.
    pub async fn process(&self, result: TranscriptResult, job: &JobContext) -> TranscriptResult {
        let Some(provider) = self.provider.as_ref() else {
            return result;
        };
        if result.segments.is_empty() {
            return result;
        }

        let TranscriptResult {
            text: _,
            language,
            segments,
            word_segments,
            confidence,
            model,
            processing_time_secs,
            metadata,
        } = result;

        let log = job.log();
        let batch_count = segments.len().div_ceil(self.config.max_batch);
        log.append(&format!(
            "ai cleanup: {} segment(s) in {} batch(es) via {}",
            segments.len(),
            batch_count,
            self.config.model
        ));

        let mut cleaned_segments: Vec<TranscriptSegment> = Vec::new();
        for (batch_index, batch) in segments.chunks(self.config.max_batch).enumerate() {
            match self.clean_batch(provider.as_ref(), batch).await {
                Ok(cleaned) => {
                    log.append(&format!(
                        "batch {}: {} -> {} segment(s)",
                        batch_index,
                        batch.len(),
                        cleaned.len()
                    ));
                    cleaned_segments.extend(cleaned);
                }
                Err(e) => {
                    warn!("cleanup batch {} failed: {} — keeping originals", batch_index, e);
                    log.append(&format!(
                        "batch {} failed ({}); keeping original segments",
                        batch_index, e
                    ));
                    cleaned_segments.extend(batch.iter().cloned());
                }
            }
        }

        let mut words = word_segments;
        reattribute_words(&mut words, &cleaned_segments);

        let text = cleaned_segments
            .iter()
            .map(|s| s.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        let mut metadata = metadata;
        metadata.insert("ai_postprocessed".to_string(), "true".to_string());
        metadata.insert("postprocess_model".to_string(), self.config.model.clone());

        info!(
            "ai cleanup produced {} segment(s) from {} batch(es)",
            cleaned_segments.len(),
            batch_count
        );

        TranscriptResult {
            text,
            language,
            segments: cleaned_segments,
            word_segments: words,
            confidence,
            model,
            processing_time_secs,
            metadata,
        }
    }

    async fn clean_batch(
        &self,
        provider: &dyn LlmProvider,
        batch: &[TranscriptSegment],
    ) -> Result<Vec<TranscriptSegment>, PostprocessError> {
        let outbound: Vec<CleanedSegment> =
            batch.iter().map(CleanedSegment::from_segment).collect();
        let payload = serde_json::to_string(&outbound)
            .map_err(|e| PostprocessError::Parse(format!("encode batch: {}", e)))?;

        let response = provider
            .chat(
                vec![
                    Message::system(CLEANUP_SYSTEM_PROMPT),
                    Message::user(format!("Clean up: {}", payload)),
                ],
                None,
            )
            .await?;

        let cleaned = parse_cleaned_response(&response)?;
        if cleaned.len() > batch.len() {
            return Err(PostprocessError::SegmentCountIncreased {
                sent: batch.len(),
                received: cleaned.len(),
            });
        }

        let mut merged = apply_merges(cleaned, &self.config.joiner);
        // Clamp to the batch envelope; interior timestamps are the
        // model's claim, the boundary is ours.
        if let (Some(first_in), Some(last_in)) = (batch.first(), batch.last()) {
            if let Some(first_out) = merged.first_mut() {
                first_out.start = first_in.start;
            }
            if let Some(last_out) = merged.last_mut() {
                last_out.end = last_in.end;
            }
        }
        Ok(merged)
    }
}

// ── Response Handling (pure) ────────────────────────────

/// Strip markdown code fences if present.
fn strip_code_fences(response: &str) -> &str {
    let trimmed = response.trim();
    if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim()
    } else {
        trimmed
    }
}

fn parse_cleaned_response(response: &str) -> Result<Vec<CleanedSegment>, PostprocessError> {
    let json_str = strip_code_fences(response);
    serde_json::from_str::<Vec<CleanedSegment>>(json_str)
        .map_err(|e| PostprocessError::Parse(format!("{} — raw: {:.200}", e, json_str)))
}

/// Drop `[REMOVE]` segments, then collapse `merge_with_next` chains:
/// a chain takes the first segment's start and speaker and the last
/// segment's end, with texts joined by `joiner`.
fn apply_merges(cleaned: Vec<CleanedSegment>, joiner: &str) -> Vec<TranscriptSegment> {
    let kept: Vec<CleanedSegment> = cleaned
        .into_iter()
        .filter(|c| c.text.trim() != REMOVE_SENTINEL)
        .collect();

    let mut out = Vec::with_capacity(kept.len());
    let mut i = 0;
    while i < kept.len() {
        let start = kept[i].start;
        let speaker = kept[i].speaker.clone();
        let mut text = kept[i].text.clone();
        let mut end = kept[i].end;

        let mut j = i;
        while kept[j].merge_with_next.unwrap_or(false) && j + 1 < kept.len() {
            j += 1;
            text.push_str(joiner);
            text.push_str(&kept[j].text);
            end = kept[j].end;
        }

        out.push(TranscriptSegment {
            start,
            end,
            text,
            speaker: (!speaker.is_empty()).then_some(speaker),
            language: None,
        });
        i = j + 1;
    }
    out
}

/// Re-attribute each word to the cleaned segment whose interval
/// contains it; words outside every interval keep their speaker.
fn reattribute_words(words: &mut [TranscriptWord], segments: &[TranscriptSegment]) {
    for word in words.iter_mut() {
        if let Some(segment) = segments
            .iter()
            .find(|s| s.start <= word.start && word.end <= s.end)
        {
            word.speaker = segment.speaker.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Mutex;

    // ── Mock provider ───────────────────────────────────

    struct MockLlm {
        responses: Mutex<VecDeque<Result<String, String>>>,
    }

    impl MockLlm {
        fn replying(responses: Vec<&str>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(
                    responses.into_iter().map(|r| Ok(r.to_string())).collect(),
                ),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(VecDeque::from([Err("boom".to_string())])),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        async fn chat(
            &self,
            _messages: Vec<Message>,
            _options: Option<crate::llm::LlmParams>,
        ) -> Result<String, LlmError> {
            match self.responses.lock().await.pop_front() {
                Some(Ok(reply)) => Ok(reply),
                Some(Err(e)) => Err(LlmError::Request(e)),
                None => Err(LlmError::Request("no scripted response".to_string())),
            }
        }

        fn id(&self) -> &str {
            "mock"
        }
    }

    fn seg(start: f64, end: f64, text: &str, speaker: &str) -> TranscriptSegment {
        TranscriptSegment {
            start,
            end,
            text: text.to_string(),
            speaker: (!speaker.is_empty()).then(|| speaker.to_string()),
            language: None,
        }
    }

    fn enabled_config() -> PostprocessConfig {
        PostprocessConfig {
            enabled: true,
            ..Default::default()
        }
    }

    fn job(tmp: &tempfile::TempDir) -> JobContext {
        JobContext::new("job-clean", tmp.path())
    }

    // ── activation ──────────────────────────────────────

    #[tokio::test]
    async fn disabled_postprocessor_is_identity() {
        let tmp = tempfile::TempDir::new().unwrap();
        let processor = AiPostprocessor::new(PostprocessConfig::default());
        assert!(!processor.is_active());

        let result = TranscriptResult {
            text: "untouched".to_string(),
            segments: vec![seg(0.0, 1.0, "untouched", "A")],
            ..Default::default()
        };
        let output = processor.process(result.clone(), &job(&tmp)).await;
        assert_eq!(output.text, result.text);
        assert!(!output.metadata.contains_key("ai_postprocessed"));
    }

    #[tokio::test]
    async fn enabled_without_key_is_inactive() {
        let config = PostprocessConfig {
            enabled: true,
            api_key: None,
            api_key_env: Some("LONGSCRIBE_NO_SUCH_ENV_VAR".to_string()),
            ..Default::default()
        };
        assert!(!AiPostprocessor::new(config).is_active());
    }

    // ── fragment merging (pre-merged response) ──────────

    #[tokio::test]
    async fn llm_pre_merged_fragments_keep_the_envelope() {
        let tmp = tempfile::TempDir::new().unwrap();
        let response =
            r#"[{"text": "我今日好開心。", "speaker": "A", "start": 0.0, "end": 4.0}]"#;
        let processor =
            AiPostprocessor::with_provider(enabled_config(), MockLlm::replying(vec![response]));

        let result = TranscriptResult {
            text: "我 今日 好 開心。".to_string(),
            segments: vec![
                seg(0.0, 1.0, "我", "A"),
                seg(1.0, 2.0, "今日", "A"),
                seg(2.0, 3.0, "好", "A"),
                seg(3.0, 4.5, "開心。", "A"),
            ],
            ..Default::default()
        };
        let output = processor.process(result, &job(&tmp)).await;

        assert_eq!(output.segments.len(), 1);
        assert_eq!(output.segments[0].text, "我今日好開心。");
        assert_eq!(output.segments[0].start, 0.0);
        // Envelope clamp: last input end wins over the model's claim.
        assert_eq!(output.segments[0].end, 4.5);
        assert_eq!(output.segments[0].speaker.as_deref(), Some("A"));
        assert_eq!(output.text, "我今日好開心。");
        assert_eq!(output.metadata["ai_postprocessed"], "true");
    }

    // ── merge_with_next chains ──────────────────────────

    #[test]
    fn merge_chain_takes_first_start_last_end_first_speaker() {
        let cleaned = vec![
            CleanedSegment {
                text: "我".to_string(),
                speaker: "A".to_string(),
                start: 0.0,
                end: 1.0,
                merge_with_next: Some(true),
            },
            CleanedSegment {
                text: "今日".to_string(),
                speaker: "B".to_string(),
                start: 1.0,
                end: 2.0,
                merge_with_next: Some(true),
            },
            CleanedSegment {
                text: "好開心。".to_string(),
                speaker: "A".to_string(),
                start: 2.0,
                end: 4.5,
                merge_with_next: None,
            },
        ];
        let merged = apply_merges(cleaned, "");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "我今日好開心。");
        assert_eq!(merged[0].start, 0.0);
        assert_eq!(merged[0].end, 4.5);
        assert_eq!(merged[0].speaker.as_deref(), Some("A"));
    }

    #[test]
    fn merge_chain_respects_configured_joiner() {
        let cleaned = vec![
            CleanedSegment {
                text: "good".to_string(),
                speaker: "A".to_string(),
                start: 0.0,
                end: 1.0,
                merge_with_next: Some(true),
            },
            CleanedSegment {
                text: "morning".to_string(),
                speaker: "A".to_string(),
                start: 1.0,
                end: 2.0,
                merge_with_next: None,
            },
        ];
        let merged = apply_merges(cleaned, " ");
        assert_eq!(merged[0].text, "good morning");
    }

    #[test]
    fn remove_sentinel_segments_are_dropped() {
        let cleaned = vec![
            CleanedSegment {
                text: "keep".to_string(),
                speaker: "A".to_string(),
                start: 0.0,
                end: 1.0,
                merge_with_next: None,
            },
            CleanedSegment {
                text: "[REMOVE]".to_string(),
                speaker: "A".to_string(),
                start: 1.0,
                end: 2.0,
                merge_with_next: None,
            },
        ];
        let merged = apply_merges(cleaned, "");
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].text, "keep");
    }

    #[tokio::test]
    async fn removed_text_is_absent_from_rebuilt_full_text() {
        let tmp = tempfile::TempDir::new().unwrap();
        let response = r#"[
            {"text": "hello.", "speaker": "A", "start": 0.0, "end": 1.0},
            {"text": "[REMOVE]", "speaker": "A", "start": 1.0, "end": 2.0},
            {"text": "goodbye.", "speaker": "A", "start": 2.0, "end": 3.0}
        ]"#;
        let processor =
            AiPostprocessor::with_provider(enabled_config(), MockLlm::replying(vec![response]));
        let result = TranscriptResult {
            segments: vec![
                seg(0.0, 1.0, "hello", "A"),
                seg(1.0, 2.0, "嗯嗯嗯", "A"),
                seg(2.0, 3.0, "goodbye", "A"),
            ],
            ..Default::default()
        };
        let output = processor.process(result, &job(&tmp)).await;
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.text, "hello. goodbye.");
        assert!(!output.text.contains("嗯"));
    }

    // ── structural skepticism ───────────────────────────

    #[tokio::test]
    async fn more_segments_than_sent_falls_back_to_originals() {
        let tmp = tempfile::TempDir::new().unwrap();
        let response = r#"[
            {"text": "a", "speaker": "A", "start": 0.0, "end": 0.5},
            {"text": "b", "speaker": "A", "start": 0.5, "end": 1.0},
            {"text": "c", "speaker": "A", "start": 1.0, "end": 1.5}
        ]"#;
        let processor =
            AiPostprocessor::with_provider(enabled_config(), MockLlm::replying(vec![response]));
        let result = TranscriptResult {
            segments: vec![seg(0.0, 1.0, "one", "A"), seg(1.0, 2.0, "two", "A")],
            ..Default::default()
        };
        let output = processor.process(result, &job(&tmp)).await;
        // Batch fell back: originals survive verbatim.
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "one");
        assert_eq!(output.segments[1].text, "two");
        // The stage still ran.
        assert_eq!(output.metadata["ai_postprocessed"], "true");
    }

    #[tokio::test]
    async fn llm_failure_falls_back_to_originals() {
        let tmp = tempfile::TempDir::new().unwrap();
        let processor = AiPostprocessor::with_provider(enabled_config(), MockLlm::failing());
        let result = TranscriptResult {
            segments: vec![seg(0.0, 1.0, "survives", "A")],
            ..Default::default()
        };
        let output = processor.process(result, &job(&tmp)).await;
        assert_eq!(output.segments.len(), 1);
        assert_eq!(output.segments[0].text, "survives");
    }

    #[test]
    fn fenced_json_parses() {
        let fenced = "```json\n[{\"text\": \"x\", \"speaker\": \"A\", \"start\": 0.0, \"end\": 1.0}]\n```";
        let parsed = parse_cleaned_response(fenced).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].text, "x");
    }

    #[test]
    fn prose_response_is_parse_error() {
        let err = parse_cleaned_response("Sure! Here is the cleaned transcript:").unwrap_err();
        assert!(matches!(err, PostprocessError::Parse(_)));
    }

    // ── word reattribution ──────────────────────────────

    #[test]
    fn words_inside_merged_intervals_take_the_segment_speaker() {
        let segments = vec![seg(0.0, 4.0, "merged", "A"), seg(4.0, 6.0, "tail", "B")];
        let mut words = vec![
            TranscriptWord {
                start: 1.0,
                end: 1.5,
                word: "inside".to_string(),
                score: None,
                speaker: Some("Z".to_string()),
            },
            TranscriptWord {
                start: 4.5,
                end: 5.0,
                word: "later".to_string(),
                score: None,
                speaker: Some("Z".to_string()),
            },
            TranscriptWord {
                start: 9.0,
                end: 9.5,
                word: "outside".to_string(),
                score: None,
                speaker: Some("Z".to_string()),
            },
        ];
        reattribute_words(&mut words, &segments);
        assert_eq!(words[0].speaker.as_deref(), Some("A"));
        assert_eq!(words[1].speaker.as_deref(), Some("B"));
        // Outside every interval: original speaker kept.
        assert_eq!(words[2].speaker.as_deref(), Some("Z"));
    }

    // ── batching ────────────────────────────────────────

    #[tokio::test]
    async fn batches_are_processed_independently() {
        let tmp = tempfile::TempDir::new().unwrap();
        // 3 segments with max_batch 2: first batch cleans, second fails.
        let good = r#"[{"text": "ab.", "speaker": "A", "start": 0.0, "end": 2.0}]"#;
        let provider = Arc::new(MockLlm {
            responses: Mutex::new(VecDeque::from([
                Ok(good.to_string()),
                Err("rate limit".to_string()),
            ])),
        });
        let config = PostprocessConfig {
            enabled: true,
            max_batch: 2,
            ..Default::default()
        };
        let processor = AiPostprocessor::with_provider(config, provider);
        let result = TranscriptResult {
            segments: vec![
                seg(0.0, 1.0, "a", "A"),
                seg(1.0, 2.0, "b", "A"),
                seg(2.0, 3.0, "c", "A"),
            ],
            ..Default::default()
        };
        let output = processor.process(result, &job(&tmp)).await;
        // Batch 1 merged to one segment; batch 2 fell back.
        assert_eq!(output.segments.len(), 2);
        assert_eq!(output.segments[0].text, "ab.");
        assert_eq!(output.segments[1].text, "c");
    }
}
