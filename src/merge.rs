//! Chunk-result merging: one continuous timeline from N chunk results.
//!
//! Chunk offsets are contiguous by construction, so adding each
//! chunk's `start_time` to its segments and words yields a gap-free
//! global timeline. Speaker identity is either asserted (references
//! were passed, labels pass through) or abandoned (labels get a
//! chunk-index prefix so collisions stay unambiguous).

use crate::media::splitter::ChunkInfo;
use crate::stt::interface::TranscriptResult;
use tracing::debug;

/// Merge per-chunk results into one. Results must be in chunk order.
/// Returns `None` for empty input; a single result passes through
/// unchanged.
pub fn merge(
    results: Vec<TranscriptResult>,
    chunks: &[ChunkInfo],
    speaker_refs_used: bool,
) -> Option<TranscriptResult> {
    if results.is_empty() {
        return None;
    }
    if results.len() == 1 {
        return results.into_iter().next();
    }

    let chunk_count = results.len();
    let mut merged = TranscriptResult::default();
    let mut texts: Vec<String> = Vec::with_capacity(chunk_count);
    let mut confidences: Vec<f64> = Vec::new();

    for (index, mut result) in results.into_iter().enumerate() {
        let offset = chunks.get(index).map(|c| c.start_time).unwrap_or(0.0);

        for segment in &mut result.segments {
            segment.start += offset;
            segment.end += offset;
            if !speaker_refs_used {
                if let Some(label) = segment.speaker.take() {
                    segment.speaker = rewrite_label(index, &label);
                }
            }
        }
        for word in &mut result.word_segments {
            word.start += offset;
            word.end += offset;
            if !speaker_refs_used {
                if let Some(label) = word.speaker.take() {
                    word.speaker = rewrite_label(index, &label);
                }
            }
        }

        let trimmed = result.text.trim();
        if !trimmed.is_empty() {
            texts.push(trimmed.to_string());
        }
        if let Some(confidence) = result.confidence {
            confidences.push(confidence);
        }
        merged.processing_time_secs += result.processing_time_secs;
        if merged.language.is_none() {
            merged.language = result.language.take();
        }
        if merged.model.is_none() {
            merged.model = result.model.take();
        }
        for (key, value) in result.metadata {
            merged.metadata.insert(key, value);
        }
        merged.segments.extend(result.segments);
        merged.word_segments.extend(result.word_segments);
    }

    merged.text = texts.join(" ");
    if !confidences.is_empty() {
        merged.confidence = Some(confidences.iter().sum::<f64>() / confidences.len() as f64);
    }
    merged
        .metadata
        .insert("chunks_processed".to_string(), chunk_count.to_string());
    if speaker_refs_used {
        merged
            .metadata
            .insert("speaker_references_used".to_string(), "true".to_string());
    }

    debug!(
        "merged {} chunk results into {} segments",
        chunk_count,
        merged.segments.len()
    );
    Some(merged)
}

/// Prefix a chunk-local label with its chunk index, dropping a
/// leading "Speaker " if the service used the long form. Empty labels
/// stay empty.
fn rewrite_label(chunk_index: usize, label: &str) -> Option<String> {
    if label.is_empty() {
        return Some(String::new());
    }
    let stripped = label.strip_prefix("Speaker ").unwrap_or(label);
    Some(format!("{}-{}", chunk_index, stripped))
}
