//! Job orchestration: split → two-pass transcription → merge →
//! optional AI cleanup, with chunk and sample cleanup on every exit
//! path.
//!
//! The first chunk always completes alone because its diarized result
//! seeds the speaker references later chunks carry. Chunks 1..n are
//! independent and run under a bounded worker pool; the merger needs
//! results in chunk order, so they are collected into an index-keyed
//! slot list and the merge only starts once every chunk is present.

use super::config::PipelineConfig;
use crate::job::JobContext;
use crate::media::splitter::{
    AudioInput, AudioSplitter, FfmpegSplitter, SplitError, SplitResult,
};
use crate::media::tools::check_binaries;
use crate::merge::merge;
use crate::postprocess::cleaner::AiPostprocessor;
use crate::speaker::sampler::{FfmpegSpeakerSampler, SampleError, SpeakerSampler};
use crate::stt::interface::{
    SpeakerSample, SttEngine, TranscribeError, TranscribeParams, TranscriptResult,
};
use crate::stt::openai::OpenAITranscriber;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("split failed: {0}")]
    Split(#[from] SplitError),
    #[error("failed to transcribe chunk {chunk}: {source}")]
    Transcribe {
        chunk: usize,
        #[source]
        source: TranscribeError,
    },
    #[error("worker task failed: {0}")]
    Worker(String),
    #[error("nothing to merge")]
    Empty,
    #[error("job cancelled")]
    Cancelled,
}

fn chunk_error(chunk: usize, e: TranscribeError) -> PipelineError {
    match e {
        TranscribeError::Cancelled => PipelineError::Cancelled,
        source => PipelineError::Transcribe { chunk, source },
    }
}

pub struct TranscriptionPipeline {
    config: PipelineConfig,
    splitter: Arc<dyn AudioSplitter>,
    engine: Arc<dyn SttEngine>,
    sampler: Arc<dyn SpeakerSampler>,
    postprocessor: AiPostprocessor,
}

impl TranscriptionPipeline {
    /// Production wiring: ffmpeg splitter/sampler, OpenAI transcriber.
    pub fn new(config: PipelineConfig) -> Result<Self, TranscribeError> {
        let engine = OpenAITranscriber::new(config.transcriber.clone())?;
        Ok(Self {
            splitter: Arc::new(FfmpegSplitter::new(config.splitter.clone())),
            engine: Arc::new(engine),
            sampler: Arc::new(FfmpegSpeakerSampler::new()),
            postprocessor: AiPostprocessor::new(config.postprocess.clone()),
            config,
        })
    }

    /// Inject stage implementations (tests, alternative backends).
    pub fn with_components(
        config: PipelineConfig,
        splitter: Arc<dyn AudioSplitter>,
        engine: Arc<dyn SttEngine>,
        sampler: Arc<dyn SpeakerSampler>,
        postprocessor: AiPostprocessor,
    ) -> Self {
        Self {
            config,
            splitter,
            engine,
            sampler,
            postprocessor,
        }
    }

    /// Fail fast when the external media binaries are absent. Call at
    /// application startup, before accepting jobs.
    pub async fn check_environment() -> Result<(), SplitError> {
        check_binaries().await.map_err(Into::into)
    }

    /// Run one job end to end.
    pub async fn run(
        &self,
        input: &AudioInput,
        params: &TranscribeParams,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<TranscriptResult, PipelineError> {
        let log = job.log();
        log.append(&format!(
            "job {} started: {} ({} bytes, {:.1}s)",
            job.job_id,
            input.path.display(),
            input.size_bytes,
            input.duration_secs
        ));

        let split = self
            .splitter
            .split(input, params.model.max_chunk_minutes(), job, cancel)
            .await?;

        let mut samples: Vec<SpeakerSample> = Vec::new();
        let outcome = self
            .transcribe_all(&split, &mut samples, params, job, cancel)
            .await;
        let refs_used = !samples.is_empty();

        // Chunks and samples are owned by this job; remove them no
        // matter how the transcription phase ended.
        self.splitter.cleanup(&split).await;
        self.sampler.cleanup(&samples).await;

        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                log.append(&format!("job {} failed: {}", job.job_id, e));
                return Err(e);
            }
        };

        let merged = merge(results, &split.chunks, refs_used).ok_or(PipelineError::Empty)?;
        let final_result = self.postprocessor.process(merged, job).await;

        info!(
            "job {} finished: {} segment(s), {:.1}s of processing",
            job.job_id,
            final_result.segments.len(),
            final_result.processing_time_secs
        );
        log.append(&format!(
            "job {} finished: {} segment(s)",
            job.job_id,
            final_result.segments.len()
        ));
        Ok(final_result)
    }

    /// Chunk 0 alone, then 1..n under the worker pool, results in
    /// chunk order. Extracted samples are handed back through
    /// `samples_out` so the caller can clean them up on any exit.
    async fn transcribe_all(
        &self,
        split: &SplitResult,
        samples_out: &mut Vec<SpeakerSample>,
        params: &TranscribeParams,
        job: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<Vec<TranscriptResult>, PipelineError> {
        let chunks = &split.chunks;

        // First pass: no references yet.
        let mut first_params = params.clone();
        first_params.speaker_references.clear();
        let first = self
            .engine
            .transcribe(&chunks[0].path, &first_params, job, cancel)
            .await
            .map_err(|e| chunk_error(0, e))?;

        if chunks.len() == 1 {
            return Ok(vec![first]);
        }

        if params.model.supports_diarization() {
            match self
                .sampler
                .extract(&chunks[0].path, &first, job, cancel)
                .await
            {
                Ok(samples) => *samples_out = samples,
                Err(SampleError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    // Degrade to prefix-based speaker reconciliation.
                    warn!("speaker sampling failed: {} — continuing without references", e);
                    job.log()
                        .append(&format!("speaker sampling failed: {}", e));
                }
            }
        }

        let mut rest_params = params.clone();
        rest_params.speaker_references = samples_out.clone();

        let semaphore = Arc::new(Semaphore::new(self.config.effective_concurrency()));
        let mut workers: JoinSet<(usize, Result<TranscriptResult, TranscribeError>)> =
            JoinSet::new();
        for chunk in &chunks[1..] {
            let engine = self.engine.clone();
            let params = rest_params.clone();
            let job = job.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let index = chunk.original_index;
            let path = chunk.path.clone();
            workers.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (index, Err(TranscribeError::Cancelled)),
                };
                let result = engine.transcribe(&path, &params, &job, &cancel).await;
                (index, result)
            });
        }

        let mut slots: Vec<Option<TranscriptResult>> = vec![None; chunks.len()];
        slots[0] = Some(first);
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((index, Ok(result))) => slots[index] = Some(result),
                Ok((index, Err(e))) => {
                    // A missing chunk would corrupt the timeline
                    // silently downstream; abort the whole job.
                    workers.abort_all();
                    return Err(chunk_error(index, e));
                }
                Err(e) => {
                    workers.abort_all();
                    return Err(PipelineError::Worker(e.to_string()));
                }
            }
        }

        let results: Vec<TranscriptResult> = slots.into_iter().flatten().collect();
        if results.len() != chunks.len() {
            return Err(PipelineError::Worker(
                "not every chunk produced a result".to_string(),
            ));
        }
        Ok(results)
    }
}
