pub mod config;
pub mod job;
pub mod llm;
pub mod media;
pub mod merge;
pub mod pipeline;
pub mod postprocess;
pub mod speaker;
pub mod stt;
pub mod utils;

pub use job::JobContext;
pub use media::{AudioInput, SplitResult};
pub use pipeline::{PipelineConfig, PipelineError, TranscriptionPipeline};
pub use stt::interface::{
    TranscribeParams, TranscriptResult, TranscriptSegment, TranscriptWord, TranscriptionModel,
};

/// Install a global `tracing` subscriber honoring `RUST_LOG`.
///
/// Host applications that already install their own subscriber should
/// skip this; a second call is ignored.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
