//! Pipeline configuration — aggregates the stage configs.

use crate::media::splitter::SplitterConfig;
use crate::postprocess::config::PostprocessConfig;
use crate::stt::config::TranscriberConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound on concurrent chunk uploads. The service rate-limits
/// and retries already cost 5–20 s, so going wider buys nothing.
pub const MAX_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub transcriber: TranscriberConfig,
    #[serde(default)]
    pub splitter: SplitterConfig,
    #[serde(default)]
    pub postprocess: PostprocessConfig,
    /// Concurrent chunk transcriptions after the first chunk lands.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transcriber: TranscriberConfig::default(),
            splitter: SplitterConfig::default(),
            postprocess: PostprocessConfig::default(),
            concurrency: default_concurrency(),
        }
    }
}

impl PipelineConfig {
    /// Worker-pool width, clamped to [1, 4].
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }
}

pub fn load_config(path: &Path) -> PipelineConfig {
    crate::config::load_json_config(path, "pipeline")
}

pub fn save_config(path: &Path, config: &PipelineConfig) -> Result<(), String> {
    crate::config::save_json_config(path, config, "pipeline")
}
