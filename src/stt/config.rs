//! Transcriber configuration — persisted to `transcriber_config.json`.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriberConfig {
    /// Direct API key (takes precedence over env var).
    pub api_key: Option<String>,
    /// Environment variable name to read the API key from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    /// Base URL for the transcription API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Default model parameter ("standard-whisper", "gpt4o-transcribe",
    /// "gpt4o-mini-transcribe", "gpt4o-diarize").
    #[serde(default = "default_model")]
    pub model: String,
    /// Force HTTP/1.1 by disabling the protocol upgrade path. The
    /// service front-end terminates HTTP/2 streams mid-upload on long
    /// requests; leave this on unless the endpoint is known-good.
    #[serde(default = "default_true")]
    pub http1_only: bool,
    /// Per-request transport timeout. Uploads of ~20 MB over slow links
    /// plus server-side decode need a generous bound.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per request, counting the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "standard-whisper".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            http1_only: default_true(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl TranscriberConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        crate::config::resolve_api_key(&self.api_key, &self.api_key_env)
    }
}

pub fn load_config(path: &Path) -> TranscriberConfig {
    crate::config::load_json_config(path, "transcriber")
}

pub fn save_config(path: &Path, config: &TranscriberConfig) -> Result<(), String> {
    crate::config::save_json_config(path, config, "transcriber")
}
