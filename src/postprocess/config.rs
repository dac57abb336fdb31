//! AI post-processor configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostprocessConfig {
    /// Cleanup runs only when enabled AND a key resolves.
    #[serde(default)]
    pub enabled: bool,
    pub api_key: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Segments per LLM request.
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
    /// Inserted between texts when applying a merge chain. Empty suits
    /// CJK scripts; whitespace-delimited languages want " ".
    #[serde(default)]
    pub joiner: String,
}

fn default_api_key_env() -> Option<String> {
    Some("OPENAI_API_KEY".to_string())
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_batch() -> usize {
    50
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: None,
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_batch: default_max_batch(),
            joiner: String::new(),
        }
    }
}

impl PostprocessConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        crate::config::resolve_api_key(&self.api_key, &self.api_key_env)
    }
}

pub fn load_config(path: &Path) -> PostprocessConfig {
    crate::config::load_json_config(path, "postprocess")
}

pub fn save_config(path: &Path, config: &PostprocessConfig) -> Result<(), String> {
    crate::config::save_json_config(path, config, "postprocess")
}
