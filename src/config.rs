//! Shared config utilities for loading/saving JSON config files
//! and resolving API keys from fields or environment variables.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{info, warn};

/// Generic load for any Serde config type with a `Default` implementation.
/// Falls back to `T::default()` if the file is missing or unparsable.
pub fn load_json_config<T: DeserializeOwned + Default>(path: &Path, label: &str) -> T {
    match std::fs::read_to_string(path) {
        Ok(content) => match serde_json::from_str::<T>(&content) {
            Ok(config) => {
                info!("{} config loaded from {}", label, path.display());
                config
            }
            Err(e) => {
                warn!(
                    "failed to parse {} config {}: {} — using defaults",
                    label,
                    path.display(),
                    e
                );
                T::default()
            }
        },
        Err(_) => {
            info!(
                "no {} config file at {} — using defaults",
                label,
                path.display()
            );
            T::default()
        }
    }
}

/// Generic save for any Serde config type.
pub fn save_json_config<T: Serialize>(path: &Path, config: &T, label: &str) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create config directory: {}", e))?;
    }
    let json = serde_json::to_string_pretty(config)
        .map_err(|e| format!("failed to serialize {} config: {}", label, e))?;
    std::fs::write(path, json).map_err(|e| format!("failed to write config file: {}", e))?;
    info!("{} config saved to {}", label, path.display());
    Ok(())
}

/// Resolve an API key: check the direct `api_key` field first,
/// then fall back to reading the environment variable named in `api_key_env`.
pub fn resolve_api_key(api_key: &Option<String>, api_key_env: &Option<String>) -> Option<String> {
    if let Some(ref key) = api_key {
        if !key.is_empty() {
            return Some(key.clone());
        }
    }
    if let Some(ref env_var) = api_key_env {
        if let Ok(key) = std::env::var(env_var) {
            if !key.is_empty() {
                return Some(key);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        retries: u32,
    }

    #[test]
    fn load_missing_file_falls_back_to_default() {
        let tmp = tempfile::TempDir::new().unwrap();
        let loaded: Sample = load_json_config(&tmp.path().join("absent.json"), "test");
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested/dir/sample.json");
        let config = Sample {
            name: "job".to_string(),
            retries: 3,
        };
        save_json_config(&path, &config, "test").unwrap();
        let loaded: Sample = load_json_config(&path, "test");
        assert_eq!(loaded, config);
    }

    #[test]
    fn direct_key_wins_over_env() {
        let direct = Some("sk-direct".to_string());
        let env = Some("LONGSCRIBE_TEST_KEY_UNSET".to_string());
        assert_eq!(resolve_api_key(&direct, &env).as_deref(), Some("sk-direct"));
    }

    #[test]
    fn empty_direct_key_is_ignored() {
        assert_eq!(resolve_api_key(&Some(String::new()), &None), None);
    }
}
