use crate::job::JobContext;
use crate::stt::config::TranscriberConfig;
use crate::stt::openai::OpenAITranscriber;
use std::path::PathBuf;
use tempfile::TempDir;

/// Transcriber pointed at a mock server, with a test credential.
pub fn transcriber_for(base_url: &str) -> OpenAITranscriber {
    let config = TranscriberConfig {
        api_key: Some("sk-test".to_string()),
        api_key_env: None,
        base_url: format!("{}/v1", base_url),
        timeout_secs: 30,
        ..TranscriberConfig::default()
    };
    OpenAITranscriber::new(config).unwrap()
}

/// Job context rooted in a temp dir.
pub fn test_job(tmp: &TempDir) -> JobContext {
    JobContext::new("job-test", tmp.path())
}

/// A small fake MP3 on disk; the adapter only reads bytes, so the
/// content does not need to decode.
pub fn write_fake_audio(tmp: &TempDir) -> PathBuf {
    let path = tmp.path().join("chunk_000.mp3");
    std::fs::write(&path, b"ID3\x04\x00fake-mp3-bytes-for-upload").unwrap();
    path
}
