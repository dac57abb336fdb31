//! Per-job identity and diagnostic logging.
//!
//! Every pipeline run is identified by a job id and owns an output
//! directory. Attempt-by-attempt transcription detail (upload sizes,
//! retries, backoff durations) goes to `transcription.log` inside that
//! directory so a failed job can be diagnosed after the fact.

use std::io::Write;
use std::path::{Path, PathBuf};

/// Identity and filesystem locations for one transcription job.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// Directory for job artifacts: speaker samples, transcription.log.
    pub output_dir: PathBuf,
}

impl JobContext {
    pub fn new(job_id: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            job_id: job_id.into(),
            output_dir: output_dir.into(),
        }
    }

    /// Context with a random job id under the given output directory.
    pub fn with_random_id(output_dir: impl Into<PathBuf>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), output_dir)
    }

    pub fn log(&self) -> JobLog {
        JobLog {
            path: self.output_dir.join("transcription.log"),
        }
    }
}

/// Append-only diagnostic log, one timestamped line per message.
///
/// Logging is best-effort: a job never fails because its log file could
/// not be written. Credentials must not be passed through here.
#[derive(Debug, Clone)]
pub struct JobLog {
    path: PathBuf,
}

impl JobLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[YYYY-MM-DD HH:MM:SS] <message>`.
    pub fn append(&self, message: &str) {
        let line = format!(
            "[{}] {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            message
        );
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    tracing::warn!("failed to append to {}: {}", self.path.display(), e);
                }
            }
            Err(e) => {
                tracing::warn!("failed to open {}: {}", self.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_creates_file_with_timestamped_lines() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = JobContext::new("job-1", tmp.path());
        let log = ctx.log();
        log.append("uploading chunk 0 (1024 bytes)");
        log.append("attempt 1 failed: unexpected EOF");

        let content = std::fs::read_to_string(tmp.path().join("transcription.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("uploading chunk 0 (1024 bytes)"));
        assert!(lines[1].contains("unexpected EOF"));
        // [YYYY-MM-DD HH:MM:SS] prefix
        assert!(lines[0].starts_with('['));
        assert_eq!(lines[0].find(']'), Some(20));
    }

    #[test]
    fn append_creates_missing_output_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let ctx = JobContext::new("job-2", tmp.path().join("not/yet/created"));
        ctx.log().append("hello");
        assert!(ctx.output_dir.join("transcription.log").exists());
    }
}
