//! External media binaries (`ffmpeg`, `ffprobe`) as black-box
//! subprocesses.
//!
//! Invocations are quiet on success and loud on failure: combined
//! process output is swallowed when the exit status is zero and
//! attached to the error otherwise.

use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    /// Binary not found on PATH. Surfaced at startup.
    #[error("{0} not found on PATH")]
    Missing(&'static str),
    /// Non-zero exit; carries the combined process output.
    #[error("{program} failed: {output}")]
    Failed { program: String, output: String },
    #[error("io error running {program}: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cancelled")]
    Cancelled,
}

/// Verify both media binaries are invocable. Call once at startup;
/// a missing binary is fatal for every job.
pub async fn check_binaries() -> Result<(), ToolError> {
    for program in ["ffmpeg", "ffprobe"] {
        let status = Command::new(program)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match status {
            Ok(s) if s.success() => {}
            _ => return Err(ToolError::Missing(program)),
        }
    }
    Ok(())
}

/// Run a media tool to completion, honoring cancellation.
///
/// Returns captured stdout on success. On failure the combined
/// stdout+stderr is attached to the error.
pub async fn run_tool(
    program: &str,
    args: &[String],
    cancel: &CancellationToken,
) -> Result<String, ToolError> {
    if cancel.is_cancelled() {
        return Err(ToolError::Cancelled);
    }
    debug!("running {} {}", program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| ToolError::Io {
            program: program.to_string(),
            source: e,
        })?;

    let output = tokio::select! {
        _ = cancel.cancelled() => return Err(ToolError::Cancelled),
        output = child.wait_with_output() => output.map_err(|e| ToolError::Io {
            program: program.to_string(),
            source: e,
        })?,
    };

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Err(ToolError::Failed {
            program: program.to_string(),
            output: combined.trim().to_string(),
        })
    }
}
