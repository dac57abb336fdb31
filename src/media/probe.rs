//! Duration probing via `ffprobe`.

use super::tools::{run_tool, ToolError};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Ask `ffprobe` for the container-format duration in seconds.
///
/// Quiet verbosity, plain scalar output: a single float on stdout.
pub async fn probe_duration(path: &Path, cancel: &CancellationToken) -> Result<f64, ToolError> {
    let args = vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.to_string_lossy().to_string(),
    ];
    let stdout = run_tool("ffprobe", &args, cancel).await?;
    parse_duration_output(&stdout).ok_or_else(|| ToolError::Failed {
        program: "ffprobe".to_string(),
        output: format!("unparseable duration output: {:?}", stdout.trim()),
    })
}

fn parse_duration_output(stdout: &str) -> Option<f64> {
    let value: f64 = stdout.trim().parse().ok()?;
    if value.is_finite() && value >= 0.0 {
        Some(value)
    } else {
        None
    }
}
