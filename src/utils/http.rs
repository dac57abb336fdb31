//! HTTP retry helper for long-running uploads against a fragile remote.
//!
//! Retries only genuine network-level failures; HTTP responses of any
//! status are handed back to the caller to classify. The request
//! closure is re-invoked on every attempt so multipart bodies are fully
//! reconstructed (files re-read, form re-encoded).

use crate::job::JobLog;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Base backoff unit: attempt² × 5 s between attempts.
const BACKOFF_UNIT_SECS: u64 = 5;

/// Network failure messages that warrant another attempt. Everything
/// else fails fast.
const RETRYABLE_PATTERNS: &[&str] = &[
    "eof",
    "connection reset",
    "timed out",
    "timeout",
    "connection refused",
    "network unreachable",
    "broken pipe",
    "connection closed",
];

/// Outcome of [`request_with_retry`] when no response was obtained.
#[derive(Debug)]
pub enum RetryError {
    /// Cancelled while waiting or between attempts.
    Cancelled,
    /// Retryable failures on every attempt.
    Exhausted(String),
    /// A non-retryable network failure.
    Fatal(String),
}

impl std::fmt::Display for RetryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "request cancelled"),
            RetryError::Exhausted(msg) => write!(f, "retries exhausted: {}", msg),
            RetryError::Fatal(msg) => write!(f, "{}", msg),
        }
    }
}

/// True when the error text names one of the transient network
/// conditions worth retrying (EOF, resets, timeouts, refused /
/// unreachable / closed connections, broken pipes).
pub fn is_retryable_network_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Run `task` up to `max_attempts` times with quadratic backoff
/// (attempt² × 5 s) between attempts.
///
/// Any `Ok(response)` is returned as-is, error statuses included: the
/// caller owns HTTP status classification and 4xx must never burn a
/// retry. Cancellation interrupts the backoff sleep immediately.
pub async fn request_with_retry<F, Fut>(
    mut task: F,
    max_attempts: u32,
    cancel: &CancellationToken,
    log: &JobLog,
) -> Result<reqwest::Response, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        attempt += 1;

        match task().await {
            Ok(response) => return Ok(response),
            Err(e) => {
                let message = e.to_string();
                if !is_retryable_network_error(&message) {
                    log.append(&format!("attempt {} failed (fatal): {}", attempt, message));
                    return Err(RetryError::Fatal(message));
                }
                if attempt >= max_attempts {
                    log.append(&format!(
                        "attempt {} failed: {} — giving up after {} attempts",
                        attempt, message, max_attempts
                    ));
                    return Err(RetryError::Exhausted(message));
                }

                let delay = Duration::from_secs(u64::from(attempt * attempt) * BACKOFF_UNIT_SECS);
                warn!(
                    "request attempt {}/{} failed: {} — retrying in {:?}",
                    attempt, max_attempts, message, delay
                );
                log.append(&format!(
                    "attempt {} failed: {}. Retrying in {}s",
                    attempt,
                    message,
                    delay.as_secs()
                ));

                tokio::select! {
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
