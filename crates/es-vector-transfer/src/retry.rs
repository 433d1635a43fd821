//! Bounded retry with exponential backoff.
//!
//! Every network suspension point of a transfer (page fetch, embedding call,
//! upsert call) goes through [`with_retry`]. Only transient failures are
//! retried; once attempts are exhausted the last error is handed back to the
//! pipeline, which decides whether it is absorbed or fatal.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Retry behavior for one class of operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries (not counting the first attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per retry.
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub add_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Default policy with a custom retry budget.
    #[must_use]
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// No retries at all.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Delay before retry number `attempt` (1-based; 0 means the first try).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64());

        let delay = if self.add_jitter {
            capped + capped * 0.25 * jitter_fraction()
        } else {
            capped
        };

        Duration::from_secs_f64(delay)
    }

    /// Delay before retrying after `error`. Rate limits that announce a
    /// wait time are honored up to `max_delay`.
    fn delay_after(&self, attempt: u32, error: &Error) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            Error::RateLimit(secs) => backoff.max(Duration::from_secs(*secs)).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Pseudo-random value in `[0, 1)` derived from the clock.
fn jitter_fraction() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}

/// Whether an error is worth another attempt.
#[must_use]
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::RateLimit(_) | Error::Io(_) => true,
        Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        Error::SourceUnavailable(msg)
        | Error::Embedding(msg)
        | Error::Destination(msg)
        | Error::DestinationUnavailable(msg) => is_transient_message(msg),
        Error::Authentication(_)
        | Error::Config(_)
        | Error::Mapping(_)
        | Error::DimensionMismatch { .. }
        | Error::Json(_)
        | Error::Internal(_)
        | Error::PartialWrite { .. }
        | Error::Aborted { .. } => false,
    }
}

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();

    let rate_limited =
        msg.contains("429") || msg.contains("rate limit") || msg.contains("too many requests");
    let transient = msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection refused")
        || msg.contains("connection reset")
        || msg.contains("connection closed")
        || msg.contains("connection error")
        || msg.contains("temporar");
    let server_error = ["500", "502", "503", "504"]
        .iter()
        .any(|code| msg.contains(code))
        || msg.contains("internal server error")
        || msg.contains("bad gateway")
        || msg.contains("service unavailable");

    rate_limited || transient || server_error
}

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is spent.
///
/// # Errors
///
/// Returns the last error produced by `operation`.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_retries + 1;
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{}: succeeded after {} retries", operation_name, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < config.max_retries && is_retryable_error(&e) => {
                attempt += 1;
                let delay = config.delay_after(attempt, &e);
                warn!(
                    "{}: retryable error (attempt {}/{}), retrying in {:?}: {}",
                    operation_name, attempt, max_attempts, delay, e
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            add_jitter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();

        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert!(config.add_jitter);
    }

    #[test]
    fn test_delay_for_attempt_exponential() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(100),
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(3), Duration::from_secs(4));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(10),
            backoff_multiplier: 10.0,
            max_delay: Duration::from_secs(30),
            add_jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(5), Duration::from_secs(30));
    }

    #[test]
    fn test_rate_limit_delay_is_capped() {
        let config = fast_config(3);
        let delay = config.delay_after(1, &Error::RateLimit(60));
        assert_eq!(delay, Duration::from_millis(5));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(is_retryable_error(&Error::RateLimit(1)));
        assert!(is_retryable_error(&Error::Embedding(
            "OpenAI error 503: Service Unavailable".to_string()
        )));
        assert!(is_retryable_error(&Error::SourceUnavailable(
            "Elasticsearch request failed: connection refused".to_string()
        )));
        assert!(is_retryable_error(&Error::DestinationUnavailable(
            "request timed out".to_string()
        )));
    }

    #[test]
    fn test_not_retryable_classification() {
        assert!(!is_retryable_error(&Error::Authentication(
            "HTTP 401 Unauthorized".to_string()
        )));
        assert!(!is_retryable_error(&Error::SourceUnavailable(
            "Elasticsearch error 404: index_not_found_exception".to_string()
        )));
        assert!(!is_retryable_error(&Error::Mapping("no id".to_string())));
        assert!(!is_retryable_error(&Error::Config("bad".to_string())));
    }

    #[tokio::test]
    async fn test_with_retry_success_after_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry(&fast_config(3), "flaky", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::Embedding("HTTP 502 Bad Gateway".to_string()))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&fast_config(2), "down", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::DestinationUnavailable("connection refused".to_string()))
            }
        })
        .await;

        assert!(matches!(result, Err(Error::DestinationUnavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_fails_fast() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<()> = with_retry(&fast_config(5), "auth", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Authentication("HTTP 401".to_string()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
