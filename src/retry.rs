use crate::config::ScannerConfig;
use crate::error::{classify_error, OperationError, ScanError};
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Exponential backoff for scan operations.
///
/// `max_attempts` counts the first try. The delay before retry `n` is
/// `base_delay * 2^(n-1)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base_delay: config.retry_delay(),
        }
    }

    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Runs `f` until it succeeds, the error is not recoverable, or attempts run out.
    ///
    /// Every failure is classified against `operation`; the returned
    /// [`ScanError`] is the classification of the last failure.
    pub async fn run<F, Fut, T>(&self, operation: &str, mut f: F) -> Result<T, ScanError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, OperationError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match f(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let scan_err = classify_error(&err, operation)
                .with_context(json!({ "operation": operation, "attempts": attempt }));

            if !scan_err.recoverable {
                warn!(op = operation, error = %err, "not retrying unrecoverable error");
                return Err(scan_err);
            }
            if attempt >= max_attempts {
                warn!(op = operation, attempts = attempt, error = %err, "giving up");
                return Err(scan_err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                op = operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "operation failed, retrying"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScanErrorType;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    fn transient() -> OperationError {
        OperationError::CommandFailed {
            command: "npm audit".to_string(),
            code: Some(1),
            stderr: "socket hang up".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
        };
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_fails_twice_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = policy(3)
            .run("npm-audit", |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(1)
            .run("npm-audit", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.error_type, ScanErrorType::CommandFailed);
        assert_eq!(err.context.unwrap()["attempts"], 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_permission_denied_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = policy(5)
            .run("manifest", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(OperationError::Io {
                        path: PathBuf::from("package.json"),
                        source: io::Error::from(io::ErrorKind::PermissionDenied),
                    })
                }
            })
            .await;

        assert_eq!(result.unwrap_err().error_type, ScanErrorType::PermissionDenied);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_retries_still_attempts_once() {
        let config = ScannerConfig {
            max_retries: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
