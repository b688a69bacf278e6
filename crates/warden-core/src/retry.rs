//! Call-level retry with exponential backoff.
//!
//! A stage wraps one whole reasoning loop in [`RetryPolicy::run`]. Only
//! retryable categories are attempted again; permanent failures return
//! after the first attempt.

use crate::config::RetryConfig;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};
use warden_proto::AgentError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Result of a retried operation plus the attempts it took.
#[derive(Debug)]
pub struct Retried<T> {
    pub result: Result<T, AgentError>,
    pub attempts: u32,
    /// Every delay slept between attempts, in order.
    pub backoffs: Vec<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
        }
    }

    /// Delay after the failed attempt with zero-based index `failed`.
    pub fn backoff(&self, failed: u32) -> Duration {
        self.base_delay.saturating_mul(2_u32.saturating_pow(failed))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the one-based attempt number.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Retried<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, AgentError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut backoffs = Vec::new();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match op(attempt).await {
                Ok(value) => {
                    return Retried {
                        result: Ok(value),
                        attempts: attempt,
                        backoffs,
                    };
                }
                Err(err) => err,
            };

            if !err.category.is_retryable() {
                warn!(attempt, category = %err.category, error = %err.message, "Permanent failure, not retrying");
                return Retried {
                    result: Err(err),
                    attempts: attempt,
                    backoffs,
                };
            }
            if attempt >= max_attempts {
                warn!(attempt, max_attempts, category = %err.category, "Retries exhausted");
                return Retried {
                    result: Err(err),
                    attempts: attempt,
                    backoffs,
                };
            }

            let delay = self.backoff(attempt - 1);
            info!(
                attempt,
                max_attempts,
                category = %err.category,
                delay_ms = delay.as_millis() as u64,
                "Attempt failed, backing off"
            );
            backoffs.push(delay);
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use warden_proto::ErrorCategory;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let p = policy(4);
        assert_eq!(p.backoff(0), Duration::from_secs(1));
        assert_eq!(p.backoff(1), Duration::from_secs(2));
        assert_eq!(p.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let calls = Cell::new(0);
        let retried = policy(2)
            .run(|attempt| {
                calls.set(calls.get() + 1);
                async move {
                    if attempt == 1 {
                        Err(AgentError::new(ErrorCategory::Connectivity, "reset"))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(retried.result.unwrap(), "done");
        assert_eq!(retried.attempts, 2);
        assert_eq!(retried.backoffs, vec![Duration::from_secs(1)]);
        assert_eq!(calls.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_immediately() {
        let retried: Retried<()> = policy(2)
            .run(|_| async { Err(AgentError::new(ErrorCategory::Auth, "denied")) })
            .await;

        assert_eq!(retried.attempts, 1);
        assert!(retried.backoffs.is_empty());
        assert_eq!(retried.result.unwrap_err().category, ErrorCategory::Auth);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_is_permanent() {
        let retried: Retried<()> = policy(3)
            .run(|_| async { Err(AgentError::new(ErrorCategory::Unknown, "boom")) })
            .await;
        assert_eq!(retried.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_attempts() {
        let start = tokio::time::Instant::now();
        let retried: Retried<()> = policy(3)
            .run(|_| async { Err(AgentError::new(ErrorCategory::Transient, "throttled")) })
            .await;

        assert_eq!(retried.attempts, 3);
        assert_eq!(
            retried.backoffs,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        assert_eq!(retried.result.unwrap_err().category, ErrorCategory::Transient);
        assert!(start.elapsed() >= Duration::from_secs(3));
    }
}
