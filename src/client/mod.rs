//! External service clients
//!
//! Thin clients for the two collaborators: the generative text API and
//! the tool-invocation service. Both sit behind traits so the pipeline
//! can run against stubs in tests, and both surface a retryable/fatal
//! error classification that the shared retry loop consumes.

pub mod generative;
pub mod toolservice;

pub use generative::{ChatClient, TextGenerator};
pub use toolservice::{ToolInvoker, ToolServiceClient};

use crate::config::RetryConfig;
use crate::error::{ApiError, ToolError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Errors that can be waited out.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        ApiError::is_retryable(self)
    }
}

impl Retryable for ToolError {
    fn is_retryable(&self) -> bool {
        ToolError::is_retryable(self)
    }
}

/// Bounded retry with fixed or exponential backoff.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_secs(config.base_delay_secs),
            exponential: config.exponential,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.exponential {
            self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
        } else {
            self.base_delay
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            exponential: true,
        }
    }
}

/// Runs `op` until it succeeds, the error is non-retryable, or the
/// attempt budget is spent. The last error is returned either way.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}, retrying in {:?}",
                    what, attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_schedule() {
        let fixed = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            exponential: false,
        };
        assert_eq!(fixed.delay_for(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_for(3), Duration::from_secs(5));

        let expo = RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
            exponential: true,
        };
        assert_eq!(expo.delay_for(1), Duration::from_secs(5));
        assert_eq!(expo.delay_for(2), Duration::from_secs(10));
        assert_eq!(expo.delay_for(3), Duration::from_secs(20));
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            exponential: false,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, ApiError> = with_retry(&policy, "test op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ApiError::RateLimited)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            exponential: false,
        };
        let calls = AtomicU32::new(0);
        let result: Result<u32, ApiError> = with_retry(&policy, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Transport("503".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_retry_never_retries_fatal_errors() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<u32, ApiError> = with_retry(&policy, "test op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ApiError::Auth("bad key".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
