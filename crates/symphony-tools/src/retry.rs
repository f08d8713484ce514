//! Bounded retry with exponential backoff for transient tool failures.

use std::future::Future;
use std::time::Duration;

use symphony_core::tool::ToolError;
use tokio::time::sleep;

/// Per-tool retry policy; only transient errors are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    fn backoff(&self, retries_used: u32) -> Duration {
        let shift = retries_used.min(16);
        let delay = self.base_delay.saturating_mul(1 << shift);
        delay.min(self.max_delay)
    }

    /// Run `operation`, retrying transient failures up to the budget.
    pub async fn run<T, F, Fut>(&self, tool: &str, operation: F) -> Result<T, ToolError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let mut retries_used = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && retries_used < self.max_retries => {
                    let delay = self.backoff(retries_used);
                    retries_used += 1;
                    tracing::warn!(
                        tool = %tool,
                        error = %err,
                        retry_attempt = retries_used,
                        retry_in_ms = delay.as_millis() as u64,
                        "retrying transient tool failure"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_transient_errors_retry_until_budget() {
        tokio_test::block_on(async {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(0),
                max_delay: Duration::from_millis(0),
            };

            let result: Result<(), ToolError> = policy
                .run("fake", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ToolError::Timeout(10)) }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 3);
        });
    }

    #[test]
    fn test_non_transient_errors_fail_fast() {
        tokio_test::block_on(async {
            let calls = AtomicU32::new(0);
            let policy = RetryPolicy::default();

            let result: Result<(), ToolError> = policy
                .run("fake", || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(ToolError::Unavailable("no key".to_string())) }
                })
                .await;
            assert!(result.is_err());
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        });
    }
}
