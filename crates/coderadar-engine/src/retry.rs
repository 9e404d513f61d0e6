use coderadar_core::{CodeRadarError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Bounded exponential retry for idempotent store writes.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(config: &coderadar_core::PersistenceConfig) -> Self {
        Self::new(
            config.max_write_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or the
    /// retry budget is spent. Exhausted budgets surface as `Persistence`.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.base_backoff * 2u32.saturating_pow(attempt - 1);
                    warn!(
                        "{} failed (attempt {}/{}): {}; retrying in {:?}",
                        what,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(CodeRadarError::Persistence(format!(
                        "{} failed after {} attempts: {}",
                        what,
                        attempt + 1,
                        e
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&coderadar_core::PersistenceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));
        let value = policy
            .run("write", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CodeRadarError::Persistence("busy".into()))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(10));
        let result: Result<()> = policy
            .run("write", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CodeRadarError::Persistence("down".into()))
            })
            .await;
        assert!(matches!(result, Err(CodeRadarError::Persistence(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_logic_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::default()
            .run("write", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CodeRadarError::NotFound("job".into()))
            })
            .await;
        assert!(matches!(result, Err(CodeRadarError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
