use crate::errors::AppError;
use std::future::Future;
use std::time::Duration;

/// Back-off policy for calls against the source platform.
///
/// Rate-limit errors wait `rate_limit_delay`; other retryable errors wait
/// `base_delay`, multiplied by `multiplier` after each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: u32,
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            multiplier: 2,
            rate_limit_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Delay before the attempt following `attempt` (1-based) failed with `err`.
    pub fn delay_for(&self, attempt: u32, err: &AppError) -> Duration {
        if err.is_rate_limited() {
            return self.rate_limit_delay;
        }
        let factor = self.multiplier.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy runs out of attempts. Returns the last error.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                tracing::error!(
                    attempt,
                    error = %e,
                    "{} failed after max attempts",
                    what
                );
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt, &e);
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    delay_secs = delay.as_secs_f64(),
                    "{} failed, retrying",
                    what
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
