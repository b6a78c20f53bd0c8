use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::domain::DomainError;

/// Bounded exponential backoff for transient failures.
///
/// The delay before retry `n` (0-indexed) is `min(base_delay * 2^n, max_delay)`.
/// Only [`DomainError::Transient`] errors are retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// No waiting between attempts.
    pub fn immediate(max_attempts: usize) -> Self {
        Self::default()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let factor = 1u32 << attempt.min(16);
        std::cmp::min(self.base_delay.saturating_mul(factor), self.max_delay)
    }

    /// Runs `operation` until it succeeds, fails with a non-transient error,
    /// or the attempts are used up.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T, DomainError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let is_last_attempt = attempt + 1 >= self.max_attempts;
                    if is_last_attempt || !e.is_transient() {
                        return Err(e);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        what,
                        attempt + 1,
                        self.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
