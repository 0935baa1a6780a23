//! Bounded exponential backoff

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::shutdown::Shutdown;

/// Retry schedule: `initial_delay * 2^attempt`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(rename = "initial_delay_ms", with = "millis")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Result of a retried operation that did not succeed
#[derive(Debug, PartialEq, Eq)]
pub enum RetryError<E> {
    /// Last error returned by the operation
    Failed { error: E, attempts: u32 },
    /// Shutdown was signalled while waiting between attempts
    Cancelled(E),
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> E {
        match self {
            Self::Failed { error, .. } | Self::Cancelled(error) => error,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt + 1` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, returns a non-retryable error, or attempts run out.
    ///
    /// Backoff sleeps end early when `shutdown` fires.
    pub async fn retry<T, E, F, Fut, P>(
        &self,
        shutdown: &Shutdown,
        is_retryable: P,
        mut op: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            attempt += 1;

            if attempt >= attempts || !is_retryable(&error) {
                return Err(RetryError::Failed {
                    error,
                    attempts: attempt,
                });
            }

            let delay = self.delay_for(attempt - 1);
            tracing::debug!(
                "Attempt {}/{} failed: {}; retrying in {:?}",
                attempt,
                attempts,
                error,
                delay
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.triggered() => return Err(RetryError::Cancelled(error)),
            }
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
