//! Retry with exponential backoff and jitter.
//!
//! One [`RetryPolicy`] type is shared by every collaborator boundary
//! (scraper, LLM, sinks); each gets its own configured instance.
//!
//! # Backoff Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
//! ```

use rand::{Rng, rng};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: usize,
    /// Delay before the first retry, doubled for each following one.
    pub base_delay_ms: u64,
    /// Cap on the exponential part of the delay.
    pub max_delay_ms: u64,
    /// Upper bound of the random jitter added to each delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.saturating_sub(1).min(31) as u32;
        let exp = self.base_delay_ms.saturating_mul(1u64 << shift);
        Duration::from_millis(exp.min(self.max_delay_ms))
    }

    fn jitter(&self) -> Duration {
        if self.jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rng().random_range(0..=self.jitter_ms))
        }
    }

    /// Run `op` until it succeeds or the retries are exhausted; the last
    /// error is returned.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        if self.max_retries > 0 {
                            error!(
                                what,
                                attempt,
                                max = self.max_retries,
                                elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                                error = %e,
                                "Retries exhausted"
                            );
                        }
                        return Err(e);
                    }

                    let delay = self.backoff(attempt) + self.jitter();
                    warn!(
                        what,
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                        ?delay,
                        error = %e,
                        "Attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
