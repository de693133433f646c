//! Exponential backoff with a bounded total elapsed time

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::warn;

/// Backoff settings as they appear in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_elapsed_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 60_000,
            multiplier: 1.5,
            randomization_factor: 0.5,
            max_elapsed_ms: 15 * 60 * 1000,
        }
    }
}

/// Retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
    pub randomization_factor: f64,
    pub max_elapsed_time: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        BackoffConfig::default().into()
    }
}

impl From<BackoffConfig> for ExponentialBackoff {
    fn from(cfg: BackoffConfig) -> Self {
        Self {
            initial_interval: Duration::from_millis(cfg.initial_interval_ms),
            max_interval: Duration::from_millis(cfg.max_interval_ms),
            multiplier: cfg.multiplier.max(1.0),
            randomization_factor: cfg.randomization_factor.clamp(0.0, 1.0),
            max_elapsed_time: Duration::from_millis(cfg.max_elapsed_ms),
        }
    }
}

/// How a single attempt failed
#[derive(Debug, PartialEq, Eq)]
pub enum AttemptError<E> {
    /// The operation returned an error
    Failed(E),
    /// The operation was still pending when the time bound ran out
    TimedOut(Duration),
}

impl<E: fmt::Display> fmt::Display for AttemptError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Failed(err) => fmt::Display::fmt(err, f),
            AttemptError::TimedOut(after) => write!(f, "attempt timed out after {after:?}"),
        }
    }
}

/// Every attempt failed within the time bound
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: AttemptError<E>,
}

impl ExponentialBackoff {
    /// Interval before retry number `attempt` (1-based), without jitter
    pub fn interval(&self, attempt: u32) -> Duration {
        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(scaled.min(self.max_interval.as_secs_f64()))
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return base;
        }
        let delta = base.as_secs_f64() * self.randomization_factor;
        let base = base.as_secs_f64();
        let secs = rand::thread_rng().gen_range(base - delta..=base + delta);
        Duration::from_secs_f64(secs.max(0.0))
    }

    /// Run `op` until it succeeds or the next wait would pass the time bound.
    ///
    /// Each attempt only gets what is left of the bound; one that is still
    /// pending when it runs out ends the retry.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, RetryExhausted<E>>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = self.max_elapsed_time.saturating_sub(started.elapsed());
            let err = match tokio::time::timeout(remaining, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) => {
                    let elapsed = started.elapsed();
                    warn!(attempt = attempts, ?elapsed, "{what} attempt timed out");
                    return Err(RetryExhausted {
                        attempts,
                        elapsed,
                        last_error: AttemptError::TimedOut(remaining),
                    });
                }
            };

            let wait = self.jittered(self.interval(attempts));
            let elapsed = started.elapsed();
            if elapsed + wait > self.max_elapsed_time {
                return Err(RetryExhausted {
                    attempts,
                    elapsed,
                    last_error: AttemptError::Failed(err),
                });
            }

            warn!(attempt = attempts, error = %err, retry_in = ?wait, "retrying {what}");
            tokio::time::sleep(wait).await;
        }
    }
}
