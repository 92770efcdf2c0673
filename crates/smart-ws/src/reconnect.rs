//! Reconnection backoff and the timer that drives reconnect attempts.

use std::{future, pin::Pin, time::Duration};

use rand::Rng;
use tokio::time::{Sleep, sleep};

/// Backoff parameters derived from [`ReconnectConfig`](crate::ReconnectConfig).
#[derive(Clone, Copy, Debug)]
pub(crate) struct BackoffConfig {
    pub(crate) min_delay: Duration,
    pub(crate) max_delay: Duration,
    pub(crate) jitter: f64,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.min_delay.is_zero() {
            return Err("Min reconnect delay must be > 0".to_string());
        }
        if self.max_delay < self.min_delay {
            return Err("Max reconnect delay must be >= min reconnect delay".to_string());
        }
        if !(0.0..=1.0).contains(&self.jitter) || !self.jitter.is_finite() {
            return Err("Jitter must be between 0.0 and 1.0".to_string());
        }
        Ok(())
    }
}

/// Unjittered delay: `min(max_delay, min_delay * 2^attempt)`.
pub(crate) fn base_delay(config: BackoffConfig, attempt: u32) -> Duration {
    let min = config.min_delay.as_secs_f64();
    let max = config.max_delay.as_secs_f64();
    let exponent = 2f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    saturating_secs((min * exponent).min(max))
}

/// Base delay scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
pub(crate) fn calculate_backoff(config: BackoffConfig, attempt: u32) -> Duration {
    let base = base_delay(config, attempt).as_secs_f64();

    if config.jitter == 0.0 {
        return saturating_secs(base);
    }

    let mut rng = rand::rng();
    let factor = rng.random_range((1.0 - config.jitter)..=(1.0 + config.jitter));
    saturating_secs((base * factor).max(0.0))
}

/// Float seconds to a `Duration`, clamped to `Duration::MAX`.
fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Holds at most one pending reconnect timer.
pub(crate) struct ReconnectScheduler {
    backoff: BackoffConfig,
    timer: Option<Pin<Box<Sleep>>>,
}

impl ReconnectScheduler {
    pub(crate) fn new(backoff: BackoffConfig) -> Self {
        Self {
            backoff,
            timer: None,
        }
    }

    /// Arm the timer for the given attempt, replacing any pending one.
    pub(crate) fn schedule(&mut self, attempt: u32) -> Duration {
        let delay = calculate_backoff(self.backoff, attempt);
        self.timer = Some(Box::pin(sleep(delay)));
        delay
    }

    /// Drop the pending timer. Returns whether one was armed.
    pub(crate) fn cancel(&mut self) -> bool {
        self.timer.take().is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.timer.is_some()
    }

    /// Resolves when the armed timer elapses; never resolves when disarmed.
    ///
    /// Cancel safe: dropping the future leaves the timer armed.
    pub(crate) async fn fired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.as_mut().await;
                self.timer = None;
            }
            None => future::pending().await,
        }
    }
}
