//! Bounded exponential backoff for store writes.
//!
//! Final status writes and refunds must survive a dropped Redis connection,
//! so transient store errors are retried a few times before giving up.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Attempt budget and delay curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    /// Total attempts, the first one included
    pub attempts: u32,
    pub initial: Duration,
    pub ceiling: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            attempts: 4,
            initial: Duration::from_millis(100),
            ceiling: Duration::from_secs(5),
        }
    }
}

impl Backoff {
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    pub fn with_initial(mut self, initial: Duration) -> Self {
        self.initial = initial;
        self
    }

    /// Sleeps taken between consecutive attempts.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.attempts.saturating_sub(1)).map(move |step| {
            self.initial
                .saturating_mul(1u32.checked_shl(step).unwrap_or(u32::MAX))
                .min(self.ceiling)
        })
    }
}

/// Run `op` until it succeeds, fails with an error `retryable` rejects, or
/// the attempt budget is spent.
pub async fn with_backoff<T, E, F, Fut, R>(what: &str, backoff: &Backoff, retryable: R, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut delays = backoff.delays();
    let mut attempt = 1u32;

    loop {
        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match delays.next() {
            Some(delay) if retryable(&err) => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "{} failed, retrying: {}", what, err);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            _ => {
                if attempt > 1 {
                    warn!(attempts = attempt, "{} gave up: {}", what, err);
                }
                return Err(err);
            }
        }
    }
}
