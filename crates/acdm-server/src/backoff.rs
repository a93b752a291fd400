//! Exponential retry delay for the background loops.
//!
//! The loops tick at a fixed rate; a [`Backoff`] tells them whether the next
//! attempt against the backend (or the database) is due yet.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

const JITTER_RATIO: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    failures: u32,
    next_attempt_at: Instant,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.max(Duration::from_millis(1));
        Self {
            base,
            max: max.max(base),
            failures: 0,
            next_attempt_at: Instant::now(),
        }
    }

    pub fn ready(&self) -> bool {
        Instant::now() >= self.next_attempt_at
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.next_attempt_at = Instant::now();
    }

    /// Record a failure and return the delay until the next attempt.
    pub fn fail(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = jittered(self.delay_without_jitter(), JITTER_RATIO);
        self.next_attempt_at = Instant::now() + delay;
        delay
    }

    /// `base * 2^failures`, capped at `max`.
    fn delay_without_jitter(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.failures.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }
}

fn jittered(delay: Duration, ratio: f64) -> Duration {
    let spread_ms = (delay.as_millis() as f64 * ratio) as u64;
    if spread_ms == 0 {
        return delay;
    }
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::from(d.subsec_nanos()))
        .unwrap_or(0);
    delay + Duration::from_millis(seed % (spread_ms + 1))
}
