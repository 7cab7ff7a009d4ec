//! Step throughput throttling.
//!
//! A steady-interval pacer: `per_second` steps are released per second, one
//! every `1/per_second` seconds. Each caller reserves the next free slot
//! under a short lock and sleeps outside it, so concurrent acquirers are
//! spread evenly rather than released in bursts.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Paces step submission to a fixed steps-per-second rate.
pub struct StepRateLimiter {
    per_second: f64,
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl StepRateLimiter {
    /// Build a limiter for `per_second > 0`. Non-positive rates mean
    /// "unlimited" and are represented by the absence of a limiter.
    pub fn new(per_second: f64) -> Self {
        debug_assert!(per_second > 0.0);
        Self {
            per_second,
            interval: Duration::from_secs_f64(1.0 / per_second),
            next_slot: Mutex::new(None),
        }
    }

    pub fn per_second(&self) -> f64 {
        self.per_second
    }

    /// Wait until the next submission slot. The first caller passes through
    /// immediately; each subsequent caller is delayed one interval further.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock();
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

impl std::fmt::Debug for StepRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRateLimiter")
            .field("per_second", &self.per_second)
            .finish()
    }
}
