//! Per-publisher token bucket rate limiting (default 1000 msg/s).

use std::time::Instant;

/// A simple leaky token bucket, refilled continuously from elapsed wall time.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    /// Set once a drop has triggered the one-time storm warning, cleared on
    /// the next successful take.
    pub warned: bool,
}

impl TokenBucket {
    /// Create a bucket starting full, refilling at `rate_per_sec`.
    pub fn new(rate_per_sec: f64) -> Self {
        Self {
            capacity: rate_per_sec,
            tokens: rate_per_sec,
            refill_per_sec: rate_per_sec,
            last_refill: Instant::now(),
            warned: false,
        }
    }

    /// Attempt to take one token. Returns `true` if the emission is allowed.
    pub fn try_take(&mut self) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            self.warned = false;
            true
        } else {
            false
        }
    }
}
