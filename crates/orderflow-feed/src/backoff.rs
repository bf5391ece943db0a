//! Reconnect backoff.

use std::time::Duration;

/// Cap on the exponent so the shift never overflows.
const MAX_EXPONENT: u32 = 10;

/// Exponential backoff without jitter.
///
/// `next_delay` returns `min(max, base * 2^attempt)` and then advances the
/// attempt counter (capped at 10). `reset` is called after a successful
/// connect.
#[derive(Debug, Clone)]
pub struct Backoff {
    base_ms: u64,
    max_ms: u64,
    attempt: u32,
}

impl Backoff {
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            max_ms,
            attempt: 0,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self
            .base_ms
            .saturating_mul(1u64 << self.attempt)
            .min(self.max_ms);
        self.attempt = (self.attempt + 1).min(MAX_EXPONENT);
        Duration::from_millis(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(1000, 30_000)
    }
}
