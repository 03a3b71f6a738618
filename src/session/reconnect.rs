//! Exponential backoff for unexpected disconnects

use std::time::Duration;

/// Reconnection backoff with a bounded attempt count.
///
/// Engaged on an unexpected `Failed` transition; never consulted once the
/// manual-end latch is set.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1), Duration::from_secs(30))
    }
}

impl ReconnectPolicy {
    /// Build a policy with explicit bounds
    #[must_use]
    pub const fn new(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            base,
            cap,
        }
    }

    /// Delay before the next attempt: `min(cap, base * 2^attempt)`.
    ///
    /// Returns `None` once the attempt ceiling is reached; the caller
    /// surfaces a terminal failure instead of retrying.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(self.attempt);
        self.attempt += 1;
        Some(self.base.saturating_mul(factor).min(self.cap))
    }

    /// Reset after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts consumed since the last reset
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }
}
