//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Exponential backoff with a cap.
///
/// The same formula serves two independent call sites — deferred admission
/// when the queue is full, and the result-polling loop — each tracking its
/// own attempt counter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay for attempt 0.
    pub base_delay: Duration,

    /// Upper bound on any computed delay.
    pub max_delay: Duration,

    /// Backoff multiplier per attempt.
    pub multiplier: f64,

    /// When set, stretch each delay by a random factor in [1.0, 2.0).
    /// The cap still applies afterwards.
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            multiplier: 2.0,
            jitter: false,
        }
    }

    pub fn with_jitter(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// Delay before the next attempt, given how many attempts have already
    /// been made (0-indexed): `min(base * multiplier^attempts, max_delay)`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        // powi saturates to infinity for large exponents; the min() below
        // brings that back to max_delay.
        let exponent = attempts.min(i32::MAX as u32) as i32;
        let mut delay_secs = base_secs * self.multiplier.powi(exponent);
        if self.jitter {
            delay_secs *= 1.0 + rand::random::<f64>();
        }
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(30))
    }
}
