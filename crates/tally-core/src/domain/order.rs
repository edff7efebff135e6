//! Pending order: the unit of work flowing through the queue.

use chrono::{DateTime, Utc};

/// An order number awaiting or undergoing accrual processing.
///
/// The order number is externally assigned and doubles as the dedup key.
/// `attempts` counts submission cycles, not poll calls; the poll loop keeps
/// its own bounded counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    number: String,

    /// Number of submission cycles attempted so far.
    attempts: u32,

    /// Refreshed on every retry. Diagnostic only, never used for ordering.
    last_attempt_at: DateTime<Utc>,
}

impl PendingOrder {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            attempts: 0,
            last_attempt_at: Utc::now(),
        }
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_attempt_at(&self) -> DateTime<Utc> {
        self.last_attempt_at
    }

    /// Mark one more failed submission cycle.
    pub fn record_retry(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Utc::now();
    }
}
