//! Work queue: bounded dedup queue plus the shared backoff policy.

mod dedup;
mod retry;

pub use dedup::DedupQueue;
pub use retry::RetryPolicy;

use thiserror::Error;

use crate::domain::PendingOrder;

/// Failure of a blocking [`DedupQueue::enqueue`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed while the caller was suspended (shutdown).
    #[error("queue closed")]
    Closed,
}

/// Failure of a non-blocking [`DedupQueue::try_enqueue`].
///
/// `Full` hands the rejected order back to the caller, like
/// `mpsc::error::TrySendError` does, so the ingress path can defer it
/// without cloning.
#[derive(Debug, Error)]
pub enum TryEnqueueError {
    #[error("queue full")]
    Full(PendingOrder),

    #[error("queue closed")]
    Closed(PendingOrder),
}
