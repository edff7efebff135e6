//! Bounded in-memory order queue with a dedup index.

use std::collections::{HashSet, VecDeque};

use tokio::sync::{Mutex, Notify};

use super::{QueueError, TryEnqueueError};
use crate::domain::PendingOrder;

struct QueueState {
    items: VecDeque<PendingOrder>,

    /// Order numbers currently resident. Updated under the same lock as
    /// `items`, so the two can never disagree.
    index: HashSet<String>,

    closed: bool,
}

/// Bounded FIFO of [`PendingOrder`]s that holds at most one entry per
/// distinct order number.
///
/// Design intent:
/// - One mutex guards all state; it is never held across a network call or
///   a backoff sleep.
/// - Suspension on full/empty uses [`Notify`], not polling. The `Notified`
///   future is created while the lock is still held, so a wakeup issued
///   between unlock and await is not lost.
/// - `close()` is the cancellation signal: it wakes every suspended caller,
///   after which `enqueue` fails with [`QueueError::Closed`] and `dequeue`
///   returns `None`.
pub struct DedupQueue {
    state: Mutex<QueueState>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl DedupQueue {
    /// Capacity must be validated by the caller; the engine config rejects
    /// zero before anything is constructed.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                index: HashSet::new(),
                closed: false,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    /// Append an order, suspending while the queue is at capacity.
    ///
    /// An order number already resident is a no-op success: the resident
    /// entry will be processed, and processing is idempotent upstream.
    pub async fn enqueue(&self, order: PendingOrder) -> Result<(), QueueError> {
        loop {
            let notified = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return Err(QueueError::Closed);
                }
                if state.index.contains(order.number()) {
                    return Ok(());
                }
                if state.items.len() < self.capacity {
                    state.index.insert(order.number().to_owned());
                    state.items.push_back(order);
                    drop(state);
                    self.not_empty.notify_one();
                    return Ok(());
                }
                // Register interest before releasing the lock.
                self.not_full.notified()
            };
            notified.await;
        }
    }

    /// Non-blocking enqueue for the ingress path. Full or closed hands the
    /// order back so the caller can defer or drop it.
    pub async fn try_enqueue(&self, order: PendingOrder) -> Result<(), TryEnqueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(TryEnqueueError::Closed(order));
        }
        if state.index.contains(order.number()) {
            return Ok(());
        }
        if state.items.len() >= self.capacity {
            return Err(TryEnqueueError::Full(order));
        }
        state.index.insert(order.number().to_owned());
        state.items.push_back(order);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest resident order, suspending while the queue is empty.
    /// Returns `None` once the queue has been closed.
    pub async fn dequeue(&self) -> Option<PendingOrder> {
        loop {
            let notified = {
                let mut state = self.state.lock().await;
                if let Some(order) = state.items.pop_front() {
                    state.index.remove(order.number());
                    drop(state);
                    // Exactly one producer slot freed, wake exactly one.
                    self.not_full.notify_one();
                    return Some(order);
                }
                if state.closed {
                    return None;
                }
                self.not_empty.notified()
            };
            notified.await;
        }
    }

    /// Current resident count. Observational only; concurrent mutators may
    /// change it before the caller acts on the answer.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every resident order and release producers blocked on capacity.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.items.clear();
        state.index.clear();
        drop(state);
        self.not_full.notify_waiters();
    }

    /// Close the queue, waking every suspended caller. Idempotent.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }
}
