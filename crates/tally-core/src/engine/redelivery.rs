//! Redelivery worker: one task owns every deferred admission.
//!
//! Orders land here when the queue is full (ingress back-pressure) or when
//! a processing pass failed transiently. Each waits out its backoff delay
//! in a min-heap keyed by due time, then goes back into the queue. One
//! task instead of one per retry keeps concurrency bounded under sustained
//! overload.

use std::collections::BinaryHeap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::PendingOrder;
use crate::queue::{DedupQueue, RetryPolicy, TryEnqueueError};

/// Heap entry. Reverse ordering so `BinaryHeap` acts as a min-heap
/// (earliest due time first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledRetry {
    due_at: Instant,
    order: PendingOrder,
}

impl PartialOrd for ScheduledRetry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRetry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.due_at.cmp(&self.due_at)
    }
}

pub(crate) async fn redelivery_loop(
    queue: Arc<DedupQueue>,
    policy: RetryPolicy,
    mut deferred_rx: mpsc::Receiver<PendingOrder>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!("redelivery worker started");
    let mut scheduled: BinaryHeap<ScheduledRetry> = BinaryHeap::new();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        // Promote everything that is due.
        while let Some(entry) = scheduled.peek() {
            if entry.due_at > Instant::now() {
                break;
            }
            let Some(entry) = scheduled.pop() else { break };
            match queue.try_enqueue(entry.order).await {
                Ok(()) => {}
                Err(TryEnqueueError::Full(mut order)) => {
                    // Still no room: back off again, indefinitely. An
                    // accepted order is never silently rejected.
                    order.record_retry();
                    schedule(&mut scheduled, &policy, order);
                    break;
                }
                Err(TryEnqueueError::Closed(_)) => return,
            }
        }

        let received = match scheduled.peek().map(|entry| entry.due_at) {
            Some(due_at) => tokio::select! {
                _ = shutdown_rx.changed() => continue,
                received = deferred_rx.recv() => received,
                _ = tokio::time::sleep_until(due_at) => continue,
            },
            None => tokio::select! {
                _ = shutdown_rx.changed() => continue,
                received = deferred_rx.recv() => received,
            },
        };

        // All senders gone means the engine itself is gone.
        let Some(order) = received else { break };
        schedule(&mut scheduled, &policy, order);
    }
    debug!("redelivery worker stopped");
}

fn schedule(heap: &mut BinaryHeap<ScheduledRetry>, policy: &RetryPolicy, order: PendingOrder) {
    let delay = policy.next_delay(order.attempts());
    debug!(
        order = %order.number(),
        attempts = order.attempts(),
        delay_ms = delay.as_millis() as u64,
        "admission deferred"
    );
    heap.push(ScheduledRetry {
        due_at: Instant::now() + delay,
        order,
    });
}
