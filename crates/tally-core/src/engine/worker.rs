//! Worker: drives one order through submission, polling, and persistence.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::client::{AccrualApi, ClientError, PollReply};
use crate::domain::{AccrualStatus, PendingOrder};
use crate::queue::{DedupQueue, RetryPolicy};
use crate::store::AccrualStore;

/// Everything one worker needs; cheap to clone per spawn.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<DedupQueue>,
    pub(crate) client: Arc<dyn AccrualApi>,
    pub(crate) store: Arc<dyn AccrualStore>,
    pub(crate) policy: RetryPolicy,
    pub(crate) max_poll_attempts: u32,
    pub(crate) deferred_tx: mpsc::Sender<PendingOrder>,
}

pub(crate) async fn worker_loop(
    worker_id: usize,
    ctx: WorkerContext,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let order = tokio::select! {
            _ = shutdown_rx.changed() => continue,
            order = ctx.queue.dequeue() => match order {
                Some(order) => order,
                // Closed queue: the engine is stopping.
                None => break,
            },
        };

        process_order(&ctx, order, &mut shutdown_rx).await;
    }
    debug!(worker_id, "worker stopped");
}

/// Outcome of one processing pass: the order either settles, goes back
/// through backoff, or is abandoned as invalid.
enum PollVerdict {
    Settled,
    RetryLater,
    FatalOrder(ClientError),
    Cancelled,
}

async fn process_order(
    ctx: &WorkerContext,
    order: PendingOrder,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    let number = order.number().to_owned();
    debug!(order = %number, attempts = order.attempts(), "processing order");

    // A terminal outcome may already be recorded (sweeper re-admission
    // racing a slow save); skip instead of writing it twice.
    match ctx.store.accrual_exists(&number).await {
        Ok(true) => {
            debug!(order = %number, "terminal accrual already recorded");
            return;
        }
        Ok(false) => {}
        Err(e) => {
            warn!(order = %number, error = %e, "accrual existence check failed");
            retry_later(ctx, order).await;
            return;
        }
    }

    match ctx.client.submit_order(&number).await {
        // Accepted and already-known both mean the service is working on
        // the order; move on to polling.
        Ok(_) => {}
        Err(e) if e.is_transient() => {
            warn!(order = %number, error = %e, "order submission failed, will retry");
            retry_later(ctx, order).await;
            return;
        }
        Err(e) => {
            error!(order = %number, error = %e, "order rejected by accrual service");
            record_invalid(ctx, &number).await;
            return;
        }
    }

    match poll_for_result(ctx, &number, shutdown_rx).await {
        PollVerdict::Settled => {}
        PollVerdict::RetryLater => retry_later(ctx, order).await,
        PollVerdict::FatalOrder(e) => {
            error!(order = %number, error = %e, "accrual lookup failed permanently");
            record_invalid(ctx, &number).await;
        }
        // Shutdown mid-poll is not a failure; the sweep picks the order
        // up on the next run.
        PollVerdict::Cancelled => {}
    }
}

/// Poll until a terminal status arrives or the attempt budget runs out,
/// backing off between calls.
async fn poll_for_result(
    ctx: &WorkerContext,
    number: &str,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> PollVerdict {
    for attempt in 0..ctx.max_poll_attempts {
        match ctx.client.fetch_accrual(number).await {
            Ok(PollReply::Done(outcome)) => {
                match ctx
                    .store
                    .save_accrual(number, outcome.status, outcome.points)
                    .await
                {
                    Ok(()) => {
                        info!(
                            order = %number,
                            status = %outcome.status,
                            points = %outcome.points,
                            "accrual recorded"
                        );
                        return PollVerdict::Settled;
                    }
                    Err(e) => {
                        warn!(order = %number, error = %e, "failed to persist accrual");
                        return PollVerdict::RetryLater;
                    }
                }
            }
            Ok(PollReply::Processing) => {
                debug!(order = %number, attempt, "order still processing upstream");
            }
            Err(e) if e.is_transient() => {
                warn!(order = %number, error = %e, "accrual lookup failed, will retry");
                return PollVerdict::RetryLater;
            }
            Err(e) => return PollVerdict::FatalOrder(e),
        }

        if attempt + 1 < ctx.max_poll_attempts {
            tokio::select! {
                _ = tokio::time::sleep(ctx.policy.next_delay(attempt)) => {}
                _ = shutdown_rx.changed() => return PollVerdict::Cancelled,
            }
        }
    }

    // Budget exhausted. Resubmitting an already-registered order is a
    // no-op upstream, so the whole order goes back through the queue.
    debug!(order = %number, "poll budget exhausted, re-enqueueing");
    PollVerdict::RetryLater
}

async fn retry_later(ctx: &WorkerContext, mut order: PendingOrder) {
    order.record_retry();
    let number = order.number().to_owned();
    let attempts = order.attempts();
    if ctx.deferred_tx.try_send(order).is_err() {
        warn!(
            order = %number,
            attempts,
            "redelivery backlog full, order left for reconciliation sweep"
        );
    }
}

/// A fatal classification must leave a terminal record, otherwise the
/// sweep rediscovers the doomed order forever.
async fn record_invalid(ctx: &WorkerContext, number: &str) {
    if let Err(e) = ctx
        .store
        .save_accrual(number, AccrualStatus::Invalid, Decimal::ZERO)
        .await
    {
        error!(order = %number, error = %e, "failed to record invalid order");
    }
}
