//! Reconciliation sweeper: re-discovers orders without a terminal outcome.
//!
//! This is the self-healing half of the engine. Whatever was lost — a
//! crashed process, a dropped queue entry, a worker that died mid-flight —
//! the order is still non-terminal in durable storage, and every tick puts
//! it back through the ingress path. Re-admitting an order already in
//! flight is absorbed by the dedup queue.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use super::Admission;
use crate::domain::PendingOrder;
use crate::store::AccrualStore;

pub(crate) async fn sweeper_loop(
    store: Arc<dyn AccrualStore>,
    admission: Admission,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    debug!(interval_secs = interval.as_secs(), "reconciliation sweeper started");
    // The first tick fires immediately: the boot-time sweep is what
    // recovers orders left unfinished by a previous process.
    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => sweep_once(store.as_ref(), &admission).await,
        }
    }
    debug!("reconciliation sweeper stopped");
}

pub(crate) async fn sweep_once(store: &dyn AccrualStore, admission: &Admission) {
    let orders = match store.unprocessed_orders().await {
        Ok(orders) => orders,
        Err(e) => {
            // Skip the tick; the next one retries.
            warn!(error = %e, "failed to list unprocessed orders");
            return;
        }
    };

    if orders.is_empty() {
        return;
    }
    debug!(count = orders.len(), "re-admitting unprocessed orders");
    for number in orders {
        admission.admit(PendingOrder::new(number)).await;
    }
}
