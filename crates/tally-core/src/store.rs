//! Persistence gateway port.
//!
//! The engine treats durable storage as an opaque, thread-safe collaborator:
//! it records terminal outcomes and answers which orders still lack one.
//! The SQL implementation lives with the rest of the storage layer outside
//! this crate; the in-memory implementation here backs the CLI and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::domain::AccrualStatus;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable store of orders and their accrual results.
#[async_trait]
pub trait AccrualStore: Send + Sync {
    /// Idempotent upsert of an order's accrual outcome.
    async fn save_accrual(
        &self,
        number: &str,
        status: AccrualStatus,
        points: Decimal,
    ) -> Result<(), StoreError>;

    /// Order numbers with no terminal accrual record — the sweep's feed.
    async fn unprocessed_orders(&self) -> Result<Vec<String>, StoreError>;

    /// Whether a terminal outcome is already recorded for this order.
    async fn accrual_exists(&self, number: &str) -> Result<bool, StoreError>;
}

/// In-memory store for development and tests.
///
/// Orders enter via [`track_order`](Self::track_order) (the ingress layer's
/// job in production) and graduate out of `unprocessed_orders` once a
/// terminal status lands.
#[derive(Default)]
pub struct InMemoryAccrualStore {
    orders: Mutex<BTreeMap<String, Option<(AccrualStatus, Decimal)>>>,
}

impl InMemoryAccrualStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an order as known-but-unprocessed.
    pub async fn track_order(&self, number: impl Into<String>) {
        self.orders.lock().await.entry(number.into()).or_insert(None);
    }

    /// Recorded accrual for an order, if any.
    pub async fn accrual(&self, number: &str) -> Option<(AccrualStatus, Decimal)> {
        self.orders.lock().await.get(number).copied().flatten()
    }
}

#[async_trait]
impl AccrualStore for InMemoryAccrualStore {
    async fn save_accrual(
        &self,
        number: &str,
        status: AccrualStatus,
        points: Decimal,
    ) -> Result<(), StoreError> {
        let mut orders = self.orders.lock().await;
        orders.insert(number.to_owned(), Some((status, points)));
        Ok(())
    }

    async fn unprocessed_orders(&self) -> Result<Vec<String>, StoreError> {
        let orders = self.orders.lock().await;
        Ok(orders
            .iter()
            .filter(|(_, accrual)| !matches!(accrual, Some((status, _)) if status.is_terminal()))
            .map(|(number, _)| number.clone())
            .collect())
    }

    async fn accrual_exists(&self, number: &str) -> Result<bool, StoreError> {
        let orders = self.orders.lock().await;
        Ok(matches!(
            orders.get(number),
            Some(Some((status, _))) if status.is_terminal()
        ))
    }
}
