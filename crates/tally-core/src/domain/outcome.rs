//! Accrual outcome model: what the external service told us about an order.
//!
//! This module only defines the shapes exchanged with the accrual service;
//! it knows nothing about queues or workers.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Domain state of an order inside the accrual service.
///
/// Serialized SCREAMING_SNAKE_CASE to match the wire contract:
/// REGISTERED / PROCESSING / PROCESSED / INVALID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
}

impl AccrualStatus {
    /// Terminal statuses need no further polling.
    pub fn is_terminal(self) -> bool {
        matches!(self, AccrualStatus::Processed | AccrualStatus::Invalid)
    }
}

impl std::fmt::Display for AccrualStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AccrualStatus::Registered => "REGISTERED",
            AccrualStatus::Processing => "PROCESSING",
            AccrualStatus::Processed => "PROCESSED",
            AccrualStatus::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

/// Final result of consulting the external service for one order.
///
/// Invariant: `points` is zero unless `status` is `Processed`. The
/// constructor enforces it, so a `Registered`/`Invalid` outcome can never
/// smuggle a point amount into the store.
#[derive(Debug, Clone, PartialEq)]
pub struct AccrualOutcome {
    pub order: String,
    pub status: AccrualStatus,
    pub points: Decimal,
}

impl AccrualOutcome {
    pub fn new(order: impl Into<String>, status: AccrualStatus, points: Option<Decimal>) -> Self {
        let points = match status {
            AccrualStatus::Processed => points.unwrap_or(Decimal::ZERO),
            _ => Decimal::ZERO,
        };
        Self {
            order: order.into(),
            status,
            points,
        }
    }
}

/// Wire reply from `GET /api/orders/{number}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccrualReply {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl From<AccrualReply> for AccrualOutcome {
    fn from(reply: AccrualReply) -> Self {
        AccrualOutcome::new(reply.order, reply.status, reply.accrual)
    }
}

/// Wire body for `POST /api/orders`.
///
/// The goods list belongs to the ingress layer that took the purchase; the
/// engine only knows order numbers, so it registers with an empty list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRegistration {
    pub order: String,
    pub goods: Vec<OrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub description: String,
    pub price: Decimal,
}

impl OrderRegistration {
    pub fn new(order: impl Into<String>) -> Self {
        Self {
            order: order.into(),
            goods: Vec::new(),
        }
    }
}
