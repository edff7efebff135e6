//! Accrual service port: typed outcomes for submit and result-poll calls.

mod http;

pub use http::HttpAccrualClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::AccrualOutcome;

/// Result of submitting an order to the accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Accepted for processing.
    Accepted,

    /// The service already knows this order (registered or processed).
    /// Resubmission is a no-op upstream, which is what makes re-enqueueing
    /// after a crash safe.
    AlreadyKnown,
}

/// Result of polling for an order's accrual.
#[derive(Debug, Clone, PartialEq)]
pub enum PollReply {
    /// Terminal status reached; hand off to the store.
    Done(AccrualOutcome),

    /// Still registered/processing upstream; poll again later.
    Processing,
}

/// Errors from the accrual service, pre-classified for the retry logic.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure (connect, timeout, broken transfer).
    #[error("transport error: {0}")]
    Transport(String),

    /// 429 from the service. `retry_after` carries the Retry-After header
    /// in seconds when present.
    #[error("rate limited (retry_after={retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// 5xx from the service.
    #[error("upstream error: HTTP {0}")]
    Upstream(u16),

    /// 4xx rejection other than rate-limit/already-known: the order itself
    /// is bad and resubmitting it will never succeed.
    #[error("order rejected: HTTP {0}")]
    Rejected(u16),

    /// The service does not know this order (204 on poll).
    #[error("order not known upstream")]
    NotFound,

    /// Response body did not parse.
    #[error("decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Transient errors are retried via backoff; the rest are fatal for the
    /// order they concern.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Transport(_)
                | ClientError::RateLimited { .. }
                | ClientError::Upstream(_)
                | ClientError::Decode(_)
        )
    }
}

/// Port to the external accrual service.
///
/// The HTTP implementation lives in this module; tests swap in scripted
/// fakes, which is the whole point of the seam.
#[async_trait]
pub trait AccrualApi: Send + Sync {
    /// Register an order for accrual computation.
    async fn submit_order(&self, number: &str) -> Result<Submission, ClientError>;

    /// Fetch the current accrual verdict for an order.
    async fn fetch_accrual(&self, number: &str) -> Result<PollReply, ClientError>;
}
