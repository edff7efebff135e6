//! tally-core
//!
//! Asynchronous order-accrual processing engine for a loyalty-points
//! backend. Order numbers enter through a bounded dedup queue; a fixed
//! pool of workers submits each order to the external accrual service and
//! polls for its verdict with exponential backoff; a reconciliation
//! sweeper periodically re-admits every order that durable storage still
//! reports as unfinished, so no outcome is lost to a crash or a dropped
//! queue entry.
//!
//! # Modules
//! - **domain**: `PendingOrder`, accrual statuses and wire types
//! - **queue**: bounded dedup queue + shared backoff policy
//! - **client**: accrual service port and its HTTP implementation
//! - **store**: persistence gateway port (+ in-memory impl for dev/tests)
//! - **engine**: worker pool, deferred admission, reconciliation sweeper
//! - **config**: engine tunables, validated at construction

pub mod client;
pub mod config;
pub mod domain;
pub mod engine;
pub mod queue;
pub mod store;

pub use client::{AccrualApi, ClientError, HttpAccrualClient, PollReply, Submission};
pub use config::{ConfigError, EngineConfig};
pub use domain::{AccrualOutcome, AccrualStatus, PendingOrder};
pub use engine::AccrualEngine;
pub use queue::{DedupQueue, QueueError, RetryPolicy, TryEnqueueError};
pub use store::{AccrualStore, InMemoryAccrualStore, StoreError};
