//! The accrual engine: worker pool, deferred admission, reconciliation.

mod redelivery;
mod sweeper;
mod worker;

use std::sync::Arc;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::client::AccrualApi;
use crate::config::{ConfigError, EngineConfig};
use crate::domain::PendingOrder;
use crate::queue::{DedupQueue, RetryPolicy, TryEnqueueError};
use crate::store::AccrualStore;

/// Shared ingress path: non-blocking enqueue with deferral to the
/// redelivery worker when the queue is at capacity.
///
/// Used by [`AccrualEngine::add_order`] and the reconciliation sweeper, so
/// both back-pressure the same way.
#[derive(Clone)]
pub(crate) struct Admission {
    queue: Arc<DedupQueue>,
    deferred_tx: mpsc::Sender<PendingOrder>,
}

impl Admission {
    pub(crate) async fn admit(&self, order: PendingOrder) {
        match self.queue.try_enqueue(order).await {
            Ok(()) => {}
            Err(TryEnqueueError::Full(order)) => {
                let number = order.number().to_owned();
                if self.deferred_tx.try_send(order).is_err() {
                    // The order stays non-terminal in the store, so the
                    // reconciliation sweep will re-admit it.
                    warn!(
                        order = %number,
                        "admission backlog full, order left for reconciliation sweep"
                    );
                }
            }
            Err(TryEnqueueError::Closed(order)) => {
                debug!(order = %order.number(), "engine stopping, order dropped");
            }
        }
    }
}

enum Lifecycle {
    Idle,
    Running {
        shutdown_tx: watch::Sender<bool>,
        joins: Vec<JoinHandle<()>>,
    },
    Stopped,
}

/// Asynchronous order-accrual processing engine.
///
/// Lifecycle is one-way: `Idle -> Running -> Stopped`. [`start`](Self::start)
/// spawns the workers, the redelivery worker, and the sweeper;
/// [`stop`](Self::stop) signals shutdown, closes the queue so every
/// suspended task wakes, and joins them under a bounded grace period. Both
/// are idempotent and safe to call from any task.
pub struct AccrualEngine {
    queue: Arc<DedupQueue>,
    client: Arc<dyn AccrualApi>,
    store: Arc<dyn AccrualStore>,
    config: EngineConfig,
    policy: RetryPolicy,
    admission: Admission,
    deferred_rx: Mutex<Option<mpsc::Receiver<PendingOrder>>>,
    state: Mutex<Lifecycle>,
}

impl AccrualEngine {
    /// Construction validates the config; a misconfigured engine never
    /// exists.
    pub fn new(
        config: EngineConfig,
        client: Arc<dyn AccrualApi>,
        store: Arc<dyn AccrualStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let queue = Arc::new(DedupQueue::new(config.queue_capacity));
        let (deferred_tx, deferred_rx) = mpsc::channel(config.admission_backlog);
        let policy = RetryPolicy::new(config.base_backoff, config.max_backoff);

        Ok(Self {
            admission: Admission {
                queue: Arc::clone(&queue),
                deferred_tx,
            },
            queue,
            client,
            store,
            config,
            policy,
            deferred_rx: Mutex::new(Some(deferred_rx)),
            state: Mutex::new(Lifecycle::Idle),
        })
    }

    /// Spawn the worker pool, redelivery worker, and sweeper. No-op unless
    /// the engine is idle.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if !matches!(*state, Lifecycle::Idle) {
            debug!("start ignored, engine is not idle");
            return;
        }
        let Some(deferred_rx) = self.deferred_rx.lock().await.take() else {
            return;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut joins = Vec::with_capacity(self.config.workers + 2);

        for worker_id in 0..self.config.workers {
            let ctx = worker::WorkerContext {
                queue: Arc::clone(&self.queue),
                client: Arc::clone(&self.client),
                store: Arc::clone(&self.store),
                policy: self.policy.clone(),
                max_poll_attempts: self.config.max_poll_attempts,
                deferred_tx: self.admission.deferred_tx.clone(),
            };
            joins.push(tokio::spawn(worker::worker_loop(
                worker_id,
                ctx,
                shutdown_rx.clone(),
            )));
        }

        joins.push(tokio::spawn(redelivery::redelivery_loop(
            Arc::clone(&self.queue),
            self.policy.clone(),
            deferred_rx,
            shutdown_rx.clone(),
        )));

        joins.push(tokio::spawn(sweeper::sweeper_loop(
            Arc::clone(&self.store),
            self.admission.clone(),
            self.config.sweep_interval,
            shutdown_rx,
        )));

        *state = Lifecycle::Running { shutdown_tx, joins };
        info!(workers = self.config.workers, "accrual engine started");
    }

    /// Signal shutdown and wait for every spawned task. Idempotent; a
    /// no-op before `start`.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        match std::mem::replace(&mut *state, Lifecycle::Stopped) {
            Lifecycle::Running { shutdown_tx, joins } => {
                // Receivers may be gone already if every task has exited.
                let _ = shutdown_tx.send(true);
                self.queue.close().await;
                for join in joins {
                    if timeout(self.config.shutdown_grace, join).await.is_err() {
                        warn!("engine task did not stop within the grace period");
                    }
                }
                info!("accrual engine stopped");
            }
            Lifecycle::Idle => {
                *state = Lifecycle::Idle;
            }
            Lifecycle::Stopped => {}
        }
    }

    /// Fire-and-forget ingress. Never blocks the caller: a full queue
    /// defers the order to the redelivery worker. The outcome is
    /// observable only through the persisted order status.
    pub async fn add_order(&self, number: impl Into<String>) {
        self.admission.admit(PendingOrder::new(number)).await;
    }

    /// Orders currently resident in the queue. Observational only.
    pub async fn queue_depth(&self) -> usize {
        self.queue.len().await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rust_decimal::Decimal;

    use super::*;
    use crate::client::{ClientError, PollReply, Submission};
    use crate::domain::{AccrualOutcome, AccrualStatus};
    use crate::store::{InMemoryAccrualStore, StoreError};

    /// Accrual service fake: scripted responses are consumed first, then
    /// the defaults (submit accepted, fetch processed with 100.5 points).
    struct ScriptedClient {
        submit_script: tokio::sync::Mutex<VecDeque<Result<Submission, ClientError>>>,
        fetch_script: tokio::sync::Mutex<VecDeque<Result<PollReply, ClientError>>>,
        submit_delay: Duration,
        submit_calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                submit_script: tokio::sync::Mutex::new(VecDeque::new()),
                fetch_script: tokio::sync::Mutex::new(VecDeque::new()),
                submit_delay: Duration::ZERO,
                submit_calls: AtomicUsize::new(0),
            }
        }

        fn with_submits(self, script: Vec<Result<Submission, ClientError>>) -> Self {
            *self.submit_script.try_lock().unwrap() = script.into();
            self
        }

        fn with_fetches(self, script: Vec<Result<PollReply, ClientError>>) -> Self {
            *self.fetch_script.try_lock().unwrap() = script.into();
            self
        }

        fn with_submit_delay(mut self, delay: Duration) -> Self {
            self.submit_delay = delay;
            self
        }

        fn submit_calls(&self) -> usize {
            self.submit_calls.load(Ordering::Relaxed)
        }

        fn default_points() -> Decimal {
            Decimal::new(1005, 1) // 100.5
        }
    }

    #[async_trait]
    impl crate::client::AccrualApi for ScriptedClient {
        async fn submit_order(&self, _number: &str) -> Result<Submission, ClientError> {
            self.submit_calls.fetch_add(1, Ordering::Relaxed);
            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
            match self.submit_script.lock().await.pop_front() {
                Some(scripted) => scripted,
                None => Ok(Submission::Accepted),
            }
        }

        async fn fetch_accrual(&self, number: &str) -> Result<PollReply, ClientError> {
            match self.fetch_script.lock().await.pop_front() {
                Some(scripted) => scripted,
                None => Ok(PollReply::Done(AccrualOutcome::new(
                    number,
                    AccrualStatus::Processed,
                    Some(Self::default_points()),
                ))),
            }
        }
    }

    /// Store wrapper that records every `save_accrual` call.
    struct CountingStore {
        inner: InMemoryAccrualStore,
        saves: tokio::sync::Mutex<Vec<(String, AccrualStatus, Decimal)>>,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: InMemoryAccrualStore::new(),
                saves: tokio::sync::Mutex::new(Vec::new()),
            }
        }

        async fn saves(&self) -> Vec<(String, AccrualStatus, Decimal)> {
            self.saves.lock().await.clone()
        }
    }

    #[async_trait]
    impl crate::store::AccrualStore for CountingStore {
        async fn save_accrual(
            &self,
            number: &str,
            status: AccrualStatus,
            points: Decimal,
        ) -> Result<(), StoreError> {
            self.saves
                .lock()
                .await
                .push((number.to_owned(), status, points));
            self.inner.save_accrual(number, status, points).await
        }

        async fn unprocessed_orders(&self) -> Result<Vec<String>, StoreError> {
            self.inner.unprocessed_orders().await
        }

        async fn accrual_exists(&self, number: &str) -> Result<bool, StoreError> {
            self.inner.accrual_exists(number).await
        }
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            workers: 2,
            queue_capacity: 16,
            admission_backlog: 16,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
            max_poll_attempts: 5,
            // Long enough that only the immediate boot tick fires in tests.
            sweep_interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    async fn wait_for_terminal(store: &CountingStore, number: &str) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if store.accrual_exists(number).await.unwrap() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("order never reached a terminal status");
    }

    #[tokio::test]
    async fn happy_path_persists_exactly_one_accrual() {
        // One PROCESSING reply first, so the worker takes a real poll cycle.
        let client =
            Arc::new(ScriptedClient::new().with_fetches(vec![Ok(PollReply::Processing)]));
        let store = Arc::new(CountingStore::new());
        let engine =
            AccrualEngine::new(test_config(), client.clone(), store.clone()).unwrap();

        engine.start().await;
        engine.add_order("12345678").await;
        wait_for_terminal(&store, "12345678").await;
        engine.stop().await;

        let saves = store.saves().await;
        assert_eq!(
            saves,
            vec![(
                "12345678".to_owned(),
                AccrualStatus::Processed,
                ScriptedClient::default_points()
            )]
        );
    }

    #[tokio::test]
    async fn rate_limited_submission_is_retried_until_accepted() {
        let client = Arc::new(ScriptedClient::new().with_submits(vec![
            Err(ClientError::RateLimited { retry_after: None }),
            Err(ClientError::RateLimited { retry_after: None }),
        ]));
        let store = Arc::new(CountingStore::new());
        let engine =
            AccrualEngine::new(test_config(), client.clone(), store.clone()).unwrap();

        engine.start().await;
        engine.add_order("12345678").await;
        wait_for_terminal(&store, "12345678").await;
        engine.stop().await;

        // Two rate-limited cycles plus the accepted one.
        assert!(client.submit_calls() >= 3);
        let saves = store.saves().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].1, AccrualStatus::Processed);
    }

    #[tokio::test]
    async fn transient_poll_failures_still_persist_exactly_once() {
        let client = Arc::new(ScriptedClient::new().with_fetches(vec![
            Err(ClientError::Upstream(500)),
            Err(ClientError::Upstream(502)),
        ]));
        let store = Arc::new(CountingStore::new());
        let engine =
            AccrualEngine::new(test_config(), client.clone(), store.clone()).unwrap();

        engine.start().await;
        engine.add_order("12345678").await;
        wait_for_terminal(&store, "12345678").await;
        engine.stop().await;

        let saves = store.saves().await;
        assert_eq!(saves.len(), 1, "terminal outcome persisted more than once");
        assert_eq!(saves[0].1, AccrualStatus::Processed);
    }

    #[tokio::test]
    async fn fatal_submission_records_invalid_and_stops_rediscovery() {
        let client =
            Arc::new(ScriptedClient::new().with_submits(vec![Err(ClientError::Rejected(400))]));
        let store = Arc::new(CountingStore::new());
        let engine =
            AccrualEngine::new(test_config(), client.clone(), store.clone()).unwrap();

        engine.start().await;
        engine.add_order("666").await;
        wait_for_terminal(&store, "666").await;
        engine.stop().await;

        let saves = store.saves().await;
        assert_eq!(
            saves,
            vec![("666".to_owned(), AccrualStatus::Invalid, Decimal::ZERO)]
        );
        // A terminal record means the sweep has nothing left to re-admit.
        assert!(store.unprocessed_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweeper_readmits_unprocessed_orders() {
        let client = Arc::new(ScriptedClient::new());
        let store = Arc::new(CountingStore::new());
        store.inner.track_order("99999999").await;
        let engine =
            AccrualEngine::new(test_config(), client.clone(), store.clone()).unwrap();

        // Nothing is ever added through the ingress path; only the boot
        // sweep can discover the order.
        engine.start().await;
        wait_for_terminal(&store, "99999999").await;
        engine.stop().await;

        let saves = store.saves().await;
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].0, "99999999");
    }

    #[tokio::test]
    async fn full_queue_defers_admission_without_blocking_the_caller() {
        let client = Arc::new(
            ScriptedClient::new().with_submit_delay(Duration::from_millis(20)),
        );
        let store = Arc::new(CountingStore::new());
        let config = EngineConfig {
            workers: 1,
            queue_capacity: 1,
            ..test_config()
        };
        let engine = AccrualEngine::new(config, client.clone(), store.clone()).unwrap();

        engine.start().await;
        for number in ["1", "2", "3"] {
            // add_order must return promptly even when the queue is full.
            tokio::time::timeout(Duration::from_millis(50), engine.add_order(number))
                .await
                .expect("add_order blocked the caller");
        }
        for number in ["1", "2", "3"] {
            wait_for_terminal(&store, number).await;
        }
        engine.stop().await;

        assert_eq!(store.saves().await.len(), 3);
    }

    #[tokio::test]
    async fn stop_returns_promptly_with_workers_blocked_on_empty_queue() {
        let client = Arc::new(ScriptedClient::new());
        let store = Arc::new(CountingStore::new());
        let engine = AccrualEngine::new(test_config(), client, store).unwrap();

        engine.start().await;
        // Give the workers time to park on the empty queue.
        tokio::time::sleep(Duration::from_millis(20)).await;

        tokio::time::timeout(Duration::from_secs(2), engine.stop())
            .await
            .expect("stop did not return in time");
    }

    #[tokio::test]
    async fn lifecycle_calls_are_idempotent() {
        let client = Arc::new(ScriptedClient::new());
        let store = Arc::new(CountingStore::new());
        let engine = AccrualEngine::new(test_config(), client, store).unwrap();

        // Stop before start is a no-op; the engine can still start.
        engine.stop().await;
        engine.start().await;
        engine.start().await;
        engine.stop().await;
        engine.stop().await;

        // Ingress after stop drops the order instead of panicking.
        engine.add_order("1").await;
        assert_eq!(engine.queue_depth().await, 0);
    }

    #[tokio::test]
    async fn misconfigured_engine_is_rejected_at_construction() {
        let client: Arc<dyn crate::client::AccrualApi> = Arc::new(ScriptedClient::new());
        let store: Arc<dyn crate::store::AccrualStore> = Arc::new(CountingStore::new());
        let config = EngineConfig {
            workers: 0,
            ..test_config()
        };

        assert!(AccrualEngine::new(config, client, store).is_err());
    }
}
