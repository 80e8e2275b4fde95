//! Controller Loop: wires the informer into the classifier and the queue,
//! and drains the queue with a fixed pool of workers.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use helmrel_backend::DynBackend;
use helmrel_core::{ReleaseKey, WatchEvent};
use helmrel_storage::{DynStore, EventHandler, Informer};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::config::ControllerConfig;
use crate::error::{ControllerError, ErrorKind, ReconcileError};
use crate::failure::{ErrorSink, FailureClassifier, TracingErrorSink};
use crate::queue::WorkQueue;
use crate::reconciler::{Action, Reconciler};

/// Feeds classified notifications into the work queue.
struct EnqueueHandler {
    queue: WorkQueue,
}

impl EventHandler for EnqueueHandler {
    fn on_event(&self, event: &WatchEvent) {
        if let Some(key) = classify(event) {
            self.queue.add(key);
        }
    }
}

/// The release controller.
pub struct Controller {
    config: Arc<ControllerConfig>,
    store: DynStore,
    backend: DynBackend,
    queue: WorkQueue,
    sink: Arc<dyn ErrorSink>,
}

impl Controller {
    pub fn new(config: ControllerConfig, store: DynStore, backend: DynBackend) -> Self {
        let queue = WorkQueue::with_backoff(config.backoff);
        Self {
            config: Arc::new(config),
            store,
            backend,
            queue,
            sink: Arc::new(TracingErrorSink),
        }
    }

    /// Replaces the default tracing error sink.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Runs until `shutdown` is cancelled.
    ///
    /// Waits for the informer cache to sync before starting the workers. On
    /// shutdown, notification intake stops first, then the queue stops
    /// handing out keys and in-flight reconciles run to completion.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ControllerError> {
        self.config.validate()?;

        let intake = shutdown.child_token();
        let mut informer =
            Informer::new(self.store.clone()).with_resync_interval(self.config.resync_interval);
        informer.add_handler(Arc::new(EnqueueHandler {
            queue: self.queue.clone(),
        }));
        let cache = informer.cache();
        let informer_task = informer.spawn(intake.clone());

        info!(
            store = self.store.backend_name(),
            backend = self.backend.backend_name(),
            "Waiting for informer cache to sync"
        );
        let synced = tokio::select! {
            synced = cache.wait_for_sync(self.config.cache_sync_timeout) => Some(synced),
            _ = shutdown.cancelled() => None,
        };
        match synced {
            Some(true) => {}
            Some(false) => {
                intake.cancel();
                self.queue.shut_down();
                return Err(ControllerError::CacheSyncTimeout(
                    self.config.cache_sync_timeout,
                ));
            }
            None => {
                info!("Shutdown requested before the cache synced");
                intake.cancel();
                self.queue.shut_down();
                if let Err(e) = informer_task.await {
                    error!(error = %e, "Informer task failed");
                }
                return Ok(());
            }
        }

        let processor = Arc::new(Processor {
            config: self.config.clone(),
            queue: self.queue.clone(),
            reconciler: Reconciler::new(
                self.config.clone(),
                cache.clone(),
                self.store.clone(),
                self.backend.clone(),
            ),
            failures: FailureClassifier::new(cache, self.store.clone()),
            sink: self.sink.clone(),
        });

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers {
            let processor = processor.clone();
            workers.spawn(async move {
                debug!(worker, "Worker started");
                while processor.process_next_item().await {}
                debug!(worker, "Worker stopped");
            });
        }
        info!(workers = self.config.workers, "Controller started");

        shutdown.cancelled().await;
        info!("Shutting down controller");

        intake.cancel();
        if let Err(e) = informer_task.await {
            error!(error = %e, "Informer task failed");
        }
        self.queue.shut_down();
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Worker task failed");
            }
        }

        info!("Controller stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("config", &self.config)
            .field("store", &self.store.backend_name())
            .field("backend", &self.backend.backend_name())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Shared state of the worker pool.
struct Processor {
    config: Arc<ControllerConfig>,
    queue: WorkQueue,
    reconciler: Reconciler,
    failures: FailureClassifier,
    sink: Arc<dyn ErrorSink>,
}

impl Processor {
    /// Processes one key. Returns `false` once the queue has shut down.
    async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };

        let result = self.reconcile(&key).await;
        self.handle_result(&key, result).await;
        self.queue.done(&key);
        true
    }

    /// Runs the reconciler under the optional deadline, turning a panic
    /// into a fatal error.
    async fn reconcile(&self, key: &ReleaseKey) -> Result<Action, ReconcileError> {
        let attempt = AssertUnwindSafe(self.reconciler.reconcile(key)).catch_unwind();
        let outcome = match self.config.reconcile_timeout {
            Some(deadline) => match tokio::time::timeout(deadline, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    return Err(ReconcileError::Timeout {
                        key: key.clone(),
                        elapsed: deadline,
                    });
                }
            },
            None => attempt.await,
        };
        outcome.unwrap_or_else(|_| Err(ReconcileError::Panicked { key: key.clone() }))
    }

    async fn handle_result(&self, key: &ReleaseKey, result: Result<Action, ReconcileError>) {
        let err = match result {
            Ok(action) => {
                info!(key = %key, action = ?action, "Synced release");
                self.queue.forget(key);
                return;
            }
            Err(err) => err,
        };

        if err.kind() == ErrorKind::Fatal {
            self.queue.forget(key);
            self.sink.report(key, &err);
            return;
        }

        let requeues = self.queue.num_requeues(key);
        if requeues < self.config.max_retries {
            warn!(
                key = %key,
                kind = %err.kind(),
                attempt = requeues + 1,
                error = %err,
                "Error syncing release, retrying"
            );
            self.queue.add_rate_limited(key.clone());
            return;
        }

        error!(key = %key, retries = requeues, "Dropping release out of the queue");
        self.queue.forget(key);
        if let Err(e) = self.failures.record_failure(key, &err).await {
            error!(key = %key, error = %e, "Cannot record failure on release");
        }
        self.sink.report(key, &err);
    }
}
