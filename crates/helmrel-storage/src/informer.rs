//! Informer: turns a store's list+watch stream into a keyed read-through
//! cache plus tagged `WatchEvent` notifications.
//!
//! The cache is always updated before handlers run, so anything a handler
//! triggers observes state at least as new as the notification itself.

use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use helmrel_core::{ReleaseKey, ReleaseRecord, StoreEvent, WatchEvent};
use papaya::HashMap as PapayaHashMap;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::traits::ReleaseStore;

const DEFAULT_RELIST_BACKOFF: Duration = Duration::from_secs(1);

/// Receives notifications from an [`Informer`].
///
/// Called synchronously on the informer task. Implementations must not block.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &WatchEvent);
}

impl<F> EventHandler for F
where
    F: Fn(&WatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &WatchEvent) {
        self(event)
    }
}

// ============================================================================
// Cache
// ============================================================================

/// Read-through cache of release records, written only by the informer.
#[derive(Default)]
pub struct ReleaseCache {
    records: PapayaHashMap<String, Arc<ReleaseRecord>>,
    synced: AtomicBool,
    synced_notify: Notify,
}

impl ReleaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ReleaseKey) -> Option<Arc<ReleaseRecord>> {
        self.get_by_str(&key.to_string())
    }

    /// Lookup by the `namespace/name` string form.
    pub fn get_by_str(&self, key: &str) -> Option<Arc<ReleaseRecord>> {
        self.records.pin().get(key).cloned()
    }

    pub fn list(&self) -> Vec<Arc<ReleaseRecord>> {
        self.records.pin().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Whether the initial snapshot has been applied.
    pub fn has_synced(&self) -> bool {
        self.synced.load(Ordering::Acquire)
    }

    /// Waits until the initial snapshot has been applied.
    ///
    /// Returns `false` if `timeout` elapses first.
    pub async fn wait_for_sync(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let mut notified = pin!(self.synced_notify.notified());
                notified.as_mut().enable();
                if self.has_synced() {
                    return;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    fn insert(&self, record: Arc<ReleaseRecord>) -> Option<Arc<ReleaseRecord>> {
        self.records
            .pin()
            .insert(record.display_key(), record)
            .cloned()
    }

    fn remove(&self, key: &str) -> Option<Arc<ReleaseRecord>> {
        self.records.pin().remove(key).cloned()
    }

    fn mark_synced(&self) {
        self.synced.store(true, Ordering::Release);
        self.synced_notify.notify_waiters();
    }
}

impl std::fmt::Debug for ReleaseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseCache")
            .field("records", &self.len())
            .field("synced", &self.has_synced())
            .finish()
    }
}

// ============================================================================
// Informer
// ============================================================================

/// Follows a store and keeps a [`ReleaseCache`] in sync with it.
pub struct Informer {
    store: Arc<dyn ReleaseStore>,
    cache: Arc<ReleaseCache>,
    handlers: Vec<Arc<dyn EventHandler>>,
    resync_interval: Duration,
    relist_backoff: Duration,
}

impl Informer {
    pub fn new(store: Arc<dyn ReleaseStore>) -> Self {
        Self {
            store,
            cache: Arc::new(ReleaseCache::new()),
            handlers: Vec::new(),
            resync_interval: Duration::ZERO,
            relist_backoff: DEFAULT_RELIST_BACKOFF,
        }
    }

    /// Re-deliver every cached record as an `Updated { old == new }` event at
    /// this interval. Zero disables resync.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval;
        self
    }

    /// Delay between failed list attempts.
    pub fn with_relist_backoff(mut self, backoff: Duration) -> Self {
        self.relist_backoff = backoff;
        self
    }

    pub fn add_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn cache(&self) -> Arc<ReleaseCache> {
        self.cache.clone()
    }

    /// Starts the informer on the current runtime.
    ///
    /// The task lists, applies the snapshot, then follows the change stream
    /// until `shutdown` is cancelled or the stream closes.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    async fn run(self, shutdown: CancellationToken) {
        info!(
            store = self.store.backend_name(),
            handlers = self.handlers.len(),
            resync_secs = self.resync_interval.as_secs(),
            "Informer started"
        );

        let Some(mut events) = self.list(&shutdown).await else {
            return;
        };
        self.cache.mark_synced();
        info!(records = self.cache.len(), "Informer cache synced");

        let mut resync = (!self.resync_interval.is_zero()).then(|| {
            let mut interval = tokio::time::interval_at(
                Instant::now() + self.resync_interval,
                self.resync_interval,
            );
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => self.apply(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Informer lagged behind store, relisting");
                        match self.list(&shutdown).await {
                            Some(receiver) => events = receiver,
                            None => break,
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Store event stream closed");
                        break;
                    }
                },
                _ = tick(&mut resync) => self.resync(),
            }
        }

        info!("Informer stopped");
    }

    /// Lists until it succeeds, applying the result as a diff against the
    /// cache. Returns `None` on shutdown.
    async fn list(&self, shutdown: &CancellationToken) -> Option<broadcast::Receiver<StoreEvent>> {
        loop {
            let result = tokio::select! {
                _ = shutdown.cancelled() => return None,
                result = self.store.list_and_watch() => result,
            };
            match result {
                Ok(list_watch) => {
                    debug!(records = list_watch.records.len(), "Listed releases");
                    self.replace(list_watch.records);
                    return Some(list_watch.events);
                }
                Err(e) => {
                    warn!(error = %e, "Failed to list releases, retrying");
                    tokio::select! {
                        _ = shutdown.cancelled() => return None,
                        _ = tokio::time::sleep(self.relist_backoff) => {}
                    }
                }
            }
        }
    }

    fn apply(&self, event: StoreEvent) {
        match event {
            StoreEvent::Put(record) => {
                if let Some(cached) = self.cache.get_by_str(&record.display_key()) {
                    if cached.resource_version() >= record.resource_version() {
                        debug!(
                            key = %record.display_key(),
                            resource_version = record.resource_version(),
                            "Ignoring stale store event"
                        );
                        return;
                    }
                }
                let event = match self.cache.insert(record.clone()) {
                    Some(old) => WatchEvent::Updated { old, new: record },
                    None => WatchEvent::Added(record),
                };
                self.dispatch(&event);
            }
            StoreEvent::Deleted(record) => {
                let last_known = self.cache.remove(&record.display_key()).unwrap_or(record);
                self.dispatch(&WatchEvent::Deleted(last_known));
            }
        }
    }

    fn replace(&self, records: Vec<Arc<ReleaseRecord>>) {
        let mut seen = HashSet::with_capacity(records.len());
        for record in records {
            seen.insert(record.display_key());
            match self.cache.insert(record.clone()) {
                None => self.dispatch(&WatchEvent::Added(record)),
                Some(old) if old.resource_version() != record.resource_version() => {
                    self.dispatch(&WatchEvent::Updated { old, new: record })
                }
                Some(_) => {}
            }
        }

        for cached in self.cache.list() {
            let key = cached.display_key();
            if !seen.contains(&key) {
                self.cache.remove(&key);
                self.dispatch(&WatchEvent::Deleted(cached));
            }
        }
    }

    fn resync(&self) {
        let records = self.cache.list();
        debug!(records = records.len(), "Resyncing informer cache");
        for record in records {
            self.dispatch(&WatchEvent::Updated {
                old: record.clone(),
                new: record,
            });
        }
    }

    fn dispatch(&self, event: &WatchEvent) {
        for handler in &self.handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler.on_event(event)));
            if result.is_err() {
                error!(
                    event_type = %event.event_type(),
                    key = %event.record().display_key(),
                    "Event handler panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Informer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Informer")
            .field("store", &self.store.backend_name())
            .field("cache", &self.cache)
            .field("handlers", &self.handlers.len())
            .field("resync_interval", &self.resync_interval)
            .finish()
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
