//! De-duplicating, rate-limited work queue of release keys.
//!
//! ```text
//!  add ──► dirty ──► queue ──► get ──► processing ──► done
//!            ▲                             │
//!            └──── re-added while busy ◄───┘
//! ```
//!
//! A key is in the queue at most once no matter how often it is added, and
//! a key handed out by [`WorkQueue::get`] is not handed out again until
//! [`WorkQueue::done`] is called for it. Adds that arrive while the key is
//! processing are parked in `dirty` and requeued by `done`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use helmrel_core::ReleaseKey;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default base delay of the per-item backoff.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(5);
/// Default cap of the per-item backoff.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(1000);

/// Per-item exponential backoff: `base * 2^failures`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before the retry that follows `failures` earlier failures.
    pub fn delay(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE, DEFAULT_BACKOFF_MAX)
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<ReleaseKey>,
    dirty: HashSet<ReleaseKey>,
    processing: HashSet<ReleaseKey>,
    failures: HashMap<ReleaseKey, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: ExponentialBackoff,
    shutdown: CancellationToken,
}

/// Work queue shared by the notification handlers and the workers.
///
/// Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::with_backoff(ExponentialBackoff::default())
    }

    pub fn with_backoff(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `key` as needing processing.
    ///
    /// Ignored after shutdown and while the key is already pending.
    pub fn add(&self, key: ReleaseKey) {
        let mut state = self.lock();
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Adds `key` once `delay` has elapsed. Dropped if the queue shuts down
    /// first.
    pub fn add_after(&self, key: ReleaseKey, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        let shutdown = self.inner.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => queue.add(key),
            }
        });
    }

    /// Re-adds `key` after its backoff delay and counts the failure.
    pub fn add_rate_limited(&self, key: ReleaseKey) {
        let delay = {
            let mut state = self.lock();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures += 1;
            delay
        };
        debug!(key = %key, delay_ms = delay.as_millis() as u64, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Clears the failure count of `key`.
    pub fn forget(&self, key: &ReleaseKey) {
        self.lock().failures.remove(key);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &ReleaseKey) -> u32 {
        self.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Waits for the next key to process.
    ///
    /// Returns `None` once the queue is shutting down, even if keys are
    /// still queued.
    pub async fn get(&self) -> Option<ReleaseKey> {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    let more = !state.queue.is_empty();
                    drop(state);
                    if more {
                        self.inner.notify.notify_one();
                    }
                    return Some(key);
                }
            }
            notified.await;
        }
    }

    /// Marks processing of `key` finished, requeueing it if it was added
    /// again in the meantime.
    pub fn done(&self, key: &ReleaseKey) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stops handing out keys, wakes every waiting worker and drops pending
    /// delayed adds.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.inner.shutdown.cancel();
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently being processed.
    pub fn processing(&self) -> usize {
        self.lock().processing.len()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("WorkQueue")
            .field("queued", &state.queue.len())
            .field("processing", &state.processing.len())
            .field("shutting_down", &state.shutting_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> ReleaseKey {
        ReleaseKey::new("default", name).unwrap()
    }

    #[test]
    fn test_backoff_delays() {
        let backoff = ExponentialBackoff::default();
        assert_eq!(backoff.delay(0), Duration::from_millis(5));
        assert_eq!(backoff.delay(1), Duration::from_millis(10));
        assert_eq!(backoff.delay(4), Duration::from_millis(80));
        assert_eq!(backoff.delay(40), DEFAULT_BACKOFF_MAX);
    }

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let queue = WorkQueue::new();
        queue.add(key("web"));
        queue.add(key("web"));
        queue.add(key("api"));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.get().await, Some(key("web")));
        assert_eq!(queue.get().await, Some(key("api")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_key_not_handed_out_while_processing() {
        let queue = WorkQueue::new();
        queue.add(key("web"));
        let first = queue.get().await.unwrap();

        queue.add(key("web"));
        assert_eq!(queue.len(), 0, "re-add while processing must wait for done");

        queue.done(&first);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(key("web")));
    }

    #[tokio::test]
    async fn test_done_without_readd_does_not_requeue() {
        let queue = WorkQueue::new();
        queue.add(key("web"));
        let item = queue.get().await.unwrap();
        queue.done(&item);
        assert!(queue.is_empty());
        assert_eq!(queue.processing(), 0);
    }

    #[tokio::test]
    async fn test_get_waits_for_add() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.add(key("web"));
        assert_eq!(waiter.await.unwrap(), Some(key("web")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_requeue_counts_failures() {
        let queue = WorkQueue::new();
        queue.add(key("web"));
        let item = queue.get().await.unwrap();

        queue.add_rate_limited(item.clone());
        queue.done(&item);
        assert_eq!(queue.num_requeues(&item), 1);
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_millis(6)).await;
        assert_eq!(queue.get().await, Some(key("web")));

        queue.add_rate_limited(item.clone());
        assert_eq!(queue.num_requeues(&item), 2);
        queue.forget(&item);
        assert_eq!(queue.num_requeues(&item), 0);
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters_and_stops_handing_out() {
        let queue = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };
        tokio::task::yield_now().await;
        queue.shut_down();
        assert_eq!(waiter.await.unwrap(), None);

        queue.add(key("web"));
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_delayed_adds() {
        let queue = WorkQueue::new();
        queue.add_after(key("web"), Duration::from_secs(10));
        queue.shut_down();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(queue.is_empty());
    }
}
