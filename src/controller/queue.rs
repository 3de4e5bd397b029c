//! Rate-limited work queue
//!
//! The shared queue between event sources and workers. Semantics:
//!
//! * **Dedup**: an item added while an equal copy is queued coalesces into
//!   the existing slot.
//! * **Per-key in-flight**: an item added while an equal copy is being
//!   processed is parked dirty and re-queued when the in-flight copy calls
//!   [`WorkQueue::done`]; at most one extra run results from any number of
//!   adds.
//! * **Backoff**: [`WorkQueue::add_rate_limited`] applies per-item
//!   exponential backoff (200 ms doubling up to 1000 s) capped by a global
//!   token bucket (10 qps, burst 100).

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{Quota, RateLimiter};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::meta::ResourceKey;

const BASE_DELAY: Duration = Duration::from_millis(200);
const MAX_DELAY: Duration = Duration::from_secs(1000);

const BUCKET_QPS: NonZeroU32 = match NonZeroU32::new(10) {
    Some(n) => n,
    None => unreachable!(),
};
const BUCKET_BURST: NonZeroU32 = match NonZeroU32::new(100) {
    Some(n) => n,
    None => unreachable!(),
};

/// One queued unit of work: a kind and a namespaced name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItem {
    pub kind: String,
    pub key: ResourceKey,
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

struct QueueState<T> {
    queue: VecDeque<T>,
    dirty: HashSet<T>,
    processing: HashSet<T>,
    shutting_down: bool,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            queue: VecDeque::new(),
            dirty: HashSet::new(),
            processing: HashSet::new(),
            shutting_down: false,
        }
    }
}

type Bucket = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    DefaultClock,
>;

/// Thread-safe de-duplicating queue with delayed and rate-limited re-adds.
pub struct WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    state: Mutex<QueueState<T>>,
    notify: Notify,
    failures: Mutex<HashMap<T, u32>>,
    bucket: Bucket,
    clock: DefaultClock,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            failures: Mutex::new(HashMap::new()),
            bucket: RateLimiter::direct(
                Quota::per_second(BUCKET_QPS).allow_burst(BUCKET_BURST),
            ),
            clock: DefaultClock::default(),
        })
    }

    /// Add an item; equal queued or in-flight copies coalesce.
    pub fn add(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutting_down || state.dirty.contains(&item) {
            return;
        }
        state.dirty.insert(item.clone());
        if !state.processing.contains(&item) {
            state.queue.push_back(item);
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Add an item after `delay`.
    pub fn add_after(self: &Arc<Self>, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Add an item after its per-item backoff, bounded by the token bucket.
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = self.next_delay(&item);
        self.add_after(item, delay);
    }

    /// Exponential per-item delay capped at [`MAX_DELAY`], never shorter than
    /// what the global bucket currently demands.
    fn next_delay(&self, item: &T) -> Duration {
        let exponent = {
            let mut failures = self.failures.lock();
            let count = failures.entry(item.clone()).or_insert(0);
            let current = *count;
            *count = count.saturating_add(1);
            current
        };

        let backoff = BASE_DELAY
            .saturating_mul(2u32.saturating_pow(exponent.min(31)))
            .min(MAX_DELAY);

        let bucket_delay = match self.bucket.check() {
            Ok(_) => Duration::ZERO,
            Err(not_until) => not_until.wait_time_from(self.clock.now()),
        };

        backoff.max(bucket_delay)
    }

    /// How many rate-limited re-adds `item` has accumulated.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.failures.lock().get(item).copied().unwrap_or(0)
    }

    /// Clear the backoff history of `item`.
    pub fn forget(&self, item: &T) {
        self.failures.lock().remove(item);
    }

    /// Block until an item is available. Returns `None` once the queue is
    /// shut down and drained.
    pub async fn get(&self) -> Option<T> {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }

            let notified = self.notify.notified();
            // Re-check after registering the waiter; an add may have raced.
            {
                let mut state = self.state.lock();
                if let Some(item) = state.queue.pop_front() {
                    state.dirty.remove(&item);
                    state.processing.insert(item.clone());
                    return Some(item);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark an item finished; a copy parked dirty while in flight re-queues.
    pub fn done(&self, item: &T) {
        let mut state = self.state.lock();
        state.processing.remove(item);
        if state.dirty.contains(item) && !state.shutting_down {
            state.queue.push_back(item.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting adds and wake every blocked `get`.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    fn item(name: &str) -> WorkItem {
        WorkItem {
            kind: "Net".to_string(),
            key: ResourceKey::namespaced("default", name),
        }
    }

    #[tokio::test]
    async fn test_add_and_get() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        assert_eq!(queue.get().await, Some(item("a")));
    }

    #[tokio::test]
    async fn test_duplicate_adds_coalesce() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        queue.add(item("a"));
        queue.add(item("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_add_while_processing_parks_one_copy() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        let in_flight = queue.get().await.unwrap();

        // Any number of adds while in flight results in exactly one rerun.
        queue.add(item("a"));
        queue.add(item("a"));
        assert_eq!(queue.len(), 0);

        queue.done(&in_flight);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some(item("a")));

        queue.done(&item("a"));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_add_after_delays() {
        let queue = WorkQueue::new();
        queue.add_after(item("a"), Duration::from_millis(30));
        assert_eq!(queue.len(), 0);

        let got = timeout(Duration::from_secs(2), queue.get())
            .await
            .expect("item should arrive");
        assert_eq!(got, Some(item("a")));
    }

    #[tokio::test]
    async fn test_backoff_grows_and_forgets() {
        let queue: Arc<WorkQueue<WorkItem>> = WorkQueue::new();
        let first = queue.next_delay(&item("a"));
        let second = queue.next_delay(&item("a"));
        let third = queue.next_delay(&item("a"));

        assert!(first >= BASE_DELAY);
        assert!(second >= first);
        assert!(third >= second);
        assert_eq!(queue.num_requeues(&item("a")), 3);

        queue.forget(&item("a"));
        assert_eq!(queue.num_requeues(&item("a")), 0);
    }

    #[tokio::test]
    async fn test_backoff_is_capped() {
        let queue: Arc<WorkQueue<WorkItem>> = WorkQueue::new();
        for _ in 0..40 {
            queue.next_delay(&item("a"));
        }
        assert!(queue.next_delay(&item("a")) <= MAX_DELAY);
    }

    #[tokio::test]
    async fn test_shutdown_unblocks_get() {
        let queue: Arc<WorkQueue<WorkItem>> = WorkQueue::new();
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.shut_down();

        let got = timeout(Duration::from_secs(1), waiter)
            .await
            .expect("get should unblock")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_adds_ignored_after_shutdown() {
        let queue: Arc<WorkQueue<WorkItem>> = WorkQueue::new();
        queue.shut_down();
        queue.add(item("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_order_per_distinct_items() {
        let queue = WorkQueue::new();
        queue.add(item("a"));
        queue.add(item("b"));
        queue.add(item("c"));
        assert_eq!(queue.get().await, Some(item("a")));
        assert_eq!(queue.get().await, Some(item("b")));
        assert_eq!(queue.get().await, Some(item("c")));
    }
}
