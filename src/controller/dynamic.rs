//! Dynamic multiplexing controller
//!
//! One process, arbitrary kinds: watches are started and stopped at runtime,
//! their events multiplexed onto one rate-limited queue keyed by
//! `(kind, namespaced-name)`, and each dequeued item dispatched to the
//! handler registered for its kind.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures::{FutureExt, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::concurrency::CancelToken;
use crate::config::ControllerConfig;
use crate::controller::queue::{WorkItem, WorkQueue};
use crate::controller::Handler;
use crate::error::{Error, Result};
use crate::meta::GroupVersionKind;
use crate::object::DynamicObject;
use crate::store::{ObjectStore, WatchEvent};

/// One running event source: its cancellation handle, its pump task and a
/// flag that flips once the initial list completed.
struct EventSource {
    gvk: GroupVersionKind,
    cancel: CancelToken,
    task: JoinHandle<()>,
    synced: watch::Receiver<bool>,
}

/// Multiplexed informer pool + shared queue + worker pool + handler registry.
pub struct DynamicController {
    store: Arc<dyn ObjectStore>,
    config: ControllerConfig,
    queue: Arc<WorkQueue<WorkItem>>,
    sources: DashMap<String, EventSource>,
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl DynamicController {
    pub fn new(store: Arc<dyn ObjectStore>, config: ControllerConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            config,
            queue: WorkQueue::new(),
            sources: DashMap::new(),
            handlers: DashMap::new(),
        })
    }

    /// The shared work queue; exposed for tests and embedders.
    pub fn queue(&self) -> &Arc<WorkQueue<WorkItem>> {
        &self.queue
    }

    fn kind_key(gvk: &GroupVersionKind) -> String {
        format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind)
    }

    /// Start serving a kind: open a watch, pump events into the queue, wait
    /// for the initial cache sync (bounded by `ctx` and the sync timeout),
    /// then register the handler.
    ///
    /// Calling this for an already-served kind is a no-op; the original
    /// handler stays in place.
    pub async fn start_serving_gvk(
        &self,
        ctx: &CancelToken,
        gvk: GroupVersionKind,
        handler: Arc<dyn Handler>,
    ) -> Result<()> {
        let key = Self::kind_key(&gvk);
        if self.sources.contains_key(&key) {
            debug!(kind = %gvk, "already serving");
            return Ok(());
        }

        let (synced_tx, synced_rx) = watch::channel(false);
        let cancel = CancelToken::new();
        let task = tokio::spawn(Self::pump(
            Arc::clone(&self.store),
            gvk.clone(),
            Arc::clone(&self.queue),
            cancel.clone(),
            synced_tx,
        ));

        let source = EventSource {
            gvk: gvk.clone(),
            cancel: cancel.clone(),
            task,
            synced: synced_rx.clone(),
        };

        match self.wait_synced(ctx, synced_rx).await {
            Ok(()) => {
                self.handlers.insert(key.clone(), handler);
                self.sources.insert(key, source);
                info!(kind = %gvk, "serving kind");
                Ok(())
            }
            Err(err) => {
                cancel.cancel();
                let _ = source.task.await;
                Err(err)
            }
        }
    }

    /// Stop serving a kind: cancel its source, wait for shutdown, drop both
    /// registry entries. Unknown kinds are a no-op.
    pub async fn stop_serving_gvk(&self, gvk: &GroupVersionKind) -> Result<()> {
        let key = Self::kind_key(gvk);
        let source = match self.sources.remove(&key) {
            Some((_, source)) => source,
            None => return Ok(()),
        };
        // The handler entry goes first so no dequeued item dispatches to a
        // kind whose source is gone.
        self.handlers.remove(&key);

        source.cancel.cancel();
        if source.task.await.is_err() {
            warn!(kind = %gvk, "event source task aborted");
        }
        info!(kind = %gvk, "stopped serving kind");
        Ok(())
    }

    /// Run the controller until `ctx` is cancelled: wait for every registered
    /// source, spawn the workers, drain on shutdown.
    pub async fn run(self: &Arc<Self>, ctx: CancelToken) -> Result<()> {
        // Collect first: a dashmap ref must not live across an await.
        let pending: Vec<(GroupVersionKind, watch::Receiver<bool>)> = self
            .sources
            .iter()
            .map(|entry| (entry.gvk.clone(), entry.synced.clone()))
            .collect();
        for (gvk, synced) in pending {
            self.wait_synced(&ctx, synced).await.map_err(|err| {
                Error::Controller(format!("source for {gvk} never synced: {err}"))
            })?;
        }

        let mut workers = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let controller = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                controller.worker_loop(worker).await;
            }));
        }
        info!(workers = self.config.workers, "controller running");

        ctx.cancelled().await;
        info!("controller shutting down");
        self.queue.shut_down();

        for entry in self.sources.iter() {
            entry.cancel.cancel();
        }
        let drained = async {
            for worker in workers {
                let _ = worker.await;
            }
            let keys: Vec<String> = self.sources.iter().map(|e| e.key().clone()).collect();
            for key in keys {
                if let Some((_, source)) = self.sources.remove(&key) {
                    let _ = source.task.await;
                }
            }
        };
        if tokio::time::timeout(self.config.shutdown_timeout, drained)
            .await
            .is_err()
        {
            warn!(
                timeout = ?self.config.shutdown_timeout,
                "shutdown timed out waiting for sources"
            );
        }
        Ok(())
    }

    async fn wait_synced(
        &self,
        ctx: &CancelToken,
        mut synced: watch::Receiver<bool>,
    ) -> Result<()> {
        let wait = async {
            loop {
                if *synced.borrow() {
                    return Ok(());
                }
                if synced.changed().await.is_err() {
                    return Err(Error::Controller(
                        "event source stopped before syncing".to_string(),
                    ));
                }
            }
        };

        tokio::select! {
            result = async { tokio::time::timeout(self.config.sync_timeout, wait).await } => {
                match result {
                    Ok(inner) => inner,
                    Err(_) => Err(Error::Controller(format!(
                        "timed out after {:?} waiting for initial sync",
                        self.config.sync_timeout
                    ))),
                }
            }
            _ = ctx.cancelled() => Err(Error::Controller(
                "cancelled while waiting for initial sync".to_string(),
            )),
        }
    }

    /// The per-kind event source: list, mark synced, then stream events into
    /// the queue until cancelled.
    async fn pump(
        store: Arc<dyn ObjectStore>,
        gvk: GroupVersionKind,
        queue: Arc<WorkQueue<WorkItem>>,
        cancel: CancelToken,
        synced: watch::Sender<bool>,
    ) {
        // Subscribe before listing so no event falls between the two.
        let mut stream = match store.watch(&gvk).await {
            Ok(stream) => stream,
            Err(err) => {
                error!(kind = %gvk, error = %err, "failed to open watch");
                return;
            }
        };

        match store.list(&gvk, None).await {
            Ok(objects) => {
                for object in objects {
                    Self::enqueue(&queue, &gvk, &object);
                }
            }
            Err(err) => {
                error!(kind = %gvk, error = %err, "initial list failed");
                return;
            }
        }
        let _ = synced.send(true);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = stream.next() => match event {
                    Some(WatchEvent::Added(object)) => Self::enqueue(&queue, &gvk, &object),
                    Some(WatchEvent::Deleted(object)) => Self::enqueue(&queue, &gvk, &object),
                    Some(WatchEvent::Modified { old, new }) => {
                        // Status-only writes keep the generation; skip them.
                        // A deletion mark also keeps it but must reconcile.
                        let changed = match &old {
                            Some(old) => old.generation() != new.generation(),
                            None => true,
                        };
                        if changed || new.is_deleting() {
                            Self::enqueue(&queue, &gvk, &new);
                        }
                    }
                    None => {
                        debug!(kind = %gvk, "watch stream ended");
                        break;
                    }
                },
            }
        }
    }

    fn enqueue(queue: &Arc<WorkQueue<WorkItem>>, gvk: &GroupVersionKind, object: &DynamicObject) {
        if let Ok(key) = object.key() {
            queue.add(WorkItem {
                kind: Self::kind_key(gvk),
                key,
            });
        }
    }

    async fn worker_loop(self: &Arc<Self>, worker: usize) {
        while let Some(item) = self.queue.get().await {
            self.dispatch(worker, item).await;
        }
        debug!(worker, "worker drained");
    }

    /// Dispatch one item and apply the handler-outcome policy.
    async fn dispatch(self: &Arc<Self>, worker: usize, item: WorkItem) {
        let handler = self.handlers.get(&item.kind).map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            // Kind was stopped while the item sat queued.
            self.queue.forget(&item);
            self.queue.done(&item);
            return;
        };

        let outcome = AssertUnwindSafe(handler.handle(item.key.clone()))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                Err(Error::Internal(format!("handler panicked: {message}")))
            });

        match outcome {
            Ok(()) => {
                self.queue.forget(&item);
            }
            Err(err) if err.is_not_found() => {
                // Already reconciled to absence.
                self.queue.forget(&item);
            }
            Err(Error::NoRequeue { reason }) => {
                debug!(worker, item = %item, %reason, "dropping item");
                self.queue.forget(&item);
            }
            Err(Error::RequeueNeeded { reason }) => {
                debug!(worker, item = %item, %reason, "requeue");
                self.queue.add(item.clone());
            }
            Err(Error::RequeueNeededAfter { reason, delay }) => {
                debug!(worker, item = %item, %reason, ?delay, "requeue after");
                self.queue.add_after(item.clone(), delay);
            }
            Err(err) => {
                let retries = self.queue.num_requeues(&item);
                if retries < self.config.queue_max_retries {
                    warn!(worker, item = %item, error = %err, retries, "reconcile failed, backing off");
                    self.queue.add_rate_limited(item.clone());
                } else {
                    error!(worker, item = %item, error = %err, retries, "retries exhausted, dropping");
                    self.queue.forget(&item);
                }
            }
        }
        self.queue.done(&item);
    }
}
