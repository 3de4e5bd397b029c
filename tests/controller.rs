//! Dynamic controller scenarios
//!
//! Register and unregister kinds at runtime, verify dispatch, registration
//! idempotence and the queue's coalescing behavior under a slow handler.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use korus::concurrency::CancelToken;
use korus::config::ControllerConfig;
use korus::controller::{DynamicController, Handler};
use korus::error::Result;
use korus::meta::{GroupVersionKind, ResourceKey};
use korus::object::DynamicObject;
use korus::store::memory::InMemoryStore;
use korus::store::ObjectStore;

struct CountingHandler {
    seen: Mutex<Vec<ResourceKey>>,
    delay: Duration,
}

impl CountingHandler {
    fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            delay,
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().len()
    }

    fn count_for(&self, name: &str) -> usize {
        self.seen.lock().iter().filter(|k| k.name == name).count()
    }
}

#[async_trait]
impl Handler for CountingHandler {
    async fn handle(&self, key: ResourceKey) -> Result<()> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.seen.lock().push(key);
        Ok(())
    }
}

fn widget_gvk() -> GroupVersionKind {
    GroupVersionKind::new("things.example.com", "v1", "Widget")
}

fn widget(name: &str) -> DynamicObject {
    DynamicObject::new(json!({
        "apiVersion": "things.example.com/v1",
        "kind": "Widget",
        "metadata": { "name": name, "namespace": "default" },
        "spec": { "n": 1 },
    }))
    .unwrap()
}

fn controller(store: &Arc<InMemoryStore>) -> Arc<DynamicController> {
    let config = ControllerConfig {
        workers: 2,
        sync_timeout: Duration::from_secs(5),
        shutdown_timeout: Duration::from_secs(5),
        ..ControllerConfig::default()
    };
    DynamicController::new(Arc::clone(store) as Arc<dyn ObjectStore>, config)
}

#[tokio::test]
async fn test_register_dispatch_unregister_reregister() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store);
    let ctx = CancelToken::new();

    let run_task = {
        let controller = Arc::clone(&controller);
        let ctx = ctx.child_token();
        tokio::spawn(async move { controller.run(ctx).await })
    };

    // Register the kind and create one object: exactly one reconcile.
    let first = CountingHandler::new();
    controller
        .start_serving_gvk(&ctx, widget_gvk(), first.clone())
        .await
        .unwrap();
    store.create(&widget_gvk(), widget("a1")).await.unwrap();
    common::eventually("first reconcile of a1", || async {
        first.count_for("a1") == 1
    })
    .await;

    // Unregister, then create another object: no further reconciles.
    controller.stop_serving_gvk(&widget_gvk()).await.unwrap();
    store.create(&widget_gvk(), widget("a2")).await.unwrap();
    common::never_within(
        "reconcile after unregister",
        Duration::from_millis(200),
        || async { first.count() > 1 },
    )
    .await;

    // Re-register: the initial list replays both existing objects once.
    let second = CountingHandler::new();
    controller
        .start_serving_gvk(&ctx, widget_gvk(), second.clone())
        .await
        .unwrap();
    common::eventually("replay of existing objects", || async {
        second.count_for("a1") == 1 && second.count_for("a2") == 1
    })
    .await;

    // Subsequent changes still flow.
    store.create(&widget_gvk(), widget("a3")).await.unwrap();
    common::eventually("reconcile of a3", || async {
        second.count_for("a3") == 1
    })
    .await;
    assert_eq!(first.count(), 1);

    ctx.cancel();
    run_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store);
    let ctx = CancelToken::new();

    let run_task = {
        let controller = Arc::clone(&controller);
        let ctx = ctx.child_token();
        tokio::spawn(async move { controller.run(ctx).await })
    };

    let original = CountingHandler::new();
    let usurper = CountingHandler::new();
    controller
        .start_serving_gvk(&ctx, widget_gvk(), original.clone())
        .await
        .unwrap();
    // The second registration is a no-op; the original handler stays.
    controller
        .start_serving_gvk(&ctx, widget_gvk(), usurper.clone())
        .await
        .unwrap();

    store.create(&widget_gvk(), widget("a1")).await.unwrap();
    common::eventually("dispatch to the original handler", || async {
        original.count() == 1
    })
    .await;
    assert_eq!(usurper.count(), 0);

    // Stopping an unknown kind is not an error.
    controller
        .stop_serving_gvk(&GroupVersionKind::new("x", "v1", "Nope"))
        .await
        .unwrap();

    ctx.cancel();
    run_task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_updates_coalesce_while_in_flight() {
    let store = Arc::new(InMemoryStore::new());
    let controller = controller(&store);
    let ctx = CancelToken::new();

    let run_task = {
        let controller = Arc::clone(&controller);
        let ctx = ctx.child_token();
        tokio::spawn(async move { controller.run(ctx).await })
    };

    let slow = CountingHandler::with_delay(Duration::from_millis(200));
    controller
        .start_serving_gvk(&ctx, widget_gvk(), slow.clone())
        .await
        .unwrap();

    store.create(&widget_gvk(), widget("a1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Spec changes bump the generation and enqueue; all of them land while
    // the first reconcile is still sleeping, so they collapse into one slot.
    for n in 2..=5 {
        store
            .patch(
                &widget_gvk(),
                &ResourceKey::namespaced("default", "a1"),
                json!({ "spec": { "n": n } }),
            )
            .await
            .unwrap();
    }

    common::eventually("coalesced rerun", || async { slow.count() >= 2 }).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let total = slow.count();
    assert!(
        (2..=3).contains(&total),
        "expected the burst to coalesce into at most one rerun, got {total}"
    );

    ctx.cancel();
    run_task.await.unwrap().unwrap();
}
