//! Instance reconciliation scenarios
//!
//! Drives the instance reconciler pass by pass against the in-memory store:
//! creation in topological order with labels and finalizers, conditional
//! inclusion, readiness gating, status projection, and reverse-order
//! teardown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use korus::config::ControllerConfig;
use korus::expr::ExpressionEngine;
use korus::group::{GroupBuilder, GroupDefinition, RuntimeGroup};
use korus::meta::{instance_finalizer, Labeler, ResourceKey};
use korus::reconciler::InstanceReconciler;
use korus::store::ObjectStore;

use common::RecordingStore;

async fn build_net_group() -> Arc<RuntimeGroup> {
    let definition = GroupDefinition::from_object(&common::net_group_object()).unwrap();
    let builder = GroupBuilder::new(common::ec2_registry(), Arc::new(ExpressionEngine::new()));
    Arc::new(builder.build(definition).await.unwrap())
}

fn fast_config() -> ControllerConfig {
    ControllerConfig {
        default_requeue_duration: Duration::from_millis(20),
        ..ControllerConfig::default()
    }
}

async fn reconciler_fixture() -> (Arc<RecordingStore>, InstanceReconciler) {
    let store = RecordingStore::new();
    let group = build_net_group().await;
    let reconciler = InstanceReconciler::new(
        group,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::new(ExpressionEngine::new()),
        Labeler::new("pod-1", "test"),
        fast_config(),
    );
    (store, reconciler)
}

fn instance_key() -> ResourceKey {
    ResourceKey::namespaced("default", "my-net")
}

async fn instance_state(store: &RecordingStore) -> Value {
    let instance = store
        .get(&common::net_gvk(), &instance_key())
        .await
        .unwrap();
    instance.status()["state"].clone()
}

/// Walk the fixture to ACTIVE: create vpc, flip it available, create subnet.
async fn settle_instance(store: &Arc<RecordingStore>, reconciler: &InstanceReconciler) {
    let key = instance_key();
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    store
        .patch_status(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
            json!({ "vpcID": "vpc-123", "state": "available" }),
        )
        .await
        .unwrap();
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    reconciler.reconcile(&key).await.unwrap();
}

#[tokio::test]
async fn test_lifecycle_to_active() {
    let (store, reconciler) = reconciler_fixture().await;
    let key = instance_key();
    let instance = store
        .create(
            &common::net_gvk(),
            common::net_instance("my-net", json!({ "name": "my-net", "enableSubnets": true })),
        )
        .await
        .unwrap();
    let uid = instance.uid().unwrap().to_string();

    // Pass 1: vpc is created, the pass requeues.
    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_requeue());

    let vpc = store
        .get(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
        )
        .await
        .unwrap();
    assert_eq!(vpc.label("korus.dev/owned"), Some("true"));
    assert_eq!(vpc.label("korus.dev/instance-id"), Some(uid.as_str()));
    assert_eq!(vpc.label("korus.dev/instance-name"), Some("my-net"));
    assert_eq!(vpc.label("korus.dev/resource-group-name"), Some("net-group"));

    let observed = store.get(&common::net_gvk(), &key).await.unwrap();
    assert!(observed.has_finalizer(&instance_finalizer(&uid)));
    assert_eq!(instance_state(&store).await, json!("IN_PROGRESS"));

    // Pass 2: vpc exists but is pending; still in progress.
    store
        .patch_status(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
            json!({ "vpcID": "vpc-123", "state": "pending" }),
        )
        .await
        .unwrap();
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    assert_eq!(instance_state(&store).await, json!("IN_PROGRESS"));

    // Pass 3: vpc available, subnet gets created with the resolved id.
    store
        .patch_status(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
            json!({ "state": "available" }),
        )
        .await
        .unwrap();
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());

    let subnet = store
        .get(
            &common::subnet_gvk(),
            &ResourceKey::namespaced("default", "my-net-subnet"),
        )
        .await
        .unwrap();
    assert_eq!(subnet.spec()["vpcID"], json!("vpc-123"));
    assert_eq!(subnet.label("korus.dev/owned"), Some("true"));

    // Pass 4: everything settled.
    reconciler.reconcile(&key).await.unwrap();
    let instance = store.get(&common::net_gvk(), &key).await.unwrap();
    assert_eq!(instance.status()["state"], json!("ACTIVE"));
    assert_eq!(instance.status()["vpcID"], json!("vpc-123"));
    let conditions = instance.status()["conditions"].clone();
    assert_eq!(conditions[0]["type"], json!("AllResourcesSynced"));
    assert_eq!(conditions[0]["status"], json!("True"));

    // Children were created in topological order.
    assert_eq!(
        store.operations_matching("create"),
        vec![
            "create Vpc default/my-net-vpc".to_string(),
            "create Subnet default/my-net-subnet".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_conditional_include_skips_subnet() {
    let (store, reconciler) = reconciler_fixture().await;
    let key = instance_key();
    store
        .create(
            &common::net_gvk(),
            common::net_instance("my-net", json!({ "name": "my-net", "enableSubnets": false })),
        )
        .await
        .unwrap();

    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    store
        .patch_status(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
            json!({ "vpcID": "vpc-123", "state": "available" }),
        )
        .await
        .unwrap();
    reconciler.reconcile(&key).await.unwrap();

    assert_eq!(instance_state(&store).await, json!("ACTIVE"));
    // No create call was ever issued for the subnet.
    assert_eq!(
        store.operations_matching("create Subnet"),
        Vec::<String>::new()
    );
    assert!(store
        .get(
            &common::subnet_gvk(),
            &ResourceKey::namespaced("default", "my-net-subnet"),
        )
        .await
        .is_err());
}

#[tokio::test]
async fn test_deletion_order_is_reverse_of_creation() {
    let (store, reconciler) = reconciler_fixture().await;
    let key = instance_key();
    store
        .create(
            &common::net_gvk(),
            common::net_instance("my-net", json!({ "name": "my-net", "enableSubnets": true })),
        )
        .await
        .unwrap();
    settle_instance(&store, &reconciler).await;

    // Mark for deletion; the finalizer keeps the object alive.
    store.delete(&common::net_gvk(), &key).await.unwrap();
    assert!(store.get(&common::net_gvk(), &key).await.unwrap().is_deleting());

    // One child torn down per pass, deepest dependents first.
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    assert!(reconciler.reconcile(&key).await.unwrap_err().is_requeue());
    reconciler.reconcile(&key).await.unwrap();

    let deletes: Vec<String> = store
        .operations_matching("delete")
        .into_iter()
        .filter(|op| !op.contains(" Net "))
        .collect();
    assert_eq!(
        deletes,
        vec![
            "delete Subnet default/my-net-subnet".to_string(),
            "delete Vpc default/my-net-vpc".to_string(),
        ]
    );

    // The finalizer was released and the instance is gone.
    assert!(store.get(&common::net_gvk(), &key).await.is_err());
    assert!(store
        .get(
            &common::vpc_gvk(),
            &ResourceKey::namespaced("default", "my-net-vpc"),
        )
        .await
        .is_err());
}

#[tokio::test]
async fn test_missing_instance_is_success() {
    let (_store, reconciler) = reconciler_fixture().await;
    reconciler
        .reconcile(&ResourceKey::namespaced("default", "ghost"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_error_state_on_hard_failure() {
    let (store, reconciler) = reconciler_fixture().await;
    let key = instance_key();
    // An instance without the required spec fields makes static resolution
    // fail outright.
    store
        .create(
            &common::net_gvk(),
            common::net_instance("my-net", json!({})),
        )
        .await
        .unwrap();

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(!err.is_requeue());
    assert_eq!(instance_state(&store).await, json!("ERROR"));

    let instance = store.get(&common::net_gvk(), &key).await.unwrap();
    let conditions = instance.status()["conditions"].clone();
    assert_eq!(conditions[0]["type"], json!("ResourceSynced"));
    assert_eq!(conditions[0]["status"], json!("False"));
}
