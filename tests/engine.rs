//! Full-stack scenario: definition to active instance to teardown
//!
//! Runs the whole engine (group controller + dynamic controller + workers)
//! against the embedded store: publishing a group definition serves the new
//! composite kind, instances materialize their children as dependencies
//! settle, and deletion unwinds everything.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use korus::concurrency::CancelToken;
use korus::config::EngineConfig;
use korus::group::definition_gvk;
use korus::meta::ResourceKey;
use korus::store::memory::InMemoryStore;
use korus::store::{ObjectStore, SchemaRegistry};
use korus::Engine;

fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.controller.workers = 2;
    config.controller.default_requeue_duration = Duration::from_millis(30);
    config.controller.sync_timeout = Duration::from_secs(5);
    config.controller.shutdown_timeout = Duration::from_secs(5);
    config
}

#[tokio::test]
async fn test_group_to_instance_to_teardown() -> anyhow::Result<()> {
    common::init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let registry = common::ec2_registry();
    let engine = Engine::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&registry) as Arc<dyn SchemaRegistry>,
        fast_config(),
    )?;

    let ctx = CancelToken::new();
    let engine_task = {
        let ctx = ctx.child_token();
        tokio::spawn(async move { engine.run(ctx).await })
    };

    // Publish the group definition; the controller builds it, publishes the
    // CRD and starts serving the composite kind.
    store
        .create(&definition_gvk(), common::net_group_object())
        .await
        .unwrap();

    let definition_key = ResourceKey::namespaced("platform", "net-group");
    common::eventually("group goes active", || async {
        match store.get(&definition_gvk(), &definition_key).await {
            Ok(definition) => definition.status()["state"] == json!("Active"),
            Err(_) => false,
        }
    })
    .await;

    let definition = store
        .get(&definition_gvk(), &definition_key)
        .await
        .unwrap();
    assert_eq!(
        definition.status()["topologicalOrder"],
        json!(["vpc", "subnet"])
    );
    assert_eq!(
        definition.status()["resources"][1]["dependencies"][0]["name"],
        json!("vpc")
    );
    assert!(registry
        .crd_names()
        .contains(&"nets.korus.dev".to_string()));

    // Create an instance of the new kind; the vpc materializes first.
    store
        .create(
            &common::net_gvk(),
            common::net_instance("my-net", json!({ "name": "my-net", "enableSubnets": true })),
        )
        .await
        .unwrap();

    let vpc_key = ResourceKey::namespaced("default", "my-net-vpc");
    common::eventually("vpc gets created", || async {
        store.get(&common::vpc_gvk(), &vpc_key).await.is_ok()
    })
    .await;

    // Until the vpc reports available, the subnet must not exist.
    let subnet_key = ResourceKey::namespaced("default", "my-net-subnet");
    common::never_within("subnet before vpc ready", Duration::from_millis(200), || async {
        store.get(&common::subnet_gvk(), &subnet_key).await.is_ok()
    })
    .await;

    store
        .patch_status(
            &common::vpc_gvk(),
            &vpc_key,
            json!({ "vpcID": "vpc-123", "state": "available" }),
        )
        .await
        .unwrap();

    common::eventually("subnet gets created", || async {
        store.get(&common::subnet_gvk(), &subnet_key).await.is_ok()
    })
    .await;
    let subnet = store.get(&common::subnet_gvk(), &subnet_key).await.unwrap();
    assert_eq!(subnet.spec()["vpcID"], json!("vpc-123"));

    let instance_key = ResourceKey::namespaced("default", "my-net");
    common::eventually("instance goes active", || async {
        match store.get(&common::net_gvk(), &instance_key).await {
            Ok(instance) => {
                instance.status()["state"] == json!("ACTIVE")
                    && instance.status()["vpcID"] == json!("vpc-123")
            }
            Err(_) => false,
        }
    })
    .await;

    // Teardown: deleting the instance unwinds subnet, vpc, then the
    // instance itself once its finalizer is released.
    store.delete(&common::net_gvk(), &instance_key).await.unwrap();
    common::eventually("children and instance are gone", || async {
        store.get(&common::subnet_gvk(), &subnet_key).await.is_err()
            && store.get(&common::vpc_gvk(), &vpc_key).await.is_err()
            && store.get(&common::net_gvk(), &instance_key).await.is_err()
    })
    .await;

    // Removing the definition unpublishes the CRD and stops serving.
    store
        .delete(&definition_gvk(), &definition_key)
        .await
        .unwrap();
    common::eventually("definition and CRD are gone", || async {
        store.get(&definition_gvk(), &definition_key).await.is_err()
            && registry.crd_names().is_empty()
    })
    .await;

    ctx.cancel();
    engine_task.await??;
    Ok(())
}

#[tokio::test]
async fn test_invalid_definition_goes_inactive() -> anyhow::Result<()> {
    common::init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let registry = common::ec2_registry();
    let engine = Engine::new(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        Arc::clone(&registry) as Arc<dyn SchemaRegistry>,
        fast_config(),
    )?;

    let ctx = CancelToken::new();
    let engine_task = {
        let ctx = ctx.child_token();
        tokio::spawn(async move { engine.run(ctx).await })
    };

    // Two templates referencing each other: the build must fail on the
    // cycle and the definition must surface it.
    let broken = korus::object::DynamicObject::new(json!({
        "apiVersion": "korus.dev/v1alpha1",
        "kind": "ResourceGroup",
        "metadata": { "name": "broken", "namespace": "platform", "uid": "uid-b" },
        "spec": {
            "kind": "Tangle",
            "apiVersion": "v1alpha1",
            "schema": { "spec": { "name": "string" } },
            "resources": [
                {
                    "id": "role1",
                    "template": {
                        "apiVersion": "ec2.services.com/v1",
                        "kind": "Vpc",
                        "metadata": { "name": "${role2.metadata.name}1" },
                        "spec": {},
                    },
                },
                {
                    "id": "role2",
                    "template": {
                        "apiVersion": "ec2.services.com/v1",
                        "kind": "Vpc",
                        "metadata": { "name": "${role1.metadata.name}2" },
                        "spec": {},
                    },
                },
            ],
        },
    }))
    .unwrap();
    store.create(&definition_gvk(), broken).await.unwrap();

    let key = ResourceKey::namespaced("platform", "broken");
    common::eventually("definition goes inactive", || async {
        match store.get(&definition_gvk(), &key).await {
            Ok(definition) => definition.status()["state"] == json!("Inactive"),
            Err(_) => false,
        }
    })
    .await;

    let definition = store.get(&definition_gvk(), &key).await.unwrap();
    let conditions = definition.status()["conditions"].clone();
    assert_eq!(conditions[0]["type"], json!("GraphVerified"));
    assert_eq!(conditions[0]["status"], json!("False"));
    assert_eq!(conditions[1]["type"], json!("CustomResourceDefinitionSynced"));
    assert_eq!(conditions[1]["status"], json!("Unknown"));
    assert_eq!(conditions[2]["type"], json!("ReconcilerReady"));
    assert_eq!(conditions[2]["status"], json!("Unknown"));

    // No kind was published for the broken group.
    assert!(registry.crd_names().is_empty());

    ctx.cancel();
    engine_task.await??;
    Ok(())
}
