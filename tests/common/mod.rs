//! Shared fixtures for the integration suites

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use korus::error::StoreError;
use korus::meta::{GroupVersionKind, ResourceKey};
use korus::object::DynamicObject;
use korus::schema::transform_shorthand;
use korus::store::memory::InMemoryStore;
use korus::store::registry::StaticRegistry;
use korus::store::{ObjectStore, WatchStream};

/// Install a per-test subscriber so `RUST_LOG` surfaces controller traces.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn vpc_gvk() -> GroupVersionKind {
    GroupVersionKind::new("ec2.services.com", "v1", "Vpc")
}

pub fn subnet_gvk() -> GroupVersionKind {
    GroupVersionKind::new("ec2.services.com", "v1", "Subnet")
}

pub fn net_gvk() -> GroupVersionKind {
    GroupVersionKind::new("korus.dev", "v1alpha1", "Net")
}

/// Registry pre-loaded with the EC2-flavoured kinds the suites compose.
pub fn ec2_registry() -> Arc<StaticRegistry> {
    let registry = StaticRegistry::new();
    registry.register(
        vpc_gvk(),
        transform_shorthand(&json!({
            "spec": { "cidrBlock": "string" },
            "status": { "vpcID": "string", "state": "string" },
        }))
        .expect("vpc schema"),
        true,
    );
    registry.register(
        subnet_gvk(),
        transform_shorthand(&json!({
            "spec": { "vpcID": "string", "cidrBlock": "string" },
            "status": { "subnetID": "string" },
        }))
        .expect("subnet schema"),
        true,
    );
    Arc::new(registry)
}

/// The `Net` group definition: a vpc with a readiness gate and a subnet
/// wired to the vpc's observed id, gated by `spec.enableSubnets`.
pub fn net_group_object() -> DynamicObject {
    DynamicObject::new(json!({
        "apiVersion": "korus.dev/v1alpha1",
        "kind": "ResourceGroup",
        "metadata": {
            "name": "net-group",
            "namespace": "platform",
            "uid": "group-uid",
        },
        "spec": {
            "kind": "Net",
            "apiVersion": "v1alpha1",
            "schema": {
                "spec": {
                    "name": "string | required=true",
                    "enableSubnets": "boolean | default=true",
                },
                "status": { "vpcID": "${vpc.status.vpcID}" },
            },
            "resources": [
                {
                    "id": "vpc",
                    "template": {
                        "apiVersion": "ec2.services.com/v1",
                        "kind": "Vpc",
                        "metadata": { "name": "${spec.name}-vpc" },
                        "spec": { "cidrBlock": "10.0.0.0/16" },
                    },
                    "readyWhen": ["${vpc.status.state == 'available'}"],
                },
                {
                    "id": "subnet",
                    "template": {
                        "apiVersion": "ec2.services.com/v1",
                        "kind": "Subnet",
                        "metadata": { "name": "${spec.name}-subnet" },
                        "spec": {
                            "vpcID": "${vpc.status.vpcID}",
                            "cidrBlock": "10.0.1.0/24",
                        },
                    },
                    "includeWhen": ["${spec.enableSubnets == true}"],
                },
            ],
        },
    }))
    .expect("group definition object")
}

pub fn net_instance(name: &str, spec: Value) -> DynamicObject {
    DynamicObject::new(json!({
        "apiVersion": "korus.dev/v1alpha1",
        "kind": "Net",
        "metadata": { "name": name, "namespace": "default" },
        "spec": spec,
    }))
    .expect("instance object")
}

/// Poll `condition` until it holds or a generous deadline passes.
pub async fn eventually<F, Fut>(what: &str, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Hold `condition` false for `window` to assert nothing happens.
pub async fn never_within<F, Fut>(what: &str, window: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + window;
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            panic!("unexpectedly observed: {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Store decorator that records mutating calls in order, for the ordering
/// properties (creation order, reverse deletion order).
pub struct RecordingStore {
    inner: InMemoryStore,
    operations: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryStore::new(),
            operations: Mutex::new(Vec::new()),
        })
    }

    /// Every recorded mutation, as `op kind namespace/name`.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().clone()
    }

    pub fn operations_matching(&self, prefix: &str) -> Vec<String> {
        self.operations()
            .into_iter()
            .filter(|op| op.starts_with(prefix))
            .collect()
    }

    fn record(&self, op: &str, gvk: &GroupVersionKind, key: &ResourceKey) {
        self.operations.lock().push(format!("{op} {} {key}", gvk.kind));
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.get(gvk, key).await
    }

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        let created = self.inner.create(gvk, object).await?;
        if let Ok(key) = created.key() {
            self.record("create", gvk, &key);
        }
        Ok(created)
    }

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.update(gvk, object).await
    }

    async fn patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        patch: Value,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.patch(gvk, key, patch).await
    }

    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        status: Value,
    ) -> Result<DynamicObject, StoreError> {
        self.inner.patch_status(gvk, key, status).await
    }

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
    ) -> Result<(), StoreError> {
        self.inner.delete(gvk, key).await?;
        self.record("delete", gvk, key);
        Ok(())
    }

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        self.inner.list(gvk, namespace).await
    }

    async fn watch(&self, gvk: &GroupVersionKind) -> Result<WatchStream, StoreError> {
        self.inner.watch(gvk).await
    }
}
