//! External collaborator interfaces
//!
//! The engine never talks to a concrete control plane; it goes through the
//! [`ObjectStore`] and [`SchemaRegistry`] traits. The [`memory`] module ships
//! an embedded implementation used by the integration suite and by hosts that
//! want a self-contained control plane.

pub mod memory;
pub mod registry;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;

use crate::error::{Result, StoreError};
use crate::meta::{GroupVersionKind, ResourceKey};
use crate::object::DynamicObject;
use crate::schema::StructuralSchema;

/// One observed change on a watched kind.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Added(DynamicObject),
    Modified {
        old: Option<DynamicObject>,
        new: DynamicObject,
    },
    Deleted(DynamicObject),
}

impl WatchEvent {
    /// The object the event is about (the new state where there is one).
    pub fn object(&self) -> &DynamicObject {
        match self {
            WatchEvent::Added(obj) => obj,
            WatchEvent::Modified { new, .. } => new,
            WatchEvent::Deleted(obj) => obj,
        }
    }
}

/// Stream of watch events for one kind.
pub type WatchStream = BoxStream<'static, WatchEvent>;

/// Generic object store: per-kind reads, writes and watches.
///
/// Status is a subresource: [`ObjectStore::patch_status`] must only touch
/// `status` and must not bump the object's generation.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
    ) -> std::result::Result<DynamicObject, StoreError>;

    async fn create(
        &self,
        gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> std::result::Result<DynamicObject, StoreError>;

    async fn update(
        &self,
        gvk: &GroupVersionKind,
        object: DynamicObject,
    ) -> std::result::Result<DynamicObject, StoreError>;

    /// Merge-patch `patch` into the object.
    async fn patch(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        patch: Value,
    ) -> std::result::Result<DynamicObject, StoreError>;

    /// Merge-patch the status subresource.
    async fn patch_status(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
        status: Value,
    ) -> std::result::Result<DynamicObject, StoreError>;

    async fn delete(
        &self,
        gvk: &GroupVersionKind,
        key: &ResourceKey,
    ) -> std::result::Result<(), StoreError>;

    async fn list(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> std::result::Result<Vec<DynamicObject>, StoreError>;

    async fn watch(
        &self,
        gvk: &GroupVersionKind,
    ) -> std::result::Result<WatchStream, StoreError>;
}

/// Schema registry: resolves type descriptors and publishes composite CRDs.
#[async_trait]
pub trait SchemaRegistry: Send + Sync {
    /// Structural schema for `gvk`, from static definitions or discovery.
    async fn resolve_schema(&self, gvk: &GroupVersionKind) -> Result<StructuralSchema>;

    /// Whether `gvk` is namespace-scoped.
    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool>;

    /// Publish (create or replace) a composite CRD.
    async fn ensure_crd(&self, crd: DynamicObject) -> Result<()>;

    /// Unpublish a composite CRD by name; unknown names are a no-op.
    async fn delete_crd(&self, name: &str) -> Result<()>;
}
