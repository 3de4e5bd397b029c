//! Static schema registry
//!
//! An in-process [`SchemaRegistry`] backed by pre-registered definitions.
//! Publishing a composite CRD through [`SchemaRegistry::ensure_crd`] also
//! registers the composite kind's schema, so instances of a freshly built
//! group resolve like any other kind. Real deployments put a discovery-backed
//! registry behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::meta::GroupVersionKind;
use crate::object::DynamicObject;
use crate::schema::StructuralSchema;
use crate::store::SchemaRegistry;

/// Registry entry for one kind.
#[derive(Debug, Clone)]
struct KindEntry {
    schema: StructuralSchema,
    namespaced: bool,
}

/// In-process [`SchemaRegistry`].
pub struct StaticRegistry {
    kinds: DashMap<GroupVersionKind, KindEntry>,
    crds: DashMap<String, DynamicObject>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self {
            kinds: DashMap::new(),
            crds: DashMap::new(),
        }
    }

    /// Register a kind with its structural schema and scope.
    pub fn register(&self, gvk: GroupVersionKind, schema: StructuralSchema, namespaced: bool) {
        self.kinds.insert(gvk, KindEntry { schema, namespaced });
    }

    /// The published CRD object for `name`, if any.
    pub fn crd(&self, name: &str) -> Option<DynamicObject> {
        self.crds.get(name).map(|entry| entry.clone())
    }

    /// Names of every published CRD, sorted.
    pub fn crd_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.crds.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl Default for StaticRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaRegistry for StaticRegistry {
    async fn resolve_schema(&self, gvk: &GroupVersionKind) -> Result<StructuralSchema> {
        self.kinds
            .get(gvk)
            .map(|entry| entry.schema.clone())
            .ok_or_else(|| Error::Registry(format!("no schema registered for {gvk}")))
    }

    async fn is_namespaced(&self, gvk: &GroupVersionKind) -> Result<bool> {
        self.kinds
            .get(gvk)
            .map(|entry| entry.namespaced)
            .ok_or_else(|| Error::Registry(format!("scope of {gvk} is unknown")))
    }

    async fn ensure_crd(&self, crd: DynamicObject) -> Result<()> {
        let name = crd
            .name()
            .ok_or_else(|| Error::Registry("CRD has no metadata.name".to_string()))?
            .to_string();

        let spec = crd.spec();
        let group = spec
            .get("group")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Registry(format!("CRD {name} has no spec.group")))?;
        let kind = spec
            .pointer("/names/kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Registry(format!("CRD {name} has no spec.names.kind")))?;
        let namespaced = spec.get("scope").and_then(Value::as_str) == Some("Namespaced");

        let version_entry = spec
            .pointer("/versions/0")
            .ok_or_else(|| Error::Registry(format!("CRD {name} declares no versions")))?;
        let version = version_entry
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Registry(format!("CRD {name} version has no name")))?;
        let schema_value = version_entry
            .pointer("/schema/openAPIV3Schema")
            .cloned()
            .unwrap_or(Value::Null);
        let schema: StructuralSchema = serde_json::from_value(schema_value)
            .map_err(|e| Error::Registry(format!("CRD {name} schema is malformed: {e}")))?;

        self.register(
            GroupVersionKind::new(group, version, kind),
            schema,
            namespaced,
        );
        self.crds.insert(name, crd);
        Ok(())
    }

    async fn delete_crd(&self, name: &str) -> Result<()> {
        if let Some((_, crd)) = self.crds.remove(name) {
            if let Ok(gvk) = crd_gvk(&crd) {
                self.kinds.remove(&gvk);
            }
        }
        Ok(())
    }
}

fn crd_gvk(crd: &DynamicObject) -> Result<GroupVersionKind> {
    let spec = crd.spec();
    let group = spec
        .get("group")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let kind = spec
        .pointer("/names/kind")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let version = spec
        .pointer("/versions/0/name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if group.is_empty() || kind.is_empty() || version.is_empty() {
        return Err(Error::Registry("incomplete CRD identity".to_string()));
    }
    Ok(GroupVersionKind::new(group, version, kind))
}
