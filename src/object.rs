//! Dynamic object model
//!
//! Objects crossing the store boundary are generic JSON maps preserving
//! `apiVersion`, `kind`, `metadata`, `spec` and optional `status`. This module
//! wraps them with the typed accessors the engine needs, without committing to
//! any per-kind struct.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{Error, Result};
use crate::meta::{GroupVersionKind, OwnerMeta, ResourceKey};

/// A loosely typed object as stored in the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DynamicObject(pub Value);

impl DynamicObject {
    /// Wrap a JSON value; the value must be an object at the top level.
    pub fn new(value: Value) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::Validation(
                "a dynamic object must be a JSON object".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Minimal object skeleton for `gvk` named `name`.
    pub fn skeleton(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("name".to_string(), json!(name));
        if let Some(namespace) = namespace {
            metadata.insert("namespace".to_string(), json!(namespace));
        }
        Self(json!({
            "apiVersion": gvk.api_version(),
            "kind": gvk.kind,
            "metadata": Value::Object(metadata),
        }))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    fn str_field(&self, pointer: &str) -> Option<&str> {
        self.0.pointer(pointer).and_then(Value::as_str)
    }

    pub fn api_version(&self) -> Option<&str> {
        self.str_field("/apiVersion")
    }

    pub fn kind(&self) -> Option<&str> {
        self.str_field("/kind")
    }

    /// Group/version/kind parsed from `apiVersion` + `kind`.
    pub fn gvk(&self) -> Result<GroupVersionKind> {
        let api_version = self
            .api_version()
            .ok_or_else(|| Error::Validation("object has no apiVersion".to_string()))?;
        let kind = self
            .kind()
            .ok_or_else(|| Error::Validation("object has no kind".to_string()))?;
        GroupVersionKind::from_api_version(api_version, kind)
    }

    pub fn name(&self) -> Option<&str> {
        self.str_field("/metadata/name")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.str_field("/metadata/namespace")
    }

    pub fn uid(&self) -> Option<&str> {
        self.str_field("/metadata/uid")
    }

    pub fn generation(&self) -> Option<i64> {
        self.0.pointer("/metadata/generation").and_then(Value::as_i64)
    }

    pub fn deletion_timestamp(&self) -> Option<&str> {
        self.str_field("/metadata/deletionTimestamp")
    }

    /// True once the object has been marked for deletion.
    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp().is_some()
    }

    /// Namespaced key of this object.
    pub fn key(&self) -> Result<ResourceKey> {
        let name = self
            .name()
            .ok_or_else(|| Error::Validation("object has no metadata.name".to_string()))?;
        Ok(ResourceKey {
            namespace: self.namespace().map(str::to_string),
            name: name.to_string(),
        })
    }

    /// Name, namespace and uid in owner-reference form.
    pub fn owner_meta(&self) -> OwnerMeta {
        OwnerMeta {
            name: self.name().unwrap_or_default().to_string(),
            namespace: self.namespace().unwrap_or_default().to_string(),
            uid: self.uid().unwrap_or_default().to_string(),
        }
    }

    pub fn spec(&self) -> Value {
        self.0.get("spec").cloned().unwrap_or(Value::Null)
    }

    pub fn status(&self) -> Value {
        self.0.get("status").cloned().unwrap_or(Value::Null)
    }

    pub fn set_status(&mut self, status: Value) {
        if let Some(map) = self.0.as_object_mut() {
            map.insert("status".to_string(), status);
        }
    }

    fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        if !self.0.is_object() {
            self.0 = Value::Object(Map::new());
        }
        let root = match self.0.as_object_mut() {
            Some(root) => root,
            None => unreachable!(),
        };
        let entry = root
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        match entry.as_object_mut() {
            Some(metadata) => metadata,
            None => unreachable!(),
        }
    }

    pub fn set_uid(&mut self, uid: &str) {
        self.metadata_mut().insert("uid".to_string(), json!(uid));
    }

    pub fn set_namespace(&mut self, namespace: &str) {
        self.metadata_mut()
            .insert("namespace".to_string(), json!(namespace));
    }

    pub fn set_generation(&mut self, generation: i64) {
        self.metadata_mut()
            .insert("generation".to_string(), json!(generation));
    }

    pub fn set_deletion_timestamp(&mut self, at: DateTime<Utc>) {
        self.metadata_mut()
            .insert("deletionTimestamp".to_string(), json!(at.to_rfc3339()));
    }

    pub fn labels(&self) -> Vec<(String, String)> {
        match self.0.pointer("/metadata/labels").and_then(Value::as_object) {
            Some(map) => map
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.0
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(key))
            .and_then(Value::as_str)
    }

    /// Merge `labels` into the object; returns true when anything changed.
    pub fn apply_labels<'a, I>(&mut self, labels: I) -> bool
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let metadata = self.metadata_mut();
        let entry = metadata
            .entry("labels")
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let map = match entry.as_object_mut() {
            Some(map) => map,
            None => unreachable!(),
        };

        let mut changed = false;
        for (key, value) in labels {
            if map.get(key).and_then(Value::as_str) != Some(value.as_str()) {
                map.insert(key.clone(), json!(value));
                changed = true;
            }
        }
        changed
    }

    pub fn finalizers(&self) -> Vec<String> {
        match self
            .0
            .pointer("/metadata/finalizers")
            .and_then(Value::as_array)
        {
            Some(list) => list
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Add `finalizer` if absent; returns true when the object changed.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        let metadata = self.metadata_mut();
        let entry = metadata
            .entry("finalizers")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Some(list) = entry.as_array_mut() {
            list.push(json!(finalizer));
        }
        true
    }

    /// Remove `finalizer` if present; returns true when the object changed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let metadata = self.metadata_mut();
        if let Some(list) = metadata.get_mut("finalizers").and_then(Value::as_array_mut) {
            let before = list.len();
            list.retain(|f| f.as_str() != Some(finalizer));
            return list.len() != before;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DynamicObject {
        DynamicObject::new(json!({
            "apiVersion": "ec2.services.com/v1",
            "kind": "Vpc",
            "metadata": {
                "name": "my-vpc",
                "namespace": "default",
                "uid": "uid-1",
                "generation": 3,
            },
            "spec": { "cidrBlock": "10.0.0.0/16" },
        }))
        .unwrap()
    }

    #[test]
    fn test_accessors() {
        let obj = sample();
        assert_eq!(obj.kind(), Some("Vpc"));
        assert_eq!(obj.name(), Some("my-vpc"));
        assert_eq!(obj.generation(), Some(3));
        assert_eq!(obj.key().unwrap().to_string(), "default/my-vpc");
        assert_eq!(obj.gvk().unwrap().group, "ec2.services.com");
        assert!(!obj.is_deleting());
    }

    #[test]
    fn test_rejects_non_object() {
        assert!(DynamicObject::new(json!("just a string")).is_err());
        assert!(DynamicObject::new(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn test_finalizer_round_trip() {
        let mut obj = sample();
        assert!(obj.add_finalizer("uid-1.korus.dev/finalizer"));
        assert!(!obj.add_finalizer("uid-1.korus.dev/finalizer"));
        assert!(obj.has_finalizer("uid-1.korus.dev/finalizer"));

        assert!(obj.remove_finalizer("uid-1.korus.dev/finalizer"));
        assert!(!obj.remove_finalizer("uid-1.korus.dev/finalizer"));
        assert!(obj.finalizers().is_empty());
    }

    #[test]
    fn test_apply_labels_reports_changes() {
        let mut obj = sample();
        let labels = std::collections::BTreeMap::from([
            ("korus.dev/owned".to_string(), "true".to_string()),
        ]);
        assert!(obj.apply_labels(&labels));
        assert!(!obj.apply_labels(&labels));
        assert_eq!(obj.label("korus.dev/owned"), Some("true"));
    }
}
