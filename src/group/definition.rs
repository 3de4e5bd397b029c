//! Group definition objects

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::meta::{GroupVersionKind, OwnerMeta};
use crate::object::DynamicObject;

/// API group the definition kind itself lives in.
pub const GROUP_DEFINITION_GROUP: &str = "korus.dev";
/// API version of the definition kind.
pub const GROUP_DEFINITION_VERSION: &str = "v1alpha1";
/// Kind name of the definition objects the group controller watches.
pub const GROUP_DEFINITION_KIND: &str = "ResourceGroup";

/// One child resource template inside a group definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildTemplate {
    /// Local id, unique within the group
    pub id: String,
    /// The templated object body
    pub template: Value,
    /// Boolean expressions gating readiness, each one `${…}` fragment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ready_when: Vec<String>,
    /// Boolean expressions gating creation, each one `${…}` fragment
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_when: Vec<String>,
}

/// A parsed group definition revision.
///
/// User-authored and immutable per revision; the group controller runs the
/// builder against it on every observed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    /// Identity of the definition object itself
    pub meta: DefinitionMeta,
    /// The composite kind this group declares
    pub kind: String,
    /// Version of the composite kind, e.g. `v1alpha1`
    pub api_version: String,
    /// Spec schema in type shorthand
    #[serde(default)]
    pub spec_shorthand: Value,
    /// Status template, possibly containing expressions
    #[serde(default)]
    pub status_template: Value,
    /// Ordered child templates
    #[serde(default)]
    pub children: Vec<ChildTemplate>,
}

/// Name, namespace, uid and generation of the definition object.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DefinitionMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub generation: i64,
}

impl GroupDefinition {
    /// Parse a watched definition object.
    ///
    /// Expected shape:
    /// ```yaml
    /// apiVersion: korus.dev/v1alpha1
    /// kind: ResourceGroup
    /// metadata: { name, namespace, uid }
    /// spec:
    ///   kind: Net
    ///   apiVersion: v1alpha1
    ///   schema:
    ///     spec:   { … type shorthand … }
    ///     status: { … expression template … }
    ///   resources:
    ///     - id: vpc
    ///       template: { … }
    ///       readyWhen: ["${…}"]
    ///       includeWhen: ["${…}"]
    /// ```
    pub fn from_object(object: &DynamicObject) -> Result<Self> {
        let spec = object.spec();
        if !spec.is_object() {
            return Err(Error::Validation(
                "group definition has no spec".to_string(),
            ));
        }

        let kind = spec
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Validation("group definition has no spec.kind".to_string()))?
            .to_string();
        let api_version = spec
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or(GROUP_DEFINITION_VERSION)
            .to_string();

        let spec_shorthand = spec.pointer("/schema/spec").cloned().unwrap_or(Value::Null);
        let status_template = spec
            .pointer("/schema/status")
            .cloned()
            .unwrap_or(Value::Null);

        let children = match spec.get("resources") {
            Some(resources) => serde_json::from_value(resources.clone()).map_err(|e| {
                Error::Validation(format!("malformed resources list: {e}"))
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            meta: DefinitionMeta {
                name: object.name().unwrap_or_default().to_string(),
                namespace: object.namespace().unwrap_or_default().to_string(),
                uid: object.uid().unwrap_or_default().to_string(),
                generation: object.generation().unwrap_or_default(),
            },
            kind,
            api_version,
            spec_shorthand,
            status_template,
            children,
        })
    }

    /// The composite kind this definition declares.
    pub fn instance_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::new(GROUP_DEFINITION_GROUP, &self.api_version, &self.kind)
    }

    /// Owner identity used in child labels.
    pub fn owner_meta(&self) -> OwnerMeta {
        OwnerMeta {
            name: self.meta.name.clone(),
            namespace: self.meta.namespace.clone(),
            uid: self.meta.uid.clone(),
        }
    }
}

/// GVK of the definition kind itself.
pub fn definition_gvk() -> GroupVersionKind {
    GroupVersionKind::new(
        GROUP_DEFINITION_GROUP,
        GROUP_DEFINITION_VERSION,
        GROUP_DEFINITION_KIND,
    )
}
