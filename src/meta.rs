//! Kind identifiers, object keys, labels and finalizer names
//!
//! Everything the engine stamps onto managed objects lives here so that the
//! reconciler, the controllers and the test suites agree on one vocabulary.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Label and finalizer domain owned by the engine
pub const DOMAIN: &str = "korus.dev";

/// Marker label present on every managed child resource
pub const LABEL_OWNED: &str = "korus.dev/owned";
/// Pod id of the controller that created the child
pub const LABEL_CONTROLLER_POD_ID: &str = "korus.dev/controller-pod-id";
/// Engine version that created the child
pub const LABEL_ENGINE_VERSION: &str = "korus.dev/engine-version";
/// Uid of the managing resource group
pub const LABEL_GROUP_ID: &str = "korus.dev/resource-group-id";
/// Name of the managing resource group
pub const LABEL_GROUP_NAME: &str = "korus.dev/resource-group-name";
/// Namespace of the managing resource group
pub const LABEL_GROUP_NAMESPACE: &str = "korus.dev/resource-group-namespace";
/// Uid of the composite instance
pub const LABEL_INSTANCE_ID: &str = "korus.dev/instance-id";
/// Name of the composite instance
pub const LABEL_INSTANCE_NAME: &str = "korus.dev/instance-name";
/// Namespace of the composite instance
pub const LABEL_INSTANCE_NAMESPACE: &str = "korus.dev/instance-namespace";

/// Finalizer applied to group definition objects
pub const GROUP_FINALIZER: &str = "korus.dev/finalizer";

/// Kind of the control plane's type-definition objects. Child templates of
/// this kind must not contain expressions.
pub const CRD_KIND: &str = "CustomResourceDefinition";
/// API version the engine publishes composite CRDs under
pub const CRD_API_VERSION: &str = "apiextensions.korus.dev/v1";

/// Lowercase plural used as the resource name of a kind.
pub fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s')
        || lower.ends_with('x')
        || lower.ends_with('z')
        || lower.ends_with("ch")
        || lower.ends_with("sh")
    {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y') {
        let penultimate = stem.chars().last();
        match penultimate {
            Some('a') | Some('e') | Some('i') | Some('o') | Some('u') | None => {
                format!("{lower}s")
            }
            _ => format!("{stem}ies"),
        }
    } else {
        format!("{lower}s")
    }
}

/// Finalizer applied to a composite instance. Qualified by the instance uid so
/// that a deleted-and-recreated instance with the same name never inherits a
/// stale finalizer.
pub fn instance_finalizer(uid: &str) -> String {
    format!("{uid}.{DOMAIN}/finalizer")
}

/// Group, version and kind of a resource type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group; empty for the core group
    pub group: String,
    /// API version within the group
    pub version: String,
    /// UpperCamelCase kind name
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` string (`group/version` or bare `version`).
    pub fn from_api_version(api_version: &str, kind: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        if api_version.is_empty() || kind.is_empty() {
            return Err(Error::Validation(
                "apiVersion and kind must both be present".to_string(),
            ));
        }
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        if version.is_empty() {
            return Err(Error::Validation(format!(
                "malformed apiVersion {api_version:?}"
            )));
        }
        Ok(Self::new(group, version, kind))
    }

    /// Reassemble the `apiVersion` string.
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}, Kind={}", self.group, self.version, self.kind)
    }
}

/// Namespaced name of one object, the key half of every work item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Namespace; `None` for cluster-scoped objects
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceKey {
    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Parse the conventional `namespace/name` form; a bare name is
    /// cluster-scoped.
    pub fn parse(key: &str) -> Self {
        match key.split_once('/') {
            Some((namespace, name)) => Self::namespaced(namespace, name),
            None => Self::cluster(key),
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}", namespace, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Identity of the managing resource group, stamped into child labels.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OwnerMeta {
    pub name: String,
    pub namespace: String,
    pub uid: String,
}

/// Produces the label set applied to every managed object.
///
/// Capability object rather than free functions so the reconciler can be
/// handed one pre-bound to the managing group and controller identity.
#[derive(Debug, Clone)]
pub struct Labeler {
    pod_id: String,
    engine_version: String,
    group: OwnerMeta,
}

impl Labeler {
    pub fn new(pod_id: impl Into<String>, engine_version: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            engine_version: engine_version.into(),
            group: OwnerMeta::default(),
        }
    }

    /// Bind the labeler to the managing resource group.
    pub fn for_group(mut self, group: OwnerMeta) -> Self {
        self.group = group;
        self
    }

    /// Labels common to everything the engine touches.
    pub fn group_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_OWNED.to_string(), "true".to_string()),
            (LABEL_CONTROLLER_POD_ID.to_string(), self.pod_id.clone()),
            (
                LABEL_ENGINE_VERSION.to_string(),
                self.engine_version.clone(),
            ),
            (LABEL_GROUP_ID.to_string(), self.group.uid.clone()),
            (LABEL_GROUP_NAME.to_string(), self.group.name.clone()),
            (
                LABEL_GROUP_NAMESPACE.to_string(),
                self.group.namespace.clone(),
            ),
        ])
    }

    /// Full label set for a child of `instance`, back-pointers included.
    pub fn child_labels(&self, instance: &OwnerMeta) -> BTreeMap<String, String> {
        let mut labels = self.group_labels();
        labels.insert(LABEL_INSTANCE_ID.to_string(), instance.uid.clone());
        labels.insert(LABEL_INSTANCE_NAME.to_string(), instance.name.clone());
        labels.insert(
            LABEL_INSTANCE_NAMESPACE.to_string(),
            instance.namespace.clone(),
        );
        labels
    }
}
