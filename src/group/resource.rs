//! Compiled resources

use std::collections::BTreeSet;

use serde_json::Value;

use crate::meta::GroupVersionKind;
use crate::object::DynamicObject;
use crate::schema::StructuralSchema;
use crate::template::Field;

/// One compiled entry of a runtime group: either a child resource or the
/// composite instance pseudo-resource (distinguished by [`Resource::is_instance`]
/// rather than by a separate type).
///
/// Produced by the builder, read-only afterwards.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Local id; for the instance pseudo-resource this is the kind name
    pub id: String,
    /// Resolved group/version/kind
    pub gvk: GroupVersionKind,
    /// Lowercase plural resource name
    pub plural: String,
    /// Structural schema of the kind
    pub schema: StructuralSchema,
    /// Original templated body
    pub template: Value,
    /// Dummy-populated body used for dry runs
    pub emulated: DynamicObject,
    /// Templated locations discovered inside the body
    pub fields: Vec<Field>,
    /// Readiness gates, one compiled source per entry (brackets stripped)
    pub ready_when: Vec<String>,
    /// Creation gates, one compiled source per entry (brackets stripped)
    pub include_when: Vec<String>,
    /// Whether the kind is namespace-scoped
    pub namespaced: bool,
    /// Ids of sibling resources this resource depends on, sorted
    pub dependencies: Vec<String>,
    /// True for the composite instance pseudo-resource
    pub is_instance: bool,
}

impl Resource {
    /// Name literal from the template's metadata, when it is not templated.
    pub fn template_name(&self) -> Option<&str> {
        self.template
            .pointer("/metadata/name")
            .and_then(Value::as_str)
    }

    /// Namespace pinned in the template, if any.
    pub fn template_namespace(&self) -> Option<&str> {
        self.template
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
    }

    /// Top-level field names of the schema (`spec`, `status`, …); the
    /// environment ready-when expressions may reference next to the id.
    pub fn top_level_fields(&self) -> BTreeSet<String> {
        let mut fields: BTreeSet<String> =
            self.schema.properties.keys().cloned().collect();
        // Identity fields exist on every object whether or not the schema
        // declares them.
        for implied in ["apiVersion", "kind", "metadata", "spec", "status"] {
            fields.insert(implied.to_string());
        }
        fields
    }
}
