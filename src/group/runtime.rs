//! Frozen runtime groups

use std::collections::BTreeMap;

use crate::graph::DependencyGraph;
use crate::group::{GroupDefinition, Resource};
use crate::meta::GroupVersionKind;
use crate::object::DynamicObject;

/// The immutable output of one successful build: everything a reconcile pass
/// needs, safe to share across workers behind an `Arc`.
#[derive(Debug)]
pub struct RuntimeGroup {
    /// The definition revision this group was built from
    pub definition: GroupDefinition,
    /// Compiled children, keyed by id
    resources: BTreeMap<String, Resource>,
    /// Creation order; deletion uses the reverse
    topological_order: Vec<String>,
    /// The dependency graph the order was derived from
    pub graph: DependencyGraph,
    /// The composite instance pseudo-resource (combined spec+status schema,
    /// status template fields)
    pub instance: Resource,
    /// The synthesized CRD published for the composite kind
    pub instance_crd: DynamicObject,
}

impl RuntimeGroup {
    pub(crate) fn new(
        definition: GroupDefinition,
        resources: BTreeMap<String, Resource>,
        topological_order: Vec<String>,
        graph: DependencyGraph,
        instance: Resource,
        instance_crd: DynamicObject,
    ) -> Self {
        Self {
            definition,
            resources,
            topological_order,
            graph,
            instance,
            instance_crd,
        }
    }

    /// The composite kind this group serves.
    pub fn instance_gvk(&self) -> GroupVersionKind {
        self.instance.gvk.clone()
    }

    /// Child ids in creation order.
    pub fn topological_order(&self) -> &[String] {
        &self.topological_order
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// All child ids, sorted.
    pub fn resource_ids(&self) -> Vec<String> {
        self.resources.keys().cloned().collect()
    }

    /// Children in creation order.
    pub fn resources_in_order(&self) -> impl Iterator<Item = &Resource> {
        self.topological_order
            .iter()
            .filter_map(|id| self.resources.get(id))
    }
}
