//! Instance snapshots
//!
//! A snapshot is the mutable working state of one reconcile pass: the frozen
//! [`RuntimeGroup`] instantiated against one observed composite instance.
//! Created at the start of the pass, discarded at the end, never shared.
//!
//! Resolved values live in one cache keyed by expression source text; fields
//! refer to cache entries through that key, so each distinct expression is
//! evaluated at most once per pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{Error, Result};
use crate::expr::{is_bool, ExpressionEngine};
use crate::group::{Resource, RuntimeGroup};
use crate::object::DynamicObject;
use crate::template::{render_interpolated, Field, FieldKind};

/// Where one resource stands within the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Every expression in the resource's body is resolved
    Resolved,
    /// Some dynamic expression still waits on an unmaterialized dependency
    WaitingOnDependencies,
    /// The object exists but its ready-when gates are not yet all true
    WaitingOnReadiness,
    /// An include-when gate evaluated to false; the resource is skipped
    IgnoredByConditions,
}

#[derive(Debug, Clone)]
struct CachedExpression {
    resolved: bool,
    value: Value,
}

/// Mutable per-reconcile state derived from a [`RuntimeGroup`].
pub struct InstanceSnapshot {
    group: Arc<RuntimeGroup>,
    engine: Arc<ExpressionEngine>,
    instance: DynamicObject,
    states: BTreeMap<String, ResourceState>,
    cache: HashMap<String, CachedExpression>,
    /// Progressively resolved desired bodies, by id
    desired: BTreeMap<String, Value>,
    /// Observed objects from the store, by id
    observed: BTreeMap<String, DynamicObject>,
    /// Projected status of the composite instance
    status: Map<String, Value>,
}

impl InstanceSnapshot {
    /// Instantiate `group` against one observed composite instance.
    pub fn new(
        group: Arc<RuntimeGroup>,
        engine: Arc<ExpressionEngine>,
        instance: DynamicObject,
    ) -> Self {
        let mut states = BTreeMap::new();
        let mut desired = BTreeMap::new();
        for id in group.resource_ids() {
            states.insert(id.clone(), ResourceState::WaitingOnDependencies);
            if let Some(resource) = group.resource(&id) {
                desired.insert(id, resource.template.clone());
            }
        }
        Self {
            group,
            engine,
            instance,
            states,
            cache: HashMap::new(),
            desired,
            observed: BTreeMap::new(),
            status: Map::new(),
        }
    }

    pub fn instance(&self) -> &DynamicObject {
        &self.instance
    }

    pub fn group(&self) -> &RuntimeGroup {
        &self.group
    }

    /// Child ids in creation order.
    pub fn topological_order(&self) -> &[String] {
        self.group.topological_order()
    }

    pub fn resource(&self, id: &str) -> Option<&Resource> {
        self.group.resource(id)
    }

    pub fn state(&self, id: &str) -> Option<ResourceState> {
        self.states.get(id).copied()
    }

    /// The resolved desired body for `id`; only meaningful once the resource
    /// reached [`ResourceState::Resolved`].
    pub fn desired(&self, id: &str) -> Result<DynamicObject> {
        let body = self
            .desired
            .get(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("no desired body for {id:?}")))?;
        DynamicObject::new(body)
    }

    /// Record the observed body of `id` after a store read or create.
    pub fn set_observed(&mut self, id: &str, object: DynamicObject) {
        self.observed.insert(id.to_string(), object);
    }

    pub fn observed(&self, id: &str) -> Option<&DynamicObject> {
        self.observed.get(id)
    }

    /// Evaluate every static expression against the instance spec and write
    /// the results into the desired bodies.
    pub fn resolve_static(&mut self) -> Result<()> {
        let bindings = self.spec_bindings();
        for id in self.group.resource_ids() {
            let resource = match self.group.resource(&id) {
                Some(resource) => resource.clone(),
                None => continue,
            };
            for field in &resource.fields {
                if field.kind == FieldKind::Static {
                    self.resolve_field(&id, field, &bindings)?;
                }
            }
            self.refresh_state(&id);
        }
        Ok(())
    }

    /// Evaluate the include-when gates of `id` against the instance spec.
    /// A false gate marks the resource [`ResourceState::IgnoredByConditions`].
    pub fn want_to_create(&mut self, id: &str) -> Result<bool> {
        let resource = self
            .group
            .resource(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown resource {id:?}")))?;
        let bindings = self.spec_bindings();

        for source in &resource.include_when {
            let value = self.eval_cached(source, &bindings)?;
            match value {
                Value::Bool(true) => continue,
                Value::Bool(false) => {
                    trace!(id, expression = %source, "resource gated off");
                    self.states
                        .insert(id.to_string(), ResourceState::IgnoredByConditions);
                    return Ok(false);
                }
                other => {
                    return Err(Error::Validation(format!(
                        "includeWhen expression {source:?} produced {other}, expected a boolean"
                    )));
                }
            }
        }
        Ok(true)
    }

    /// Re-evaluate dynamic expressions whose dependencies are all observed,
    /// writing resolved values back into the desired bodies. Expressions with
    /// unmaterialized dependencies stay unresolved and their resource remains
    /// [`ResourceState::WaitingOnDependencies`].
    pub fn synchronize(&mut self) -> Result<()> {
        let bindings = self.dynamic_bindings();
        for id in self.group.topological_order().to_vec() {
            if self.states.get(&id) == Some(&ResourceState::IgnoredByConditions) {
                continue;
            }
            let resource = match self.group.resource(&id) {
                Some(resource) => resource.clone(),
                None => continue,
            };
            for field in &resource.fields {
                if field.kind != FieldKind::Dynamic {
                    continue;
                }
                let materialized = field
                    .dependencies
                    .iter()
                    .all(|dep| self.observed.contains_key(dep));
                if !materialized {
                    continue;
                }
                self.resolve_field(&id, field, &bindings)?;
            }
            self.refresh_state(&id);
        }

        // The instance's status fields resolve through the same cache; they
        // have no desired body to write back into, projection reads the
        // cache later.
        let status_fields = self.group.instance.fields.clone();
        for field in &status_fields {
            let materialized = field
                .dependencies
                .iter()
                .all(|dep| self.observed.contains_key(dep));
            if !materialized {
                continue;
            }
            for source in &field.expressions {
                self.eval_cached(source, &bindings)?;
            }
        }
        Ok(())
    }

    /// Evaluate the ready-when gates of `id` against its observed body.
    ///
    /// A gate probing a field the object has not reported yet counts as not
    /// ready rather than an error.
    pub fn is_resource_ready(&mut self, id: &str) -> Result<bool> {
        let resource = self
            .group
            .resource(id)
            .cloned()
            .ok_or_else(|| Error::Internal(format!("unknown resource {id:?}")))?;
        let observed = self
            .observed
            .get(id)
            .ok_or_else(|| Error::Internal(format!("{id:?} has no observed body")))?;

        let bindings = crate::group::ready_bindings(&resource, observed);
        for source in &resource.ready_when {
            let program = self.engine.parse(source)?;
            let value = match self.engine.eval(&program, &bindings) {
                Ok(value) => value,
                Err(Error::ExpressionEval { missing: true, .. }) => {
                    self.states
                        .insert(id.to_string(), ResourceState::WaitingOnReadiness);
                    return Ok(false);
                }
                Err(err) => return Err(err),
            };
            if !is_bool(&value) {
                return Err(Error::Validation(format!(
                    "readyWhen expression {source:?} produced a non-boolean"
                )));
            }
            if value == Value::Bool(false) {
                self.states
                    .insert(id.to_string(), ResourceState::WaitingOnReadiness);
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Project every fully resolved status field into the status map.
    pub fn project_status(&mut self) -> Result<&Map<String, Value>> {
        let fields: Vec<Field> = self.group.instance.fields.clone();
        let template = self.group.instance.template.clone();
        let mut projected = Value::Object(self.status.clone());

        for field in &fields {
            let mut resolved = Vec::with_capacity(field.expressions.len());
            let mut complete = true;
            for source in &field.expressions {
                match self.cache.get(source) {
                    Some(entry) if entry.resolved => resolved.push(entry.value.clone()),
                    _ => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }

            let value = if field.standalone {
                resolved.swap_remove(0)
            } else {
                let leaf = field
                    .path
                    .get(&template)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::Internal(format!("status leaf {} vanished", field.path))
                    })?;
                Value::String(render_interpolated(leaf, &resolved)?)
            };
            field.path.set(&mut projected, value)?;
        }

        self.status = match projected {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Ok(&self.status)
    }

    /// The projected status so far.
    pub fn status(&self) -> &Map<String, Value> {
        &self.status
    }

    /// Evaluate all expressions of one field and write the result back into
    /// the desired body. Standalone fields keep the native value type.
    fn resolve_field(
        &mut self,
        id: &str,
        field: &Field,
        bindings: &Map<String, Value>,
    ) -> Result<()> {
        let mut resolved = Vec::with_capacity(field.expressions.len());
        for source in &field.expressions {
            resolved.push(self.eval_cached(source, bindings)?);
        }

        let value = if field.standalone {
            resolved.swap_remove(0)
        } else {
            let resource = self
                .group
                .resource(id)
                .ok_or_else(|| Error::Internal(format!("unknown resource {id:?}")))?;
            // Render from the pristine template leaf, not the (possibly
            // already rewritten) desired body.
            let leaf = field
                .path
                .get(&resource.template)
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    Error::Internal(format!("template leaf {} vanished", field.path))
                })?;
            Value::String(render_interpolated(leaf, &resolved)?)
        };

        let body = self
            .desired
            .get_mut(id)
            .ok_or_else(|| Error::Internal(format!("no desired body for {id:?}")))?;
        field.path.set(body, value)?;
        Ok(())
    }

    /// Evaluate through the shared cache; each expression runs at most once
    /// per pass.
    fn eval_cached(&mut self, source: &str, bindings: &Map<String, Value>) -> Result<Value> {
        if let Some(entry) = self.cache.get(source) {
            if entry.resolved {
                return Ok(entry.value.clone());
            }
        }
        let program = self.engine.parse(source)?;
        let value = self.engine.eval(&program, bindings)?;
        self.cache.insert(
            source.to_string(),
            CachedExpression {
                resolved: true,
                value: value.clone(),
            },
        );
        Ok(value)
    }

    /// A resource is resolved once every expression of every field has a
    /// cache entry.
    fn refresh_state(&mut self, id: &str) {
        if self.states.get(id) == Some(&ResourceState::IgnoredByConditions) {
            return;
        }
        let resource = match self.group.resource(id) {
            Some(resource) => resource,
            None => return,
        };
        let all_resolved = resource.fields.iter().all(|field| {
            field
                .expressions
                .iter()
                .all(|source| self.cache.get(source).is_some_and(|e| e.resolved))
        });
        let state = if all_resolved {
            ResourceState::Resolved
        } else {
            ResourceState::WaitingOnDependencies
        };
        self.states.insert(id.to_string(), state);
    }

    fn spec_bindings(&self) -> Map<String, Value> {
        let mut bindings = Map::new();
        bindings.insert("spec".to_string(), self.instance.spec());
        bindings
    }

    /// Bindings for dynamic expressions: the instance spec plus every
    /// observed sibling.
    fn dynamic_bindings(&self) -> Map<String, Value> {
        let mut bindings = self.spec_bindings();
        for (id, object) in &self.observed {
            bindings.insert(id.clone(), object.as_value().clone());
        }
        bindings
    }
}
