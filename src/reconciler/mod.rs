//! Instance reconciliation
//!
//! One [`InstanceReconciler`] serves one built group. Each reconcile pass
//! constructs a fresh snapshot, walks the children in topological order
//! (create, observe, gate on readiness), projects status, and on deletion
//! tears the children down in reverse creation order before releasing the
//! instance finalizer.

pub mod conditions;

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::controller::Handler;
use crate::error::{Error, Result};
use crate::expr::ExpressionEngine;
use crate::group::{Resource, RuntimeGroup};
use crate::meta::{instance_finalizer, Labeler, ResourceKey};
use crate::object::DynamicObject;
use crate::reconciler::conditions::{
    merge_conditions, Condition, InstanceState, CONDITION_ALL_RESOURCES_SYNCED,
    CONDITION_RESOURCE_SYNCED,
};
use crate::runtime::{InstanceSnapshot, ResourceState};
use crate::store::ObjectStore;

/// Reconciles instances of one composite kind.
pub struct InstanceReconciler {
    group: Arc<RuntimeGroup>,
    store: Arc<dyn ObjectStore>,
    engine: Arc<ExpressionEngine>,
    labeler: Labeler,
    config: ControllerConfig,
}

impl InstanceReconciler {
    pub fn new(
        group: Arc<RuntimeGroup>,
        store: Arc<dyn ObjectStore>,
        engine: Arc<ExpressionEngine>,
        labeler: Labeler,
        config: ControllerConfig,
    ) -> Self {
        let labeler = labeler.for_group(group.definition.owner_meta());
        Self {
            group,
            store,
            engine,
            labeler,
            config,
        }
    }

    /// One reconcile pass for the instance at `key`.
    pub async fn reconcile(&self, key: &ResourceKey) -> Result<()> {
        let gvk = self.group.instance_gvk();
        let instance = match self.store.get(&gvk, key).await {
            Ok(instance) => instance,
            // Absence is success: the instance is reconciled to not exist.
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        let mut snapshot = InstanceSnapshot::new(
            Arc::clone(&self.group),
            Arc::clone(&self.engine),
            instance,
        );
        let deleting = snapshot.instance().is_deleting();

        let result = match snapshot.resolve_static() {
            Ok(()) if deleting => self.reconcile_deletion(&mut snapshot).await,
            Ok(()) => self.reconcile_children(&mut snapshot).await,
            Err(err) => Err(err),
        };

        if deleting {
            // A finished teardown has nothing left to patch status on.
            if result.is_err() {
                self.patch_status(&mut snapshot, key, InstanceState::Deleting, &result)
                    .await;
            }
            return result;
        }

        let state = match &result {
            Ok(()) => InstanceState::Active,
            Err(err) if err.is_requeue() => InstanceState::InProgress,
            Err(_) => InstanceState::Error,
        };
        self.patch_status(&mut snapshot, key, state, &result).await;
        result
    }

    /// The forward pass: finalizer and labels, then every child in order.
    async fn reconcile_children(&self, snapshot: &mut InstanceSnapshot) -> Result<()> {
        self.ensure_instance_metadata(snapshot).await?;

        for id in snapshot.topological_order().to_vec() {
            if !snapshot.want_to_create(&id)? {
                debug!(%id, "skipped by includeWhen");
                continue;
            }

            snapshot.synchronize()?;
            if snapshot.state(&id) == Some(ResourceState::WaitingOnDependencies) {
                return Err(Error::requeue_after(
                    format!("{id} is waiting on dependencies"),
                    self.config.default_requeue_duration,
                ));
            }

            let resource = match snapshot.resource(&id) {
                Some(resource) => resource.clone(),
                None => continue,
            };
            let desired = snapshot.desired(&id)?;
            let child_key = self.child_key(snapshot, &resource, &desired)?;

            match self.store.get(&resource.gvk, &child_key).await {
                Err(err) if err.is_not_found() => {
                    self.create_child(snapshot, &resource, desired, &child_key)
                        .await?;
                    return Err(Error::requeue_after(
                        format!("created {id}, awaiting observation"),
                        self.config.default_requeue_duration,
                    ));
                }
                Err(err) => return Err(err.into()),
                Ok(observed) => {
                    snapshot.set_observed(&id, observed);
                    if !snapshot.is_resource_ready(&id)? {
                        debug!(%id, "not ready yet");
                        return Err(Error::requeue_after(
                            format!("{id} is not ready"),
                            self.config.default_requeue_duration,
                        ));
                    }
                    self.update_child(&resource, &id).await?;
                }
            }
        }

        Ok(())
    }

    /// Destination key for a child: its own namespace if templated, else the
    /// instance's, else the configured default. Cluster-scoped children have
    /// no namespace at all.
    fn child_key(
        &self,
        snapshot: &InstanceSnapshot,
        resource: &Resource,
        desired: &DynamicObject,
    ) -> Result<ResourceKey> {
        let name = desired.name().ok_or_else(|| {
            Error::Validation(format!(
                "resolved template of {:?} has no metadata.name",
                resource.id
            ))
        })?;
        let namespace = if resource.namespaced {
            let namespace = desired
                .namespace()
                .or_else(|| snapshot.instance().namespace())
                .unwrap_or(&self.config.default_namespace);
            Some(namespace.to_string())
        } else {
            None
        };
        Ok(ResourceKey {
            namespace,
            name: name.to_string(),
        })
    }

    async fn create_child(
        &self,
        snapshot: &mut InstanceSnapshot,
        resource: &Resource,
        mut desired: DynamicObject,
        key: &ResourceKey,
    ) -> Result<()> {
        if let Some(namespace) = &key.namespace {
            desired.set_namespace(namespace);
        }
        let labels = self
            .labeler
            .child_labels(&snapshot.instance().owner_meta());
        desired.apply_labels(&labels);

        let created = self.store.create(&resource.gvk, desired).await?;
        info!(
            id = %resource.id,
            kind = %resource.gvk.kind,
            key = %key,
            "created child resource"
        );
        snapshot.set_observed(&resource.id, created);
        Ok(())
    }

    /// Update hook for children that already exist. No drift correction is
    /// computed; existence is the only reconciled property.
    // TODO: diff desired against observed and patch drifted children.
    async fn update_child(&self, _resource: &Resource, _id: &str) -> Result<()> {
        Ok(())
    }

    /// Make sure the instance carries its uid-qualified finalizer and the
    /// engine labels before any child is created.
    async fn ensure_instance_metadata(&self, snapshot: &mut InstanceSnapshot) -> Result<()> {
        let mut instance = snapshot.instance().clone();
        let uid = instance
            .uid()
            .ok_or_else(|| Error::Validation("instance has no uid".to_string()))?
            .to_string();

        let finalizer_added = instance.add_finalizer(&instance_finalizer(&uid));
        let labels = self.labeler.child_labels(&instance.owner_meta());
        let labels_changed = instance.apply_labels(&labels);

        if finalizer_added || labels_changed {
            self.store
                .update(&self.group.instance_gvk(), instance)
                .await?;
        }
        Ok(())
    }

    /// Deletion: catalogue what exists by walking forward, then delete in
    /// reverse creation order. The finalizer is released only when every
    /// catalogued child is gone.
    async fn reconcile_deletion(&self, snapshot: &mut InstanceSnapshot) -> Result<()> {
        let mut catalogue: Vec<(String, ResourceKey)> = Vec::new();

        for id in snapshot.topological_order().to_vec() {
            snapshot.synchronize()?;
            if snapshot.state(&id) == Some(ResourceState::WaitingOnDependencies) {
                // Unresolvable means nothing past this point was created.
                break;
            }
            let resource = match snapshot.resource(&id) {
                Some(resource) => resource.clone(),
                None => continue,
            };
            let desired = snapshot.desired(&id)?;
            let key = self.child_key(snapshot, &resource, &desired)?;

            match self.store.get(&resource.gvk, &key).await {
                Ok(observed) => {
                    snapshot.set_observed(&id, observed);
                    catalogue.push((id.clone(), key));
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => return Err(err.into()),
            }
        }

        for (id, key) in catalogue.iter().rev() {
            let resource = match snapshot.resource(id) {
                Some(resource) => resource.clone(),
                None => continue,
            };
            match self.store.delete(&resource.gvk, key).await {
                Ok(()) => {
                    info!(id = %id, key = %key, "deleting child resource");
                    return Err(Error::requeue_after(
                        format!("deleting {id}"),
                        self.config.default_requeue_duration,
                    ));
                }
                Err(err) if err.is_not_found() => {
                    debug!(id = %id, "child already gone");
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        // Everything is gone; release the instance.
        let mut instance = snapshot.instance().clone();
        if let Some(uid) = instance.uid().map(str::to_string) {
            if instance.remove_finalizer(&instance_finalizer(&uid)) {
                self.store
                    .update(&self.group.instance_gvk(), instance)
                    .await?;
            }
        }
        info!(instance = %snapshot.instance().name().unwrap_or_default(), "instance torn down");
        Ok(())
    }

    /// Project status and patch it through the status subresource. Patch
    /// failures are logged, not propagated, so they never mask the pass
    /// outcome.
    async fn patch_status(
        &self,
        snapshot: &mut InstanceSnapshot,
        key: &ResourceKey,
        state: InstanceState,
        result: &Result<()>,
    ) {
        let mut status = match snapshot.project_status() {
            Ok(status) => status.clone(),
            Err(err) => {
                warn!(error = %err, "status projection failed");
                serde_json::Map::new()
            }
        };

        status.insert("state".to_string(), json!(state.as_str()));
        let condition = match result {
            Ok(()) => Condition::true_(CONDITION_ALL_RESOURCES_SYNCED, "Settled"),
            Err(err) if err.is_requeue() => Condition::false_(
                CONDITION_ALL_RESOURCES_SYNCED,
                "InProgress",
                err.to_string(),
            ),
            Err(err) => {
                Condition::false_(CONDITION_RESOURCE_SYNCED, "ReconcileFailed", err.to_string())
            }
        };
        let mut conditions = existing_conditions(snapshot.instance());
        merge_conditions(&mut conditions, vec![condition]);
        status.insert("conditions".to_string(), json!(conditions));

        if let Err(err) = self
            .store
            .patch_status(&self.group.instance_gvk(), key, Value::Object(status))
            .await
        {
            if !err.is_not_found() {
                warn!(key = %key, error = %err, "status patch failed");
            }
        }
    }
}

/// Conditions already recorded on an object's status; malformed entries
/// reset the list rather than failing a status write.
pub(crate) fn existing_conditions(object: &DynamicObject) -> Vec<Condition> {
    object
        .status()
        .get("conditions")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Handler for InstanceReconciler {
    async fn handle(&self, key: ResourceKey) -> Result<()> {
        self.reconcile(&key).await
    }
}
