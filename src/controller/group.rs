//! Group definition controller
//!
//! Watches `ResourceGroup` objects through a conventional single-kind
//! watcher. Every observed revision runs the build pipeline; a successful
//! build publishes the composite CRD and registers an instance reconciler
//! with the dynamic controller. Failures are classified per stage and
//! projected into the definition's status conditions.

use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::concurrency::CancelToken;
use crate::config::EngineConfig;
use crate::controller::DynamicController;
use crate::error::{Error, Result};
use crate::expr::ExpressionEngine;
use crate::group::{definition_gvk, GroupBuilder, GroupDefinition, RuntimeGroup};
use crate::meta::{GroupVersionKind, Labeler, ResourceKey, GROUP_FINALIZER};
use crate::object::DynamicObject;
use crate::reconciler::conditions::{
    merge_conditions, Condition, CONDITION_CRD_SYNCED, CONDITION_GRAPH_VERIFIED,
    CONDITION_RECONCILER_READY,
};
use crate::reconciler::{existing_conditions, InstanceReconciler};
use crate::store::{ObjectStore, SchemaRegistry, WatchEvent};

/// Watches group definitions and manages the lifecycle of built groups.
pub struct GroupController {
    store: Arc<dyn ObjectStore>,
    registry: Arc<dyn SchemaRegistry>,
    engine: Arc<ExpressionEngine>,
    builder: GroupBuilder,
    dynamic: Arc<DynamicController>,
    config: EngineConfig,
    /// Built groups by definition key, so deletion knows what to unwind
    groups: DashMap<String, Arc<RuntimeGroup>>,
}

impl GroupController {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn SchemaRegistry>,
        dynamic: Arc<DynamicController>,
        config: EngineConfig,
    ) -> Self {
        let engine = Arc::new(ExpressionEngine::new());
        let builder = GroupBuilder::new(Arc::clone(&registry), Arc::clone(&engine));
        Self {
            store,
            registry,
            engine,
            builder,
            dynamic,
            config,
            groups: DashMap::new(),
        }
    }

    /// Watch definitions until `ctx` is cancelled.
    pub async fn run(&self, ctx: CancelToken) -> Result<()> {
        let gvk = definition_gvk();
        // Subscribe before the initial list so no revision slips between.
        let mut stream = self.store.watch(&gvk).await?;

        match self.store.list(&gvk, None).await {
            Ok(definitions) => {
                for object in definitions {
                    self.observe(&ctx, &object).await;
                }
            }
            Err(err) => return Err(err.into()),
        }

        loop {
            tokio::select! {
                _ = ctx.cancelled() => return Ok(()),
                event = stream.next() => match event {
                    Some(WatchEvent::Added(object)) => self.observe(&ctx, &object).await,
                    Some(WatchEvent::Modified { old, new }) => {
                        // Status patches and finalizer writes keep the
                        // generation; reacting to them would loop on our own
                        // updates. Deletion marks must pass through.
                        let changed = match &old {
                            Some(old) => old.generation() != new.generation(),
                            None => true,
                        };
                        if changed || new.is_deleting() {
                            self.observe(&ctx, &new).await;
                        }
                    }
                    Some(WatchEvent::Deleted(object)) => self.teardown(&object).await,
                    None => {
                        return Err(Error::Controller(
                            "group definition watch ended unexpectedly".to_string(),
                        ));
                    }
                },
            }
        }
    }

    /// Spawn [`Self::run`] on its own task.
    pub fn spawn(self: Arc<Self>, ctx: CancelToken) -> JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run(ctx).await })
    }

    async fn observe(&self, ctx: &CancelToken, object: &DynamicObject) {
        if object.is_deleting() {
            self.teardown(object).await;
            return;
        }
        if let Err(err) = self.apply(ctx, object).await {
            error!(
                definition = object.name().unwrap_or_default(),
                error = %err,
                "group reconcile failed"
            );
        }
    }

    /// Build a definition revision and, on success, publish its CRD and
    /// start serving its composite kind.
    async fn apply(&self, ctx: &CancelToken, object: &DynamicObject) -> Result<()> {
        let definition = GroupDefinition::from_object(object)?;
        let key = object.key()?;
        self.ensure_finalizer(object).await?;

        let group = match self.builder.build(definition).await {
            Ok(group) => Arc::new(group),
            Err(err) => {
                let err = Error::graph(err);
                self.patch_failure(object, &key, &err).await;
                return Err(err);
            }
        };

        if let Err(err) = self.registry.ensure_crd(group.instance_crd.clone()).await {
            let err = Error::crd(err);
            self.patch_failure(object, &key, &err).await;
            return Err(err);
        }

        // Registration is idempotent, so a re-built revision must bounce the
        // served kind to swap in the reconciler bound to the new group.
        let previous = self
            .groups
            .get(&key.to_string())
            .map(|entry| entry.instance_gvk());
        if let Some(previous_gvk) = previous {
            if let Err(err) = self.dynamic.stop_serving_gvk(&previous_gvk).await {
                warn!(kind = %previous_gvk, error = %err, "failed to stop stale reconciler");
            }
        }

        let reconciler = Arc::new(InstanceReconciler::new(
            Arc::clone(&group),
            Arc::clone(&self.store),
            Arc::clone(&self.engine),
            Labeler::new(
                &self.config.identity.pod_id,
                &self.config.identity.engine_version,
            ),
            self.config.controller.clone(),
        ));
        if let Err(err) = self
            .dynamic
            .start_serving_gvk(ctx, group.instance_gvk(), reconciler)
            .await
        {
            let err = Error::micro_controller(err);
            self.patch_failure(object, &key, &err).await;
            return Err(err);
        }

        self.groups
            .insert(key.to_string(), Arc::clone(&group));
        self.patch_active(object, &key, &group).await;
        info!(
            definition = %key,
            kind = %group.instance_gvk().kind,
            "group active"
        );
        Ok(())
    }

    /// Unwind one definition: stop serving, unpublish, drop the finalizer.
    async fn teardown(&self, object: &DynamicObject) {
        let key = match object.key() {
            Ok(key) => key,
            Err(_) => return,
        };

        let gvk = match self.groups.remove(&key.to_string()) {
            Some((_, group)) => Some(group.instance_gvk()),
            None => definition_kind_of(object),
        };

        if let Some(gvk) = gvk {
            if let Err(err) = self.dynamic.stop_serving_gvk(&gvk).await {
                warn!(kind = %gvk, error = %err, "failed to stop serving");
            }
            let crd_name = format!("{}.{}", crate::meta::pluralize(&gvk.kind), gvk.group);
            if let Err(err) = self.registry.delete_crd(&crd_name).await {
                warn!(crd = %crd_name, error = %err, "failed to unpublish CRD");
            }
        }

        let mut object = object.clone();
        if object.remove_finalizer(GROUP_FINALIZER) {
            if let Err(err) = self.store.update(&definition_gvk(), object).await {
                if !err.is_not_found() {
                    warn!(definition = %key, error = %err, "failed to release finalizer");
                }
            }
        }
        info!(definition = %key, "group removed");
    }

    async fn ensure_finalizer(&self, object: &DynamicObject) -> Result<()> {
        let mut object = object.clone();
        if object.add_finalizer(GROUP_FINALIZER) {
            self.store.update(&definition_gvk(), object).await?;
        }
        Ok(())
    }

    /// Project a successful build into the definition status.
    async fn patch_active(&self, object: &DynamicObject, key: &ResourceKey, group: &RuntimeGroup) {
        let resources: Vec<Value> = group
            .resources_in_order()
            .map(|resource| {
                json!({
                    "name": resource.id,
                    "dependencies": resource
                        .dependencies
                        .iter()
                        .map(|dep| json!({ "name": dep }))
                        .collect::<Vec<Value>>(),
                })
            })
            .collect();

        let mut conditions = existing_conditions(object);
        merge_conditions(
            &mut conditions,
            vec![
                Condition::true_(CONDITION_GRAPH_VERIFIED, "Verified"),
                Condition::true_(CONDITION_CRD_SYNCED, "Published"),
                Condition::true_(CONDITION_RECONCILER_READY, "Serving"),
            ],
        );

        let status = json!({
            "state": "Active",
            "topologicalOrder": group.topological_order(),
            "resources": resources,
            "conditions": conditions,
        });
        self.patch_definition_status(key, status).await;
    }

    /// Project a failed build: the failing stage's condition goes false, the
    /// stages behind it stay true, the stages after become unknown.
    async fn patch_failure(&self, object: &DynamicObject, key: &ResourceKey, err: &Error) {
        let message = err.to_string();
        let updates = match err {
            Error::Graph(_) => vec![
                Condition::false_(CONDITION_GRAPH_VERIFIED, "GraphError", &message),
                Condition::unknown(CONDITION_CRD_SYNCED, "BuildFailed"),
                Condition::unknown(CONDITION_RECONCILER_READY, "BuildFailed"),
            ],
            Error::Crd(_) => vec![
                Condition::true_(CONDITION_GRAPH_VERIFIED, "Verified"),
                Condition::false_(CONDITION_CRD_SYNCED, "CRDError", &message),
                Condition::unknown(CONDITION_RECONCILER_READY, "PublishFailed"),
            ],
            _ => vec![
                Condition::true_(CONDITION_GRAPH_VERIFIED, "Verified"),
                Condition::true_(CONDITION_CRD_SYNCED, "Published"),
                Condition::false_(
                    CONDITION_RECONCILER_READY,
                    "MicroControllerError",
                    &message,
                ),
            ],
        };
        let mut conditions = existing_conditions(object);
        merge_conditions(&mut conditions, updates);

        let status = json!({
            "state": "Inactive",
            "conditions": conditions,
        });
        self.patch_definition_status(key, status).await;
    }

    async fn patch_definition_status(&self, key: &ResourceKey, status: Value) {
        if let Err(err) = self
            .store
            .patch_status(&definition_gvk(), key, status)
            .await
        {
            if !err.is_not_found() {
                warn!(definition = %key, error = %err, "definition status patch failed");
            }
        }
    }
}

/// Derive the composite kind from the definition spec alone, for teardown of
/// definitions that never built successfully in this process.
fn definition_kind_of(object: &DynamicObject) -> Option<GroupVersionKind> {
    GroupDefinition::from_object(object)
        .ok()
        .map(|definition| definition.instance_gvk())
}
