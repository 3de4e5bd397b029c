//! Composite resource group engine
//!
//! This crate lets platform teams publish a higher-level composite API, a
//! *resource group*, that materializes and reconciles a dependency-ordered
//! graph of lower-level resources in a cluster-like control plane:
//!
//! - Group definitions declare a new composite kind: a spec schema in a
//!   compact type shorthand, a status template, and child resource templates
//!   wired together by `${…}` expressions.
//! - The build pipeline ([`group::GroupBuilder`]) turns one definition into a
//!   validated, immutable [`group::RuntimeGroup`]: shorthand to structural
//!   schema, templates to typed resources, expressions to a dependency
//!   graph, all type-checked against emulated children.
//! - The dynamic controller ([`controller::DynamicController`]) starts and
//!   stops watches on arbitrary kinds at runtime and multiplexes their events
//!   onto one rate-limited work queue served by a worker pool.
//! - The instance reconciler ([`reconciler::InstanceReconciler`]) walks each
//!   instance's graph in topological order: create, observe, gate on
//!   readiness, project status, and tear down in reverse order on deletion.
//!
//! Transport to the control plane and the type registry are injected through
//! the [`store::ObjectStore`] and [`store::SchemaRegistry`] traits; an
//! embedded in-memory implementation ships in [`store::memory`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod concurrency;
pub mod config;
pub mod controller;
pub mod error;
pub mod expr;
pub mod graph;
pub mod group;
pub mod meta;
pub mod object;
pub mod reconciler;
pub mod runtime;
pub mod schema;
pub mod store;
pub mod template;

use std::sync::Arc;

use tracing::info;

pub use concurrency::CancelToken;
pub use config::{ControllerConfig, EngineConfig};
pub use error::{Error, Result};
pub use meta::{GroupVersionKind, ResourceKey};
pub use object::DynamicObject;

use controller::{DynamicController, GroupController};
use store::{ObjectStore, SchemaRegistry};

/// Composition root: one engine process wired to its collaborators.
pub struct Engine {
    dynamic: Arc<DynamicController>,
    groups: Arc<GroupController>,
}

impl Engine {
    /// Wire an engine against an object store and a schema registry.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        registry: Arc<dyn SchemaRegistry>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let dynamic = DynamicController::new(Arc::clone(&store), config.controller.clone());
        let groups = Arc::new(GroupController::new(
            store,
            registry,
            Arc::clone(&dynamic),
            config,
        ));
        Ok(Self { dynamic, groups })
    }

    /// The dynamic controller, for hosts that register kinds directly.
    pub fn dynamic_controller(&self) -> &Arc<DynamicController> {
        &self.dynamic
    }

    /// Run both controllers until `ctx` is cancelled.
    pub async fn run(&self, ctx: CancelToken) -> Result<()> {
        info!("engine starting");
        let group_task = Arc::clone(&self.groups).spawn(ctx.child_token());
        let result = self.dynamic.run(ctx.child_token()).await;
        let _ = group_task.await;
        info!("engine stopped");
        result
    }
}
