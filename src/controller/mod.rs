//! Controllers
//!
//! [`DynamicController`] multiplexes watches over arbitrary kinds onto one
//! rate-limited queue served by a worker pool; [`GroupController`] watches
//! group definitions and wires built groups into the dynamic controller.

mod dynamic;
mod group;
mod queue;

pub use dynamic::DynamicController;
pub use group::GroupController;
pub use queue::{WorkItem, WorkQueue};

use async_trait::async_trait;

use crate::error::Result;
use crate::meta::ResourceKey;

/// Per-kind reconcile entry point the dynamic controller dispatches to.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, key: ResourceKey) -> Result<()>;
}
