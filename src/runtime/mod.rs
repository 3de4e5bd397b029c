//! Per-reconcile runtime state

mod snapshot;

pub use snapshot::{InstanceSnapshot, ResourceState};
