//! Resource groups
//!
//! A group definition declares a composite kind: a spec schema in type
//! shorthand, a status template, and a list of child resource templates wired
//! together by expressions. The [`builder`] compiles one definition revision
//! into an immutable [`RuntimeGroup`] that the instance reconciler executes.

mod builder;
mod definition;
mod naming;
mod resource;
mod runtime;

pub use builder::GroupBuilder;
pub(crate) use builder::ready_bindings;
pub use definition::{
    definition_gvk, ChildTemplate, DefinitionMeta, GroupDefinition, GROUP_DEFINITION_GROUP,
    GROUP_DEFINITION_KIND, GROUP_DEFINITION_VERSION,
};
pub use naming::{validate_kind_name, validate_resource_id, RESERVED_IDS};
pub use resource::Resource;
pub use runtime::RuntimeGroup;
