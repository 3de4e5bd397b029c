//! Structural schemas and everything that produces them
//!
//! The engine deals with three schema sources: the user-authored type
//! shorthand (compiled by [`shorthand`]), schemas served by the registry
//! collaborator, and schemas inferred from dry-run values ([`infer`]). The
//! [`emulator`] goes the other way and produces a representative object from
//! a schema.

mod emulator;
mod infer;
mod shorthand;
mod structural;

pub use emulator::emulate;
pub use infer::infer_schema;
pub use shorthand::transform_shorthand;
pub use structural::{SchemaType, StructuralSchema};
