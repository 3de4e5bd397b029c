//! Template inspection
//!
//! Child templates and status templates are plain objects whose string leaves
//! may embed `${…}` expressions. This module finds those leaves, records
//! where they live ([`FieldPath`]), and classifies what they depend on.

mod classify;
mod extract;
mod field;
mod path;

pub use classify::classify_dependencies;
pub use extract::{
    extract_schemaful, extract_schemaless, find_fragments, render_interpolated, Fragment,
};
pub use field::{Field, FieldKind};
pub use path::FieldPath;
