//! Dependency classification

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::expr::Program;

/// The identifier every expression may reference without creating a
/// dependency: the composite instance's own spec.
pub const SPEC_IDENT: &str = "spec";

/// Classify which sibling resources a compiled expression depends on.
///
/// Returns the referenced ids (sorted, de-duplicated) and whether the
/// expression is static. Static means the only free identifier is `spec`.
/// Any identifier that is neither `spec` nor a known resource id is an
/// [`Error::InvalidReference`].
pub fn classify_dependencies(
    program: &Program,
    known_ids: &BTreeSet<String>,
) -> Result<(Vec<String>, bool)> {
    let mut dependencies = Vec::new();

    for identifier in program.identifiers() {
        if identifier == SPEC_IDENT {
            continue;
        }
        if !known_ids.contains(identifier) {
            return Err(Error::InvalidReference(format!(
                "expression {:?} references unknown identifier {identifier:?}",
                program.source()
            )));
        }
        dependencies.push(identifier.clone());
    }

    let is_static = dependencies.is_empty();
    Ok((dependencies, is_static))
}
