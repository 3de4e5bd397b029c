//! Naming rules for groups and resource ids

use crate::error::{Error, Result};

/// Identifiers a child resource can never use. These either collide with the
/// expression environment (`spec`), with object structure (`metadata`,
/// `status`), or with vocabulary the engine reserves for itself.
pub const RESERVED_IDS: &[&str] = &[
    "apiVersion",
    "conditions",
    "dependencies",
    "dependency",
    "externalRef",
    "group",
    "instance",
    "kind",
    "metadata",
    "name",
    "namespace",
    "object",
    "resource",
    "resourcegroup",
    "resources",
    "self",
    "spec",
    "state",
    "status",
];

/// Composite kind names are UpperCamelCase.
pub fn validate_kind_name(kind: &str) -> Result<()> {
    let mut chars = kind.chars();
    let valid = match chars.next() {
        Some(first) => first.is_ascii_uppercase() && chars.all(|c| c.is_ascii_alphanumeric()),
        None => false,
    };
    if !valid {
        return Err(Error::Validation(format!(
            "kind {kind:?} must be UpperCamelCase"
        )));
    }
    Ok(())
}

/// Child ids are lowerCamelCase and must not be reserved.
pub fn validate_resource_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let valid = match chars.next() {
        Some(first) => first.is_ascii_lowercase() && chars.all(|c| c.is_ascii_alphanumeric()),
        None => false,
    };
    if !valid {
        return Err(Error::Validation(format!(
            "resource id {id:?} must be lowerCamelCase"
        )));
    }
    if RESERVED_IDS.contains(&id) {
        return Err(Error::Validation(format!("resource id {id:?} is reserved")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert!(validate_kind_name("Net").is_ok());
        assert!(validate_kind_name("WebApplication2").is_ok());
        assert!(validate_kind_name("net").is_err());
        assert!(validate_kind_name("Web-App").is_err());
        assert!(validate_kind_name("").is_err());
    }

    #[test]
    fn test_resource_ids() {
        assert!(validate_resource_id("vpc").is_ok());
        assert!(validate_resource_id("subnetAz1").is_ok());
        assert!(validate_resource_id("Vpc").is_err());
        assert!(validate_resource_id("my-vpc").is_err());
        assert!(validate_resource_id("").is_err());
    }

    #[test]
    fn test_reserved_ids_rejected() {
        for reserved in ["spec", "status", "metadata", "instance", "resource"] {
            assert!(
                validate_resource_id(reserved).is_err(),
                "{reserved} must be rejected"
            );
        }
    }
}
