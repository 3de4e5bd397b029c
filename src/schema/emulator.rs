//! Resource emulation
//!
//! The builder type-checks expressions by dry-running them against plausible
//! objects. The emulator produces such an object from a structural schema:
//! every field populated, recursively, with representative values.

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::meta::GroupVersionKind;
use crate::object::DynamicObject;
use crate::schema::{SchemaType, StructuralSchema};

const STRING_PLACEHOLDER: &str = "emulated-value";
const INTEGER_PLACEHOLDER: i64 = 10;
const NUMBER_PLACEHOLDER: f64 = 1.5;

/// Produce a fully populated dummy object of `gvk` from `schema`.
///
/// The result carries the target apiVersion/kind and a plausible metadata
/// block, and is guaranteed to validate against `schema`.
pub fn emulate(schema: &StructuralSchema, gvk: &GroupVersionKind) -> Result<DynamicObject> {
    let mut body = emulate_node(schema);

    if let Value::Object(map) = &mut body {
        map.insert("apiVersion".to_string(), json!(gvk.api_version()));
        map.insert("kind".to_string(), json!(gvk.kind));

        let name = format!("emulated-{}", gvk.kind.to_lowercase());
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("name".to_string(), json!(name));
            metadata.insert("namespace".to_string(), json!("default"));
            metadata.insert("uid".to_string(), json!(format!("{name}-uid")));
        }
    }

    DynamicObject::new(body)
}

fn emulate_node(schema: &StructuralSchema) -> Value {
    if schema.preserve_unknown && schema.schema_type.is_none() {
        return Value::Object(Map::new());
    }

    match schema.schema_type {
        Some(SchemaType::String) => match &schema.default {
            Some(default) => default.clone(),
            None => json!(STRING_PLACEHOLDER),
        },
        Some(SchemaType::Integer) => schema
            .default
            .clone()
            .unwrap_or_else(|| json!(INTEGER_PLACEHOLDER)),
        Some(SchemaType::Number) => schema
            .default
            .clone()
            .unwrap_or_else(|| json!(NUMBER_PLACEHOLDER)),
        Some(SchemaType::Boolean) => schema.default.clone().unwrap_or(Value::Bool(true)),
        Some(SchemaType::Array) => {
            let element = schema
                .items
                .as_deref()
                .map(emulate_node)
                .unwrap_or(Value::Null);
            Value::Array(vec![element])
        }
        Some(SchemaType::Object) | None => {
            let mut map = Map::new();
            for (key, child) in &schema.properties {
                map.insert(key.clone(), emulate_node(child));
            }
            // A pure map node gets one representative entry.
            if schema.properties.is_empty() {
                if let Some(values) = &schema.additional_properties {
                    map.insert("key".to_string(), emulate_node(values));
                }
            }
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::transform_shorthand;
    use serde_json::json;

    fn gvk() -> GroupVersionKind {
        GroupVersionKind::new("ec2.services.com", "v1", "Vpc")
    }

    #[test]
    fn test_emulated_object_has_identity() {
        let schema = transform_shorthand(&json!({ "spec": { "cidrBlock": "string" } })).unwrap();
        let obj = emulate(&schema, &gvk()).unwrap();

        assert_eq!(obj.api_version(), Some("ec2.services.com/v1"));
        assert_eq!(obj.kind(), Some("Vpc"));
        assert_eq!(obj.name(), Some("emulated-vpc"));
        assert!(obj.uid().is_some());
    }

    #[test]
    fn test_every_field_is_populated() {
        let schema = transform_shorthand(&json!({
            "spec": {
                "cidrBlock": "string | required=true",
                "maxSize": "integer",
                "tags": "map[string]string",
                "zones": "[]string",
                "nested": { "enabled": "boolean" },
            },
        }))
        .unwrap();

        let obj = emulate(&schema, &gvk()).unwrap();
        let spec = obj.spec();

        assert_eq!(spec["cidrBlock"], json!(STRING_PLACEHOLDER));
        assert_eq!(spec["maxSize"], json!(INTEGER_PLACEHOLDER));
        assert_eq!(spec["tags"]["key"], json!(STRING_PLACEHOLDER));
        assert_eq!(spec["zones"].as_array().unwrap().len(), 1);
        assert_eq!(spec["nested"]["enabled"], json!(true));
    }

    #[test]
    fn test_defaults_win_over_placeholders() {
        let schema =
            transform_shorthand(&json!({ "spec": { "region": "string | default=us-west-2" } }))
                .unwrap();
        let obj = emulate(&schema, &gvk()).unwrap();
        assert_eq!(obj.spec()["region"], json!("us-west-2"));
    }

    #[test]
    fn test_output_type_checks_against_input_schema() {
        let schema = transform_shorthand(&json!({
            "spec": {
                "name": "string | required=true",
                "sizes": "[]integer",
                "flags": "map[string]boolean",
            },
            "status": { "state": "string" },
        }))
        .unwrap();

        let obj = emulate(&schema, &gvk()).unwrap();
        // The identity fields are additions on top of the schema; validate the
        // declared subtrees.
        schema.properties["spec"]
            .validate(&obj.spec())
            .unwrap();
        schema.properties["status"]
            .validate(&obj.status())
            .unwrap();
    }
}
