//! Type shorthand to structural schema transformation
//!
//! Group definitions author their spec schema in a compact shorthand: a nested
//! map whose leaves are strings like `string | required=true default=vpc`.
//! This module compiles that tree into a [`StructuralSchema`].

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::{SchemaType, StructuralSchema};

/// Compile a shorthand tree into a structural object schema.
///
/// Interior map nodes become `object` schemas keyed by the map's keys; string
/// leaves are parsed as `type | marker=value …`. The output is deterministic
/// and stable across runs.
pub fn transform_shorthand(shorthand: &Value) -> Result<StructuralSchema> {
    match shorthand {
        Value::Object(map) => {
            let mut properties = BTreeMap::new();
            let mut required = Vec::new();

            for (key, child) in map {
                if key.is_empty() {
                    return Err(Error::Schema("empty key in type shorthand".to_string()));
                }
                let (schema, child_required) = transform_node(key, child)?;
                if child_required {
                    required.push(key.clone());
                }
                properties.insert(key.clone(), schema);
            }

            required.sort();
            Ok(StructuralSchema::object(properties, required))
        }
        Value::Null => Ok(StructuralSchema::object(BTreeMap::new(), Vec::new())),
        other => Err(Error::Schema(format!(
            "type shorthand root must be a map, got {other}"
        ))),
    }
}

/// Returns the node's schema plus whether the parent must list it as required.
fn transform_node(key: &str, node: &Value) -> Result<(StructuralSchema, bool)> {
    match node {
        Value::Object(_) => Ok((transform_shorthand(node)?, false)),
        Value::String(leaf) => parse_leaf(key, leaf),
        other => Err(Error::Schema(format!(
            "shorthand value for {key:?} must be a map or a type string, got {other}"
        ))),
    }
}

fn parse_leaf(key: &str, leaf: &str) -> Result<(StructuralSchema, bool)> {
    let (type_part, marker_part) = match leaf.split_once('|') {
        Some((t, m)) => (t.trim(), Some(m.trim())),
        None => (leaf.trim(), None),
    };

    let mut schema = parse_type(key, type_part)?;
    let mut required = false;

    if let Some(markers) = marker_part {
        for marker in tokenize_markers(key, markers)? {
            match marker.name.as_str() {
                "required" => {
                    required = marker.value.trim() == "true";
                }
                "default" => {
                    schema.default = Some(parse_default(key, &schema, &marker)?);
                }
                "description" => {
                    schema.description = Some(marker.value.clone());
                }
                other => {
                    return Err(Error::Schema(format!(
                        "unknown marker {other:?} on field {key:?}"
                    )));
                }
            }
        }
    }

    Ok((schema, required))
}

fn parse_type(key: &str, type_str: &str) -> Result<StructuralSchema> {
    match type_str {
        "boolean" => Ok(StructuralSchema::atomic(SchemaType::Boolean)),
        "integer" => Ok(StructuralSchema::atomic(SchemaType::Integer)),
        "float" => Ok(StructuralSchema::atomic(SchemaType::Number)),
        "string" => Ok(StructuralSchema::atomic(SchemaType::String)),
        _ => {
            if let Some(element) = type_str.strip_prefix("[]") {
                return Ok(StructuralSchema::array(parse_type(key, element)?));
            }
            if let Some(rest) = type_str.strip_prefix("map[") {
                let close = rest.find(']').ok_or_else(|| {
                    Error::Schema(format!("unclosed bracket in type {type_str:?} of {key:?}"))
                })?;
                let key_type = &rest[..close];
                if key_type != "string" {
                    return Err(Error::Schema(format!(
                        "map key type must be string, got {key_type:?} in {key:?}"
                    )));
                }
                let value_type = &rest[close + 1..];
                if value_type.is_empty() {
                    return Err(Error::Schema(format!(
                        "missing map value type in {type_str:?} of {key:?}"
                    )));
                }
                return Ok(StructuralSchema::map_of(parse_type(key, value_type)?));
            }
            Err(Error::Schema(format!(
                "unknown type {type_str:?} on field {key:?}"
            )))
        }
    }
}

struct Marker {
    name: String,
    value: String,
    quoted: bool,
}

/// Split `required=true default="a b" …` into markers, honoring quotes.
fn tokenize_markers(key: &str, input: &str) -> Result<Vec<Marker>> {
    let bytes = input.as_bytes();
    let mut markers = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos].is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let name = &input[name_start..pos];
        if pos >= bytes.len() || bytes[pos] != b'=' || name.is_empty() {
            return Err(Error::Schema(format!(
                "malformed marker near {:?} on field {key:?}",
                &input[name_start..]
            )));
        }
        pos += 1; // consume '='

        let (value, quoted) = if pos < bytes.len() && bytes[pos] == b'"' {
            pos += 1;
            let value_start = pos;
            while pos < bytes.len() && bytes[pos] != b'"' {
                pos += 1;
            }
            if pos >= bytes.len() {
                return Err(Error::Schema(format!(
                    "unclosed quote in markers of field {key:?}"
                )));
            }
            let value = input[value_start..pos].to_string();
            pos += 1; // consume closing quote
            (value, true)
        } else {
            let value_start = pos;
            while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if pos == value_start {
                return Err(Error::Schema(format!(
                    "marker {name:?} on field {key:?} has no value"
                )));
            }
            (input[value_start..pos].to_string(), false)
        };

        markers.push(Marker {
            name: name.to_string(),
            value,
            quoted,
        });
    }

    Ok(markers)
}

/// Defaults are attached verbatim; bare values are coerced to the node type,
/// strings are auto-quoted.
fn parse_default(key: &str, schema: &StructuralSchema, marker: &Marker) -> Result<Value> {
    if marker.quoted {
        return Ok(Value::String(marker.value.clone()));
    }
    let raw = marker.value.as_str();
    let parsed = match schema.schema_type {
        Some(SchemaType::String) => Some(Value::String(raw.to_string())),
        Some(SchemaType::Boolean) => raw.parse::<bool>().ok().map(Value::Bool),
        Some(SchemaType::Integer) => raw.parse::<i64>().ok().map(Value::from),
        Some(SchemaType::Number) => raw.parse::<f64>().ok().map(Value::from),
        _ => serde_json::from_str(raw).ok(),
    };
    parsed.ok_or_else(|| {
        Error::Schema(format!(
            "default {raw:?} does not fit the type of field {key:?}"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_atomic_leaves() {
        let schema = transform_shorthand(&json!({
            "name": "string",
            "replicas": "integer",
            "ratio": "float",
            "enabled": "boolean",
        }))
        .unwrap();

        assert_eq!(
            schema.properties["name"].schema_type,
            Some(SchemaType::String)
        );
        assert_eq!(
            schema.properties["replicas"].schema_type,
            Some(SchemaType::Integer)
        );
        assert_eq!(
            schema.properties["ratio"].schema_type,
            Some(SchemaType::Number)
        );
        assert_eq!(
            schema.properties["enabled"].schema_type,
            Some(SchemaType::Boolean)
        );
    }

    #[test]
    fn test_collections_recurse() {
        let schema = transform_shorthand(&json!({
            "subnets": "[]string",
            "labels": "map[string]string",
            "matrix": "[]map[string]integer",
        }))
        .unwrap();

        let subnets = &schema.properties["subnets"];
        assert_eq!(subnets.schema_type, Some(SchemaType::Array));
        assert_eq!(
            subnets.items.as_ref().unwrap().schema_type,
            Some(SchemaType::String)
        );

        let labels = &schema.properties["labels"];
        assert_eq!(
            labels.additional_properties.as_ref().unwrap().schema_type,
            Some(SchemaType::String)
        );

        let matrix = &schema.properties["matrix"];
        let inner = matrix.items.as_ref().unwrap();
        assert_eq!(
            inner.additional_properties.as_ref().unwrap().schema_type,
            Some(SchemaType::Integer)
        );
    }

    #[test]
    fn test_nested_maps_become_objects() {
        let schema = transform_shorthand(&json!({
            "network": {
                "cidr": "string | required=true",
                "dns": { "enabled": "boolean" },
            },
        }))
        .unwrap();

        let network = &schema.properties["network"];
        assert_eq!(network.schema_type, Some(SchemaType::Object));
        assert_eq!(network.required, vec!["cidr".to_string()]);
        assert_eq!(
            network.properties["dns"].properties["enabled"].schema_type,
            Some(SchemaType::Boolean)
        );
    }

    #[test]
    fn test_markers() {
        let schema = transform_shorthand(&json!({
            "name": "string | required=true default=vpc description=\"VPC name\"",
            "replicas": "integer | default=3",
        }))
        .unwrap();

        assert_eq!(schema.required, vec!["name".to_string()]);
        let name = &schema.properties["name"];
        assert_eq!(name.default, Some(json!("vpc")));
        assert_eq!(name.description.as_deref(), Some("VPC name"));
        assert_eq!(schema.properties["replicas"].default, Some(json!(3)));
    }

    #[test]
    fn test_quoted_default_with_spaces() {
        let schema = transform_shorthand(&json!({
            "greeting": "string | default=\"hello world\"",
        }))
        .unwrap();
        assert_eq!(
            schema.properties["greeting"].default,
            Some(json!("hello world"))
        );
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = transform_shorthand(&json!({ "x": "decimal" })).unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_unknown_marker_rejected() {
        let err = transform_shorthand(&json!({ "x": "string | shiny=true" })).unwrap_err();
        assert!(err.to_string().contains("unknown marker"));
    }

    #[test]
    fn test_malformed_map_rejected() {
        let err = transform_shorthand(&json!({ "x": "map[integer]string" })).unwrap_err();
        assert!(err.to_string().contains("map key type"));

        let err = transform_shorthand(&json!({ "x": "map[string" })).unwrap_err();
        assert!(err.to_string().contains("unclosed bracket"));
    }

    #[test]
    fn test_unclosed_quote_rejected() {
        let err =
            transform_shorthand(&json!({ "x": "string | description=\"oops" })).unwrap_err();
        assert!(err.to_string().contains("unclosed quote"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let err = transform_shorthand(&json!({ "": "string" })).unwrap_err();
        assert!(err.to_string().contains("empty key"));
    }

    #[test]
    fn test_round_trip_stability() {
        let input = json!({
            "b": "string",
            "a": { "inner": "integer | required=true" },
        });
        let first = serde_json::to_string(&transform_shorthand(&input).unwrap()).unwrap();
        let second = serde_json::to_string(&transform_shorthand(&input).unwrap()).unwrap();
        assert_eq!(first, second);
    }
}
