//! Schema inference from concrete values
//!
//! The status schema of a composite kind is not authored; it is inferred from
//! the values its status expressions produce when dry-run against emulated
//! children.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::schema::{SchemaType, StructuralSchema};

/// Infer a structural schema from a concrete value.
///
/// Atomics map by native kind, arrays by their first element, objects by
/// their properties. `null` and empty arrays carry no type information and
/// produce opaque nodes.
pub fn infer_schema(value: &Value) -> StructuralSchema {
    match value {
        Value::Null => StructuralSchema::opaque(),
        Value::Bool(_) => StructuralSchema::atomic(SchemaType::Boolean),
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                StructuralSchema::atomic(SchemaType::Integer)
            } else {
                StructuralSchema::atomic(SchemaType::Number)
            }
        }
        Value::String(_) => StructuralSchema::atomic(SchemaType::String),
        Value::Array(items) => match items.first() {
            Some(first) => StructuralSchema::array(infer_schema(first)),
            None => StructuralSchema {
                schema_type: Some(SchemaType::Array),
                items: Some(Box::new(StructuralSchema::opaque())),
                ..StructuralSchema::default()
            },
        },
        Value::Object(map) => {
            let properties: BTreeMap<String, StructuralSchema> = map
                .iter()
                .map(|(key, child)| (key.clone(), infer_schema(child)))
                .collect();
            StructuralSchema::object(properties, Vec::new())
        }
    }
}
