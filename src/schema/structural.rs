//! Structural schema representation

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// The closed set of node types a structural schema can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    String,
    Integer,
    Number,
    Boolean,
    Array,
}

impl SchemaType {
    fn describes(&self, value: &Value) -> bool {
        match self {
            SchemaType::Object => value.is_object(),
            SchemaType::String => value.is_string(),
            // Whole floats arriving as `1.0` still satisfy integer nodes.
            SchemaType::Integer => value.is_i64() || value.is_u64(),
            SchemaType::Number => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
        }
    }
}

/// One node of a structural schema.
///
/// Maps are ordered (`BTreeMap`) so that two builds of the same definition
/// serialize identically; determinism here is a tested contract downstream.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StructuralSchema {
    /// Node type; absent on fully opaque nodes
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,
    /// Child schemas of an object node
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, StructuralSchema>,
    /// Required property names of an object node
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    /// Element schema of an array node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<StructuralSchema>>,
    /// Value schema of a string-keyed map node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_properties: Option<Box<StructuralSchema>>,
    /// Default value, attached verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Opaque subtree marker; content is accepted without validation
    #[serde(
        rename = "x-preserve-unknown-fields",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub preserve_unknown: bool,
}

impl StructuralSchema {
    pub fn atomic(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Self::default()
        }
    }

    pub fn object(properties: BTreeMap<String, StructuralSchema>, required: Vec<String>) -> Self {
        Self {
            schema_type: Some(SchemaType::Object),
            properties,
            required,
            ..Self::default()
        }
    }

    pub fn array(items: StructuralSchema) -> Self {
        Self {
            schema_type: Some(SchemaType::Array),
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    pub fn map_of(values: StructuralSchema) -> Self {
        Self {
            schema_type: Some(SchemaType::Object),
            additional_properties: Some(Box::new(values)),
            ..Self::default()
        }
    }

    /// An opaque node accepting any content.
    pub fn opaque() -> Self {
        Self {
            preserve_unknown: true,
            ..Self::default()
        }
    }

    /// Schema of the property reached by one dotted-path step, if declared.
    pub fn property(&self, key: &str) -> Option<&StructuralSchema> {
        self.properties
            .get(key)
            .or_else(|| self.additional_properties.as_deref())
    }

    /// Check `value` against this schema, failing on the first mismatch.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.validate_at(value, "$")
    }

    fn validate_at(&self, value: &Value, path: &str) -> Result<()> {
        if self.preserve_unknown {
            return Ok(());
        }
        if let Some(schema_type) = self.schema_type {
            if !schema_type.describes(value) {
                return Err(Error::Schema(format!(
                    "{path}: expected {schema_type:?}, got {}",
                    type_name(value)
                )));
            }
        }

        match value {
            Value::Object(map) => {
                for required in &self.required {
                    if !map.contains_key(required) {
                        return Err(Error::Schema(format!(
                            "{path}: missing required property {required:?}"
                        )));
                    }
                }
                for (key, child) in map {
                    let child_path = format!("{path}.{key}");
                    match self.property(key) {
                        Some(schema) => schema.validate_at(child, &child_path)?,
                        None if self.schema_type == Some(SchemaType::Object)
                            && !self.properties.is_empty() =>
                        {
                            return Err(Error::Schema(format!(
                                "{path}: unknown property {key:?}"
                            )));
                        }
                        None => {}
                    }
                }
            }
            Value::Array(items) => {
                if let Some(item_schema) = &self.items {
                    for (i, item) in items.iter().enumerate() {
                        item_schema.validate_at(item, &format!("{path}[{i}]"))?;
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
