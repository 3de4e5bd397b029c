//! `${…}` discovery in templated objects

use serde_json::Value;

use crate::error::{Error, Result};
use crate::schema::StructuralSchema;
use crate::template::{Field, FieldPath};

/// One `${…}` occurrence inside a string leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// The text between `${` and the matching `}`
    pub expression: String,
    /// Byte offset of the `$`
    pub start: usize,
    /// Byte offset one past the closing `}`
    pub end: usize,
}

/// Find every `${…}` fragment in `text`. Braces inside a fragment must
/// balance; an unterminated fragment is an error.
pub fn find_fragments(text: &str) -> Result<Vec<Fragment>> {
    let bytes = text.as_bytes();
    let mut fragments = Vec::new();
    let mut pos = 0;

    while pos + 1 < bytes.len() {
        if bytes[pos] == b'$' && bytes[pos + 1] == b'{' {
            let start = pos;
            let mut depth = 1usize;
            let mut cursor = pos + 2;
            while cursor < bytes.len() && depth > 0 {
                match bytes[cursor] {
                    b'{' => depth += 1,
                    b'}' => depth -= 1,
                    _ => {}
                }
                cursor += 1;
            }
            if depth != 0 {
                return Err(Error::Validation(format!(
                    "unbalanced braces in expression fragment of {text:?}"
                )));
            }
            let expression = text[start + 2..cursor - 1].trim().to_string();
            if expression.is_empty() {
                return Err(Error::Validation(format!(
                    "empty expression fragment in {text:?}"
                )));
            }
            fragments.push(Fragment {
                expression,
                start,
                end: cursor,
            });
            pos = cursor;
        } else {
            pos += 1;
        }
    }

    Ok(fragments)
}

/// Render an interpolated leaf: each `${…}` fragment of `text` is replaced
/// with the string form of the corresponding resolved value.
pub fn render_interpolated(text: &str, values: &[Value]) -> Result<String> {
    let fragments = find_fragments(text)?;
    if fragments.len() != values.len() {
        return Err(Error::Internal(format!(
            "{} fragments but {} resolved values for {text:?}",
            fragments.len(),
            values.len()
        )));
    }

    let mut out = String::new();
    let mut cursor = 0;
    for (fragment, value) in fragments.iter().zip(values) {
        out.push_str(&text[cursor..fragment.start]);
        out.push_str(&value_to_string(value));
        cursor = fragment.end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Walk `value` side by side with `schema`, emitting a [`Field`] for every
/// string leaf containing expressions. Each field carries the schema node
/// expected at its location.
pub fn extract_schemaful(value: &Value, schema: &StructuralSchema) -> Result<Vec<Field>> {
    let mut fields = Vec::new();
    walk(value, Some(schema), &FieldPath::root(), &mut fields)?;
    Ok(fields)
}

/// Walk `value` without a schema; used for user-authored status templates.
pub fn extract_schemaless(value: &Value) -> Result<Vec<Field>> {
    let mut fields = Vec::new();
    walk(value, None, &FieldPath::root(), &mut fields)?;
    Ok(fields)
}

fn walk(
    value: &Value,
    schema: Option<&StructuralSchema>,
    path: &FieldPath,
    fields: &mut Vec<Field>,
) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_schema = schema.and_then(|s| s.property(key));
                walk(child, child_schema, &path.child(key), fields)?;
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let item_schema = schema.and_then(|s| s.items.as_deref());
                walk(item, item_schema, &path.index(i), fields)?;
            }
        }
        Value::String(text) => {
            let fragments = find_fragments(text)?;
            if fragments.is_empty() {
                return Ok(());
            }
            let standalone = fragments.len() == 1
                && fragments[0].start == 0
                && fragments[0].end == text.len();
            let expressions = fragments.into_iter().map(|f| f.expression).collect();
            let mut field = Field::new(path.clone(), expressions, standalone);
            if let Some(schema) = schema {
                field = field.with_schema(schema.clone());
            }
            fields.push(field);
        }
        _ => {}
    }
    Ok(())
}
