//! Dotted paths into dynamic objects

use std::fmt;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Object key
    Key(String),
    /// Array index
    Index(usize),
}

/// Location of one field inside a templated object.
///
/// Rendered with array indices in brackets and map keys bare, quoted only
/// when they contain `.` or other reserved characters, e.g.
/// `spec.rules[0].host` or `metadata.labels["korus.dev/owned"]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn child(&self, key: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Key(key.to_string()));
        Self { segments }
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.segments.clone();
        segments.push(PathSegment::Index(index));
        Self { segments }
    }

    /// First key segment, if any; `status.state` starts at `status`.
    pub fn head(&self) -> Option<&str> {
        self.segments.first().and_then(|segment| match segment {
            PathSegment::Key(key) => Some(key.as_str()),
            PathSegment::Index(_) => None,
        })
    }

    /// Path without its first segment.
    pub fn tail(&self) -> Self {
        Self {
            segments: self.segments.iter().skip(1).cloned().collect(),
        }
    }

    /// Read the value at this path.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        let mut current = root;
        for segment in &self.segments {
            current = match segment {
                PathSegment::Key(key) => current.get(key)?,
                PathSegment::Index(index) => current.get(index)?,
            };
        }
        Some(current)
    }

    /// Write `value` at this path, creating intermediate objects as needed.
    ///
    /// Array steps never allocate: writing through a missing index is an
    /// error, because templates always carry the array structure literally.
    pub fn set(&self, root: &mut Value, value: Value) -> Result<()> {
        if self.segments.is_empty() {
            *root = value;
            return Ok(());
        }

        let mut current = root;
        for (i, segment) in self.segments.iter().enumerate() {
            let last = i + 1 == self.segments.len();
            match segment {
                PathSegment::Key(key) => {
                    if !current.is_object() {
                        *current = Value::Object(Map::new());
                    }
                    let map = match current.as_object_mut() {
                        Some(map) => map,
                        None => unreachable!(),
                    };
                    if last {
                        map.insert(key.clone(), value);
                        return Ok(());
                    }
                    current = map.entry(key.clone()).or_insert(Value::Null);
                }
                PathSegment::Index(index) => {
                    let list = current.as_array_mut().ok_or_else(|| {
                        Error::Internal(format!("path {self} expects an array at step {i}"))
                    })?;
                    let slot = list.get_mut(*index).ok_or_else(|| {
                        Error::Internal(format!("path {self} is out of bounds at step {i}"))
                    })?;
                    if last {
                        *slot = value;
                        return Ok(());
                    }
                    current = slot;
                }
            }
        }

        Ok(())
    }
}

fn key_needs_quoting(key: &str) -> bool {
    key.is_empty()
        || key
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) => {
                    if key_needs_quoting(key) {
                        write!(f, "[{key:?}]")?;
                    } else {
                        if i > 0 {
                            write!(f, ".")?;
                        }
                        write!(f, "{key}")?;
                    }
                }
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display() {
        let path = FieldPath::root().child("spec").child("rules").index(0).child("host");
        assert_eq!(path.to_string(), "spec.rules[0].host");
    }

    #[test]
    fn test_display_quotes_reserved_keys() {
        let path = FieldPath::root()
            .child("metadata")
            .child("labels")
            .child("korus.dev/owned");
        assert_eq!(
            path.to_string(),
            "metadata.labels[\"korus.dev/owned\"]"
        );
    }

    #[test]
    fn test_get() {
        let value = json!({ "spec": { "zones": ["a", "b"] } });
        let path = FieldPath::root().child("spec").child("zones").index(1);
        assert_eq!(path.get(&value), Some(&json!("b")));
        assert_eq!(FieldPath::root().child("missing").get(&value), None);
    }

    #[test]
    fn test_set_existing_leaf() {
        let mut value = json!({ "spec": { "vpcID": "${vpc.status.vpcID}" } });
        let path = FieldPath::root().child("spec").child("vpcID");
        path.set(&mut value, json!("vpc-123")).unwrap();
        assert_eq!(value, json!({ "spec": { "vpcID": "vpc-123" } }));
    }

    #[test]
    fn test_set_creates_objects() {
        let mut value = json!({});
        let path = FieldPath::root().child("status").child("state");
        path.set(&mut value, json!("ACTIVE")).unwrap();
        assert_eq!(value, json!({ "status": { "state": "ACTIVE" } }));
    }

    #[test]
    fn test_set_into_array() {
        let mut value = json!({ "spec": { "zones": ["a", "b"] } });
        let path = FieldPath::root().child("spec").child("zones").index(0);
        path.set(&mut value, json!("z")).unwrap();
        assert_eq!(value["spec"]["zones"], json!(["z", "b"]));
    }

    #[test]
    fn test_set_out_of_bounds_errors() {
        let mut value = json!({ "zones": [] });
        let path = FieldPath::root().child("zones").index(2);
        assert!(path.set(&mut value, json!("x")).is_err());
    }

    #[test]
    fn test_head_and_tail() {
        let path = FieldPath::root().child("status").child("vpcID");
        assert_eq!(path.head(), Some("status"));
        assert_eq!(path.tail().to_string(), "vpcID");
    }
}
