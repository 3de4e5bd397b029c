//! Templated fields

use crate::schema::StructuralSchema;
use crate::template::FieldPath;

/// Whether a field's expressions depend on sibling resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldKind {
    /// References only the instance `spec`; resolvable before any child exists
    #[default]
    Static,
    /// References at least one sibling resource's observed state
    Dynamic,
}

/// One templated location inside a resource or status template.
///
/// The field does not own resolved values; those live in the snapshot's
/// expression cache, keyed by the expression source text.
#[derive(Debug, Clone)]
pub struct Field {
    /// Where the field lives inside its object
    pub path: FieldPath,
    /// The embedded expressions, in order of appearance
    pub expressions: Vec<String>,
    /// True when the whole leaf is exactly one `${…}` fragment, which
    /// preserves the expression's native result type on write-back
    pub standalone: bool,
    /// Static/dynamic classification, filled in by the group builder
    pub kind: FieldKind,
    /// Schema node expected at this location, when extraction was schemaful
    pub schema: Option<StructuralSchema>,
    /// Sibling resource ids this field's expressions reference
    pub dependencies: Vec<String>,
}

impl Field {
    pub fn new(path: FieldPath, expressions: Vec<String>, standalone: bool) -> Self {
        Self {
            path,
            expressions,
            standalone,
            kind: FieldKind::default(),
            schema: None,
            dependencies: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: StructuralSchema) -> Self {
        self.schema = Some(schema);
        self
    }
}
