//! Group build pipeline
//!
//! Runs once per definition revision, failing fast: naming, per-child schema
//! resolution and emulation, field extraction, instance schema synthesis,
//! dependency graph construction, and a whole-graph dry run that type-checks
//! every expression against emulated siblings. The output is an immutable
//! [`RuntimeGroup`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::{Error, Result};
use crate::expr::{is_bool, ExpressionEngine};
use crate::graph::DependencyGraph;
use crate::group::{naming, ChildTemplate, GroupDefinition, Resource, RuntimeGroup};
use crate::meta::{pluralize, GroupVersionKind, CRD_API_VERSION, CRD_KIND};
use crate::object::DynamicObject;
use crate::schema::{
    emulate, infer_schema, transform_shorthand, SchemaType, StructuralSchema,
};
use crate::store::SchemaRegistry;
use crate::template::{
    classify_dependencies, extract_schemaful, extract_schemaless, find_fragments,
    render_interpolated, Field, FieldKind,
};

/// Compiles group definitions into runtime groups.
pub struct GroupBuilder {
    registry: Arc<dyn SchemaRegistry>,
    engine: Arc<ExpressionEngine>,
}

impl GroupBuilder {
    pub fn new(registry: Arc<dyn SchemaRegistry>, engine: Arc<ExpressionEngine>) -> Self {
        Self { registry, engine }
    }

    /// Build one definition revision into a [`RuntimeGroup`].
    pub async fn build(&self, definition: GroupDefinition) -> Result<RuntimeGroup> {
        // Naming and reserved words come first; nothing else is trustworthy
        // until ids are known-good.
        naming::validate_kind_name(&definition.kind)?;
        let mut known_ids = BTreeSet::new();
        for child in &definition.children {
            naming::validate_resource_id(&child.id)?;
            if !known_ids.insert(child.id.clone()) {
                return Err(Error::Validation(format!(
                    "duplicate resource id {:?}",
                    child.id
                )));
            }
        }

        let mut resources = BTreeMap::new();
        for child in &definition.children {
            let resource = self.compile_child(child).await?;
            resources.insert(child.id.clone(), resource);
        }

        // The composite spec schema and an emulated instance; both are inputs
        // to every later dry run.
        let spec_schema = transform_shorthand(&definition.spec_shorthand)?;
        let instance_gvk = definition.instance_gvk();
        let emulated_spec = emulate(
            &StructuralSchema::object(
                BTreeMap::from([("spec".to_string(), spec_schema.clone())]),
                vec!["spec".to_string()],
            ),
            &instance_gvk,
        )?
        .spec();

        let graph = self.build_graph(&definition, &mut resources, &known_ids)?;
        let topological_order = graph.topological_sort();

        let emulated_bindings = emulated_bindings(&resources, &emulated_spec);
        self.check_fields(&resources, &known_ids, &emulated_bindings)?;
        self.check_gates(&resources, &emulated_spec)?;

        let (status_fields, status_schema) =
            self.synthesize_status(&definition, &known_ids, &emulated_bindings)?;

        let instance_schema = instance_schema(&spec_schema, &status_schema);
        let instance_crd = synthesize_crd(&instance_gvk, &instance_schema)?;
        let emulated_instance = emulate(&instance_schema, &instance_gvk)?;

        let instance = Resource {
            id: "instance".to_string(),
            gvk: instance_gvk.clone(),
            plural: pluralize(&instance_gvk.kind),
            schema: instance_schema,
            template: definition.status_template.clone(),
            emulated: emulated_instance,
            fields: status_fields,
            ready_when: Vec::new(),
            include_when: Vec::new(),
            namespaced: true,
            dependencies: Vec::new(),
            is_instance: true,
        };

        debug!(
            group = %definition.meta.name,
            kind = %definition.kind,
            order = ?topological_order,
            "group built"
        );

        Ok(RuntimeGroup::new(
            definition,
            resources,
            topological_order,
            graph,
            instance,
            instance_crd,
        ))
    }

    /// Classify one child template: structural shape, registry lookup, the
    /// CRD-template rule, emulation and field extraction.
    async fn compile_child(&self, child: &ChildTemplate) -> Result<Resource> {
        let template = &child.template;
        if !template.is_object() {
            return Err(Error::Validation(format!(
                "template of {:?} must be an object",
                child.id
            )));
        }
        let api_version = template
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Validation(format!("template of {:?} has no apiVersion", child.id))
            })?;
        let kind = template.get("kind").and_then(Value::as_str).ok_or_else(|| {
            Error::Validation(format!("template of {:?} has no kind", child.id))
        })?;
        if !template.get("metadata").is_some_and(Value::is_object) {
            return Err(Error::Validation(format!(
                "template of {:?} has no metadata map",
                child.id
            )));
        }
        let gvk = GroupVersionKind::from_api_version(api_version, kind)?;

        let ready_when = parse_standalone_list(&child.ready_when, &child.id, "readyWhen")?;
        let include_when =
            parse_standalone_list(&child.include_when, &child.id, "includeWhen")?;

        // Type definition templates stay opaque and may not be templated.
        if kind == CRD_KIND {
            let embedded = extract_schemaless(template)?;
            if !embedded.is_empty() {
                return Err(Error::Validation(format!(
                    "template of {:?} is a {CRD_KIND} and must not contain expressions",
                    child.id
                )));
            }
            return Ok(Resource {
                id: child.id.clone(),
                plural: pluralize(kind),
                gvk,
                schema: StructuralSchema::opaque(),
                template: template.clone(),
                emulated: DynamicObject::new(template.clone())?,
                fields: Vec::new(),
                ready_when,
                include_when,
                namespaced: false,
                dependencies: Vec::new(),
                is_instance: false,
            });
        }

        let schema = self.registry.resolve_schema(&gvk).await?;
        let namespaced = self.registry.is_namespaced(&gvk).await?;
        let emulated = emulate(&schema, &gvk)?;
        let fields = extract_schemaful(template, &schema)?;

        Ok(Resource {
            id: child.id.clone(),
            plural: pluralize(&gvk.kind),
            gvk,
            schema,
            template: template.clone(),
            emulated,
            fields,
            ready_when,
            include_when,
            namespaced,
            dependencies: Vec::new(),
            is_instance: false,
        })
    }

    /// Classify every field, record the resulting dependencies, and build
    /// the dependency graph; `add_edge` surfaces self references and cycles
    /// with their full path.
    fn build_graph(
        &self,
        definition: &GroupDefinition,
        resources: &mut BTreeMap<String, Resource>,
        known_ids: &BTreeSet<String>,
    ) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();
        for child in &definition.children {
            graph.add_vertex(&child.id)?;
        }

        for child in &definition.children {
            let resource = match resources.get_mut(&child.id) {
                Some(resource) => resource,
                None => continue,
            };
            let mut resource_deps = BTreeSet::new();

            for field in &mut resource.fields {
                let mut field_deps = BTreeSet::new();
                for source in &field.expressions {
                    let program = self.engine.parse(source)?;
                    let (deps, _) = classify_dependencies(&program, known_ids)?;
                    field_deps.extend(deps);
                }
                field.kind = if field_deps.is_empty() {
                    FieldKind::Static
                } else {
                    FieldKind::Dynamic
                };
                field.dependencies = field_deps.iter().cloned().collect();
                resource_deps.extend(field_deps);
            }

            for dep in &resource_deps {
                graph.add_edge(&child.id, dep)?;
            }
            resource.dependencies = resource_deps.into_iter().collect();
        }

        Ok(graph)
    }

    /// Dry-run every field expression against the emulated siblings.
    fn check_fields(
        &self,
        resources: &BTreeMap<String, Resource>,
        known_ids: &BTreeSet<String>,
        bindings: &Map<String, Value>,
    ) -> Result<()> {
        let mut env = known_ids.clone();
        env.insert("spec".to_string());

        for resource in resources.values() {
            for field in &resource.fields {
                for source in &field.expressions {
                    let program = self.engine.compile(source, &env)?;
                    self.engine.eval(&program, bindings)?;
                }
            }
        }
        Ok(())
    }

    /// Compile and dry-run the readiness and inclusion gates.
    ///
    /// Ready-when sees the child's own id plus its top-level fields and must
    /// be boolean; include-when sees only the composite `spec`.
    fn check_gates(
        &self,
        resources: &BTreeMap<String, Resource>,
        emulated_spec: &Value,
    ) -> Result<()> {
        let mut include_env = BTreeSet::new();
        include_env.insert("spec".to_string());
        let mut include_bindings = Map::new();
        include_bindings.insert("spec".to_string(), emulated_spec.clone());

        for resource in resources.values() {
            let mut ready_env = resource.top_level_fields();
            ready_env.insert(resource.id.clone());
            let ready_bindings = ready_bindings(resource, &resource.emulated);

            for source in &resource.ready_when {
                let program = self.engine.compile(source, &ready_env)?;
                let value = self.engine.eval(&program, &ready_bindings)?;
                if !is_bool(&value) {
                    return Err(Error::Validation(format!(
                        "readyWhen expression {source:?} of {:?} must be boolean",
                        resource.id
                    )));
                }
            }

            for source in &resource.include_when {
                let program = self.engine.compile(source, &include_env)?;
                let value = self.engine.eval(&program, &include_bindings)?;
                if !is_bool(&value) {
                    return Err(Error::Validation(format!(
                        "includeWhen expression {source:?} of {:?} must be boolean",
                        resource.id
                    )));
                }
            }
        }
        Ok(())
    }

    /// Extract status fields, reject static ones, dry-run each expression and
    /// infer the status schema from the resulting value tree.
    fn synthesize_status(
        &self,
        definition: &GroupDefinition,
        known_ids: &BTreeSet<String>,
        bindings: &Map<String, Value>,
    ) -> Result<(Vec<Field>, StructuralSchema)> {
        let template = &definition.status_template;
        if template.is_null() {
            return Ok((Vec::new(), default_status_schema(BTreeMap::new())));
        }
        if !template.is_object() {
            return Err(Error::Validation(
                "status template must be a map".to_string(),
            ));
        }

        let mut fields = extract_schemaless(template)?;
        let mut dry = template.clone();

        for field in &mut fields {
            let mut field_deps = BTreeSet::new();
            let mut resolved = Vec::with_capacity(field.expressions.len());

            for source in &field.expressions {
                let program = self.engine.parse(source)?;
                let (deps, is_static) = classify_dependencies(&program, known_ids)?;
                if is_static {
                    return Err(Error::Validation(format!(
                        "status expression {source:?} must reference at least one resource"
                    )));
                }
                field_deps.extend(deps);
                resolved.push(self.engine.eval(&program, bindings)?);
            }

            field.kind = FieldKind::Dynamic;
            field.dependencies = field_deps.into_iter().collect();

            let value = if field.standalone {
                resolved.swap_remove(0)
            } else {
                let leaf = field
                    .path
                    .get(template)
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::Internal(format!("status leaf {} vanished", field.path))
                    })?;
                Value::String(render_interpolated(leaf, &resolved)?)
            };
            field.path.set(&mut dry, value)?;
        }

        let inferred = infer_schema(&dry);
        Ok((fields, default_status_schema(inferred.properties)))
    }
}

/// Combined bindings for dry runs: every emulated child plus the emulated
/// instance spec.
fn emulated_bindings(
    resources: &BTreeMap<String, Resource>,
    emulated_spec: &Value,
) -> Map<String, Value> {
    let mut bindings = Map::new();
    for (id, resource) in resources {
        bindings.insert(id.clone(), resource.emulated.as_value().clone());
    }
    bindings.insert("spec".to_string(), emulated_spec.clone());
    bindings
}

/// Bindings for ready-when: the id plus the observed object's top-level
/// fields, so both `${vpc.status.x}` and `${status.x}` resolve.
pub(crate) fn ready_bindings(resource: &Resource, observed: &DynamicObject) -> Map<String, Value> {
    let mut bindings = Map::new();
    bindings.insert(resource.id.clone(), observed.as_value().clone());
    if let Some(map) = observed.as_value().as_object() {
        for (key, value) in map {
            bindings.insert(key.clone(), value.clone());
        }
    }
    bindings
}

/// Gate expressions are standalone-only: exactly one `${…}` fragment with no
/// surrounding text. Returns the bracket-stripped sources.
fn parse_standalone_list(entries: &[String], id: &str, what: &str) -> Result<Vec<String>> {
    let mut sources = Vec::with_capacity(entries.len());
    for entry in entries {
        let fragments = find_fragments(entry)?;
        let standalone = fragments.len() == 1
            && fragments[0].start == 0
            && fragments[0].end == entry.len();
        if !standalone {
            return Err(Error::Validation(format!(
                "{what} entry {entry:?} of {id:?} must be a single standalone expression"
            )));
        }
        sources.push(fragments[0].expression.clone());
    }
    Ok(sources)
}

/// Status schema with the default `state` and `conditions` fields injected
/// unless the user inferred their own.
fn default_status_schema(
    mut properties: BTreeMap<String, StructuralSchema>,
) -> StructuralSchema {
    properties
        .entry("state".to_string())
        .or_insert_with(|| StructuralSchema::atomic(SchemaType::String));
    properties
        .entry("conditions".to_string())
        .or_insert_with(|| StructuralSchema::array(condition_schema()));
    StructuralSchema::object(properties, Vec::new())
}

fn condition_schema() -> StructuralSchema {
    let field = |name: &str| {
        (
            name.to_string(),
            StructuralSchema::atomic(SchemaType::String),
        )
    };
    StructuralSchema::object(
        BTreeMap::from([
            field("type"),
            field("status"),
            field("reason"),
            field("message"),
            field("lastTransitionTime"),
        ]),
        Vec::new(),
    )
}

/// `{apiVersion, kind, metadata, spec, status}` for the composite kind.
fn instance_schema(
    spec_schema: &StructuralSchema,
    status_schema: &StructuralSchema,
) -> StructuralSchema {
    StructuralSchema::object(
        BTreeMap::from([
            (
                "apiVersion".to_string(),
                StructuralSchema::atomic(SchemaType::String),
            ),
            (
                "kind".to_string(),
                StructuralSchema::atomic(SchemaType::String),
            ),
            ("metadata".to_string(), StructuralSchema::opaque()),
            ("spec".to_string(), spec_schema.clone()),
            ("status".to_string(), status_schema.clone()),
        ]),
        vec!["spec".to_string()],
    )
}

fn synthesize_crd(
    gvk: &GroupVersionKind,
    schema: &StructuralSchema,
) -> Result<DynamicObject> {
    let plural = pluralize(&gvk.kind);
    let schema_value = serde_json::to_value(schema)
        .map_err(|e| Error::Internal(format!("schema serialization failed: {e}")))?;
    DynamicObject::new(json!({
        "apiVersion": CRD_API_VERSION,
        "kind": CRD_KIND,
        "metadata": { "name": format!("{plural}.{}", gvk.group) },
        "spec": {
            "group": gvk.group,
            "names": { "kind": gvk.kind, "plural": plural },
            "scope": "Namespaced",
            "versions": [{
                "name": gvk.version,
                "served": true,
                "storage": true,
                "schema": { "openAPIV3Schema": schema_value },
            }],
        },
    }))
}
