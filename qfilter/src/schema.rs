//! Field schemas: the selectors each entity type accepts and the backend
//! paths they resolve to.
//!
//! Schemas are built in code or loaded from TOML:
//!
//! ```toml
//! [entities.target.fields]
//! name = "text"
//! controllerid = { path = "controllerId", kind = "text" }
//! updatestatus = { path = "updateStatus", kind = "enum", values = ["error", "in_sync", "pending"] }
//! assignedds = { path = "assignedDistributionSet", kind = "association", entity = "distributionset", default = "name" }
//! attribute = { path = "controllerAttributes", kind = "map" }
//!
//! [entities.target.aliases]
//! "ds" = "assignedds"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::FieldError;
use crate::predicate::Value;
use crate::{Error, Result};

/// Bound on dotted path length, including applied default sub-fields.
const MAX_PATH_DEPTH: usize = 16;

/// Maps a coerced query value onto the value a backend stores.
pub trait ValueConverter: Send + Sync {
    /// `None` when the value has no backend representation.
    fn convert(&self, value: &Value) -> Option<Value>;

    /// Query values `convert` accepts.
    fn possible_values(&self) -> Vec<String>;
}

/// The shape of a field's values.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    Text,
    Number,
    Boolean,
    /// Closed set of canonical values, matched ignoring case
    Enum(Vec<String>),
    /// Reference to another entity type; selectors continue into its fields
    Association(String),
    /// Nested structure with its own field set
    Embedded(FieldSet),
    /// Keyed attribute bag; the next selector segment is a free key
    Map,
}

impl ValueKind {
    /// Whether selectors may continue past a field of this kind.
    pub fn is_navigable(&self) -> bool {
        matches!(self, ValueKind::Association(_) | ValueKind::Embedded(_) | ValueKind::Map)
    }
}

/// How a query field maps onto the backend.
#[derive(Clone)]
pub struct FieldDescriptor {
    /// Backend path. After resolution, the full dotted path.
    pub path: String,
    pub value_kind: ValueKind,
    pub converter: Option<Arc<dyn ValueConverter>>,
    /// Sub-field used when an association or embedded field is the last segment
    pub default_sub_field: Option<String>,
    /// Set by resolution when the path addresses a key inside a map field
    pub map_entry: bool,
}

impl FieldDescriptor {
    pub fn new(path: impl Into<String>, value_kind: ValueKind) -> Self {
        Self {
            path: path.into(),
            value_kind,
            converter: None,
            default_sub_field: None,
            map_entry: false,
        }
    }

    pub fn text(path: impl Into<String>) -> Self {
        Self::new(path, ValueKind::Text)
    }

    pub fn number(path: impl Into<String>) -> Self {
        Self::new(path, ValueKind::Number)
    }

    pub fn boolean(path: impl Into<String>) -> Self {
        Self::new(path, ValueKind::Boolean)
    }

    pub fn enumeration<I, S>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(path, ValueKind::Enum(values.into_iter().map(Into::into).collect()))
    }

    pub fn association(path: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(path, ValueKind::Association(entity_type.into()))
    }

    pub fn embedded(path: impl Into<String>, fields: FieldSet) -> Self {
        Self::new(path, ValueKind::Embedded(fields))
    }

    pub fn map(path: impl Into<String>) -> Self {
        Self::new(path, ValueKind::Map)
    }

    pub fn with_converter(mut self, converter: impl ValueConverter + 'static) -> Self {
        self.converter = Some(Arc::new(converter));
        self
    }

    pub fn with_default_sub_field(mut self, name: impl Into<String>) -> Self {
        self.default_sub_field = Some(name.into());
        self
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("path", &self.path)
            .field("value_kind", &self.value_kind)
            .field("converter", &self.converter.is_some())
            .field("default_sub_field", &self.default_sub_field)
            .field("map_entry", &self.map_entry)
            .finish()
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        let same_converter = match (&self.converter, &other.converter) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.path == other.path
            && self.value_kind == other.value_kind
            && self.default_sub_field == other.default_sub_field
            && self.map_entry == other.map_entry
            && same_converter
    }
}

/// Named field descriptors, looked up ignoring case, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldSet {
    fields: Vec<(String, FieldDescriptor)>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`FieldSet::insert`].
    pub fn with(mut self, name: impl Into<String>, descriptor: FieldDescriptor) -> Self {
        self.insert(name, descriptor);
        self
    }

    /// Add a field, replacing any field with the same name.
    pub fn insert(&mut self, name: impl Into<String>, descriptor: FieldDescriptor) {
        let name = name.into();
        self.fields.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.fields.push((name, descriptor));
    }

    pub fn get(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, d)| d)
    }

    /// Field names as registered.
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldDescriptor)> {
        self.fields.iter().map(|(n, d)| (n.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
struct EntitySchema {
    fields: FieldSet,
    /// (alias, real path) pairs
    aliases: Vec<(String, String)>,
}

impl EntitySchema {
    /// Rewrite the longest alias that is a segment prefix of `path`.
    fn apply_alias(&self, path: &str) -> String {
        let best = self
            .aliases
            .iter()
            .filter(|(alias, _)| {
                path.get(..alias.len())
                    .is_some_and(|head| head.eq_ignore_ascii_case(alias))
                    && (path.len() == alias.len() || path[alias.len()..].starts_with('.'))
            })
            .max_by_key(|(alias, _)| alias.len());

        match best {
            Some((alias, real)) => format!("{}{}", real, &path[alias.len()..]),
            None => path.to_string(),
        }
    }
}

/// Field schemas for every entity type queries can target.
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    entities: HashMap<String, EntitySchema>,
}

impl FieldSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a query field `name` on `entity_type`.
    pub fn register_field(
        &mut self,
        entity_type: &str,
        name: impl Into<String>,
        descriptor: FieldDescriptor,
    ) -> &mut Self {
        self.entities
            .entry(entity_type.to_ascii_lowercase())
            .or_default()
            .fields
            .insert(name, descriptor);
        self
    }

    /// Register `alias` as another spelling of `real_path`. Aliases also
    /// apply as prefixes: `alias.x` resolves as `real_path.x`.
    pub fn register_alias(
        &mut self,
        entity_type: &str,
        alias: impl Into<String>,
        real_path: impl Into<String>,
    ) -> &mut Self {
        let alias = alias.into();
        let entity = self.entities.entry(entity_type.to_ascii_lowercase()).or_default();
        entity.aliases.retain(|(a, _)| !a.eq_ignore_ascii_case(&alias));
        entity.aliases.push((alias, real_path.into()));
        self
    }

    fn entity(&self, entity_type: &str) -> std::result::Result<&EntitySchema, FieldError> {
        self.entities
            .get(&entity_type.to_ascii_lowercase())
            .ok_or_else(|| FieldError::UnknownEntity(entity_type.to_string()))
    }

    /// Registered entity types, sorted.
    pub fn entity_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.entities.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn fields(&self, entity_type: &str) -> Option<&FieldSet> {
        self.entity(entity_type).ok().map(|e| &e.fields)
    }

    /// Resolve a dotted selector to the descriptor of its final field.
    ///
    /// The returned descriptor's `path` is the full dotted backend path.
    /// Map fields resolve to `Text` with the key appended to the path.
    pub fn resolve(&self, entity_type: &str, path: &str) -> std::result::Result<FieldDescriptor, FieldError> {
        let entity = self.entity(entity_type)?;
        let path = entity.apply_alias(path);
        debug!(entity_type, path = %path, "resolving field");

        let mut segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mut fields = &entity.fields;
        let mut backend: Vec<String> = Vec::new();
        let mut i = 0;

        while i < segments.len() {
            if segments.len() > MAX_PATH_DEPTH {
                return Err(FieldError::NotNavigable {
                    segment: segments[i].clone(),
                });
            }
            let segment = &segments[i];
            let descriptor = fields.get(segment).ok_or_else(|| FieldError::UnknownField {
                segment: segment.clone(),
                allowed: fields.names(),
            })?;
            backend.push(descriptor.path.clone());
            let last = i + 1 == segments.len();

            let next = match &descriptor.value_kind {
                ValueKind::Association(target) => &self.entity(target)?.fields,
                ValueKind::Embedded(nested) => nested,
                ValueKind::Map => {
                    if last {
                        return Err(FieldError::MissingSubField {
                            path: segments.join("."),
                            allowed: Vec::new(),
                        });
                    }
                    backend.push(segments[i + 1..].join("."));
                    return Ok(FieldDescriptor {
                        path: backend.join("."),
                        value_kind: ValueKind::Text,
                        converter: descriptor.converter.clone(),
                        default_sub_field: None,
                        map_entry: true,
                    });
                }
                _ => {
                    if !last {
                        return Err(FieldError::NotNavigable {
                            segment: segment.clone(),
                        });
                    }
                    return Ok(FieldDescriptor {
                        path: backend.join("."),
                        ..descriptor.clone()
                    });
                }
            };

            if last {
                match &descriptor.default_sub_field {
                    Some(default) => segments.push(default.clone()),
                    None => {
                        return Err(FieldError::MissingSubField {
                            path: segments.join("."),
                            allowed: next.names(),
                        });
                    }
                }
            }
            fields = next;
            i += 1;
        }

        // split('.') always yields at least one segment
        Err(FieldError::UnknownField {
            segment: path,
            allowed: entity.fields.names(),
        })
    }

    /// Selectors worth offering for completion on `entity_type`: top-level
    /// fields, one level of sub-fields, map prefixes (`attribute.`) and aliases.
    pub fn selectors(&self, entity_type: &str) -> Vec<String> {
        let Ok(entity) = self.entity(entity_type) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for (name, descriptor) in entity.fields.iter() {
            let nested = match &descriptor.value_kind {
                ValueKind::Association(target) => self.fields(target),
                ValueKind::Embedded(nested) => Some(nested),
                ValueKind::Map => {
                    out.push(format!("{}.", name));
                    continue;
                }
                _ => {
                    out.push(name.to_string());
                    continue;
                }
            };
            if descriptor.default_sub_field.is_some() {
                out.push(name.to_string());
            }
            for (sub, sub_descriptor) in nested.into_iter().flat_map(FieldSet::iter) {
                if !sub_descriptor.value_kind.is_navigable() {
                    out.push(format!("{}.{}", name, sub));
                }
            }
        }
        for (alias, _) in &entity.aliases {
            if !out.iter().any(|s| s.eq_ignore_ascii_case(alias)) {
                out.push(alias.clone());
            }
        }
        out
    }

    /// Load a schema from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse a schema from a TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: SchemaFile = toml::from_str(toml_str)
            .map_err(|e| Error::Config(format!("Failed to parse schema: {}", e)))?;

        let mut schema = Self::new();
        for (entity_type, entity) in file.entities {
            // Entity types without fields still count as registered
            schema.entities.entry(entity_type.to_ascii_lowercase()).or_default();
            for (name, def) in entity.fields {
                let descriptor = build_descriptor(&name, def)?;
                schema.register_field(&entity_type, name, descriptor);
            }
            for (alias, real) in entity.aliases {
                schema.register_alias(&entity_type, alias, real);
            }
        }
        Ok(schema)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    entities: BTreeMap<String, EntityDef>,
}

#[derive(Debug, Deserialize)]
struct EntityDef {
    #[serde(default)]
    fields: BTreeMap<String, FieldDef>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FieldDef {
    Kind(String),
    Full(FieldSpec),
}

#[derive(Debug, Deserialize)]
struct FieldSpec {
    path: Option<String>,
    kind: String,
    #[serde(default)]
    values: Vec<String>,
    entity: Option<String>,
    default: Option<String>,
    #[serde(default)]
    fields: BTreeMap<String, FieldDef>,
}

fn build_descriptor(name: &str, def: FieldDef) -> Result<FieldDescriptor> {
    let spec = match def {
        FieldDef::Kind(kind) => FieldSpec {
            path: None,
            kind,
            values: Vec::new(),
            entity: None,
            default: None,
            fields: BTreeMap::new(),
        },
        FieldDef::Full(spec) => spec,
    };
    let path = spec.path.unwrap_or_else(|| name.to_string());

    let value_kind = match spec.kind.to_ascii_lowercase().as_str() {
        "text" | "string" => ValueKind::Text,
        "number" => ValueKind::Number,
        "boolean" | "bool" => ValueKind::Boolean,
        "enum" => {
            if spec.values.is_empty() {
                return Err(Error::Config(format!("Enum field '{}' has no values", name)));
            }
            ValueKind::Enum(spec.values)
        }
        "association" => {
            let entity = spec
                .entity
                .ok_or_else(|| Error::Config(format!("Association field '{}' needs an 'entity'", name)))?;
            ValueKind::Association(entity)
        }
        "embedded" => {
            let mut nested = FieldSet::new();
            for (sub, sub_def) in spec.fields {
                let descriptor = build_descriptor(&sub, sub_def)?;
                nested.insert(sub, descriptor);
            }
            ValueKind::Embedded(nested)
        }
        "map" => ValueKind::Map,
        other => {
            return Err(Error::Config(format!(
                "Unknown kind '{}' for field '{}'",
                other, name
            )))
        }
    };

    let mut descriptor = FieldDescriptor::new(path, value_kind);
    descriptor.default_sub_field = spec.default;
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> FieldSchema {
        let mut schema = FieldSchema::new();
        schema
            .register_field("distributionset", "name", FieldDescriptor::text("name"))
            .register_field("distributionset", "version", FieldDescriptor::text("version"));
        schema
            .register_field("target", "name", FieldDescriptor::text("name"))
            .register_field("target", "namespace", FieldDescriptor::text("namespace"))
            .register_field(
                "target",
                "updatestatus",
                FieldDescriptor::enumeration("updateStatus", ["error", "in_sync", "pending"]),
            )
            .register_field(
                "target",
                "assignedds",
                FieldDescriptor::association("assignedDistributionSet", "distributionset")
                    .with_default_sub_field("name"),
            )
            .register_field(
                "target",
                "installedds",
                FieldDescriptor::association("installedDistributionSet", "distributionset"),
            )
            .register_field("target", "attribute", FieldDescriptor::map("controllerAttributes"))
            .register_field(
                "target",
                "metadata",
                FieldDescriptor::embedded(
                    "metadata",
                    FieldSet::new()
                        .with("key", FieldDescriptor::text("key"))
                        .with("value", FieldDescriptor::text("value")),
                ),
            );
        schema
    }

    #[test]
    fn test_resolve_simple_field() {
        let d = schema().resolve("target", "name").unwrap();
        assert_eq!(d.path, "name");
        assert_eq!(d.value_kind, ValueKind::Text);
    }

    #[test]
    fn test_resolve_ignores_case() {
        let d = schema().resolve("TARGET", "UpdateStatus").unwrap();
        assert_eq!(d.path, "updateStatus");
    }

    #[test]
    fn test_resolve_through_association() {
        let d = schema().resolve("target", "assignedds.version").unwrap();
        assert_eq!(d.path, "assignedDistributionSet.version");
    }

    #[test]
    fn test_resolve_default_sub_field() {
        let d = schema().resolve("target", "assignedds").unwrap();
        assert_eq!(d.path, "assignedDistributionSet.name");
    }

    #[test]
    fn test_association_without_default_needs_sub_field() {
        let err = schema().resolve("target", "installedds").unwrap_err();
        assert_eq!(
            err,
            FieldError::MissingSubField {
                path: "installedds".to_string(),
                allowed: vec!["name".to_string(), "version".to_string()],
            }
        );
    }

    #[test]
    fn test_resolve_embedded() {
        let d = schema().resolve("target", "metadata.key").unwrap();
        assert_eq!(d.path, "metadata.key");
    }

    #[test]
    fn test_resolve_map_key() {
        let d = schema().resolve("target", "attribute.device_type").unwrap();
        assert_eq!(d.path, "controllerAttributes.device_type");
        assert_eq!(d.value_kind, ValueKind::Text);
        assert!(d.map_entry);
        assert!(!schema().resolve("target", "name").unwrap().map_entry);
        assert!(schema().resolve("target", "attribute").is_err());
    }

    #[test]
    fn test_unknown_field_lists_allowed() {
        let err = schema().resolve("target", "assignedds.bogus").unwrap_err();
        assert_eq!(
            err,
            FieldError::UnknownField {
                segment: "bogus".to_string(),
                allowed: vec!["name".to_string(), "version".to_string()],
            }
        );
    }

    #[test]
    fn test_scalar_is_not_navigable() {
        let err = schema().resolve("target", "name.first").unwrap_err();
        assert_eq!(
            err,
            FieldError::NotNavigable {
                segment: "name".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_entity() {
        assert_eq!(
            schema().resolve("rollout", "name").unwrap_err(),
            FieldError::UnknownEntity("rollout".to_string())
        );
    }

    #[test]
    fn test_alias_whole_and_prefix() {
        let mut schema = schema();
        schema.register_alias("target", "ds", "assignedds");
        schema.register_alias("target", "ds.v", "assignedds.version");
        assert_eq!(schema.resolve("target", "ds").unwrap().path, "assignedDistributionSet.name");
        assert_eq!(
            schema.resolve("target", "DS.name").unwrap().path,
            "assignedDistributionSet.name"
        );
        assert_eq!(
            schema.resolve("target", "ds.v").unwrap().path,
            "assignedDistributionSet.version"
        );
        // "dsx" is not a segment prefix match
        assert!(schema.resolve("target", "dsx").is_err());
    }

    #[test]
    fn test_selectors() {
        let selectors = schema().selectors("target");
        assert!(selectors.contains(&"name".to_string()));
        assert!(selectors.contains(&"assignedds".to_string()));
        assert!(selectors.contains(&"assignedds.version".to_string()));
        assert!(!selectors.contains(&"installedds".to_string()));
        assert!(selectors.contains(&"installedds.name".to_string()));
        assert!(selectors.contains(&"attribute.".to_string()));
        assert!(selectors.contains(&"metadata.key".to_string()));
    }

    #[test]
    fn test_from_toml() {
        let toml = r#"
[entities.distributionset.fields]
name = "text"

[entities.target.fields]
name = "text"
lastrequest = { path = "lastTargetQuery", kind = "number" }
updatestatus = { path = "updateStatus", kind = "enum", values = ["error", "pending"] }
assignedds = { path = "assignedDistributionSet", kind = "association", entity = "distributionset", default = "name" }
attribute = { path = "controllerAttributes", kind = "map" }
meta = { kind = "embedded", fields = { key = "text" } }

[entities.target.aliases]
"ds" = "assignedds"
"#;
        let schema = FieldSchema::from_toml(toml).unwrap();
        assert_eq!(schema.entity_types(), vec!["distributionset", "target"]);
        assert_eq!(schema.resolve("target", "lastrequest").unwrap().value_kind, ValueKind::Number);
        assert_eq!(schema.resolve("target", "ds").unwrap().path, "assignedDistributionSet.name");
        assert_eq!(schema.resolve("target", "meta.key").unwrap().path, "meta.key");
        assert_eq!(
            schema.resolve("target", "updatestatus").unwrap().value_kind,
            ValueKind::Enum(vec!["error".to_string(), "pending".to_string()])
        );
    }

    #[test]
    fn test_from_toml_rejects_unknown_kind() {
        let toml = r#"
[entities.target.fields]
name = "blob"
"#;
        assert!(matches!(FieldSchema::from_toml(toml), Err(Error::Config(_))));
    }
}
