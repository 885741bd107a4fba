use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::data::{
    path::{FieldPath, PathSegment},
    schema::SchemaError,
    types::{FieldKind, SchemaField},
};

/// Normalized, immutable form of one schema document.
///
/// `$ref` sites are links into [`SchemaModel::references`]; use
/// [`SchemaModel::resolve`] before looking at a field's children.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaModel {
    root: SchemaField,
    references: BTreeMap<String, SchemaField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip)]
    patterns: HashMap<String, Regex>,
}

impl PartialEq for SchemaModel {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.references == other.references
            && self.id == other.id
            && self.title == other.title
    }
}

impl SchemaModel {
    pub(crate) fn from_parts(
        root: SchemaField,
        references: BTreeMap<String, SchemaField>,
        patterns: HashMap<String, Regex>,
        id: Option<String>,
        title: Option<String>,
    ) -> Self {
        Self {
            root,
            references,
            id,
            title,
            patterns,
        }
    }

    /// Map the schema `schemars` generates for `T`.
    pub fn for_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let schema = schemars::schema_for!(T);
        let raw = serde_json::to_value(&schema).map_err(|e| SchemaError::InvalidSchema {
            path: "#".to_string(),
            reason: e.to_string(),
        })?;
        Self::try_from(&raw)
    }

    pub fn root(&self) -> &SchemaField {
        &self.root
    }

    /// The schema's `$id`.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn references(&self) -> &BTreeMap<String, SchemaField> {
        &self.references
    }

    pub fn reference(&self, name: &str) -> Option<&SchemaField> {
        self.references.get(name)
    }

    /// Follow a link to its table entry; non-link fields are returned as is.
    pub fn resolve<'a>(&'a self, field: &'a SchemaField) -> &'a SchemaField {
        field
            .reference
            .as_deref()
            .and_then(|name| self.references.get(name))
            .unwrap_or(field)
    }

    /// Compiled regex for a `pattern` keyword seen while mapping.
    pub fn pattern(&self, pattern: &str) -> Option<&Regex> {
        self.patterns.get(pattern)
    }

    /// Walk the model along `path`. Indices step into array items, keys into
    /// object properties.
    pub fn field_at(&self, path: &FieldPath) -> Option<&SchemaField> {
        let mut field = &self.root;
        for seg in path.segments() {
            let container = self.resolve(field);
            field = match (&container.kind, seg) {
                (FieldKind::Object, PathSegment::Key(key)) => container.child(key)?,
                (FieldKind::Array, PathSegment::Index(i)) => container.item(*i)?,
                _ => return None,
            };
        }
        Some(field)
    }

    /// Default value of a field, or `None` when the field has no default and
    /// should be left absent.
    ///
    /// Explicit `default` wins. Objects expand their children's defaults when
    /// `expand` is set (root, array elements, required properties); arrays
    /// start empty. Re-entering a reference already on the expansion stack
    /// stops the expansion.
    pub fn default_value(&self, field: &SchemaField, expand: bool) -> Option<Value> {
        let mut stack = Vec::new();
        self.default_inner(field, expand, &mut stack)
    }

    fn default_inner<'a>(
        &'a self,
        field: &'a SchemaField,
        expand: bool,
        stack: &mut Vec<&'a str>,
    ) -> Option<Value> {
        if let Some(default) = &field.default {
            return Some(default.clone());
        }
        if let Some(name) = field.reference.as_deref() {
            if stack.contains(&name) {
                return None;
            }
            stack.push(name);
            let out = self.default_inner(self.resolve(field), expand, stack);
            stack.pop();
            return out;
        }
        match &field.kind {
            FieldKind::Object if expand => {
                let mut map = Map::new();
                for child in &field.children {
                    if let Some(v) = self.default_inner(child, child.required, stack) {
                        map.insert(child.name.clone(), v);
                    }
                }
                Some(Value::Object(map))
            }
            FieldKind::Array if field.tuple => {
                let mut items = Vec::with_capacity(field.children.len());
                for child in &field.children {
                    items.push(self.default_inner(child, true, stack).unwrap_or(Value::Null));
                }
                Some(Value::Array(items))
            }
            FieldKind::Array => Some(Value::Array(Vec::new())),
            _ => None,
        }
    }

    /// Default for a new element of the array at `array`.
    pub fn default_element(&self, array: &SchemaField, index: usize) -> Value {
        self.resolve(array)
            .item(index)
            .and_then(|item| self.default_value(item, true))
            .unwrap_or(Value::Null)
    }
}

/// Identity used to share models between sessions.
fn schema_identity(raw: &Value) -> String {
    match raw.get("$id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => raw.to_string(),
    }
}

/// Maps each schema document once and hands out shared models.
#[derive(Debug, Default)]
pub struct SchemaCache {
    models: HashMap<String, Arc<SchemaModel>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Model for `raw`, mapping it on first use.
    pub fn get_or_map(&mut self, raw: &Value) -> Result<Arc<SchemaModel>, SchemaError> {
        let id = schema_identity(raw);
        if let Some(model) = self.models.get(&id) {
            trace!("schema cache hit for {}", short_id(&id));
            return Ok(model.clone());
        }
        let model = Arc::new(SchemaModel::try_from(raw)?);
        debug!("schema cache: mapped {}", short_id(&id));
        self.models.insert(id, model.clone());
        Ok(model)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn clear(&mut self) {
        self.models.clear();
    }
}

fn short_id(id: &str) -> &str {
    match id.char_indices().nth(48) {
        Some((i, _)) => &id[..i],
        None => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows_schema() -> Value {
        json!({
            "type": "object",
            "required": ["rows"],
            "properties": {
                "rows": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {"type": "string", "default": "unnamed"},
                            "size": {"type": "integer"},
                            "meta": {"type": "object", "properties": {"x": {"type": "integer", "default": 1}}}
                        }
                    }
                }
            }
        })
    }

    #[test]
    fn test_field_at_walks_arrays_and_objects() {
        let model = SchemaModel::try_from(&rows_schema()).unwrap();
        let name = model.field_at(&FieldPath::parse("rows.3.name")).unwrap();
        assert_eq!(name.name, "name");
        assert!(model.field_at(&FieldPath::parse("rows.name")).is_none());
        assert!(model.field_at(&FieldPath::parse("missing")).is_none());
    }

    #[test]
    fn test_defaults_skip_optional_objects() {
        let model = SchemaModel::try_from(&rows_schema()).unwrap();
        assert_eq!(model.default_value(model.root(), true), Some(json!({"rows": []})));
        let rows = model.root().child("rows").unwrap();
        assert_eq!(model.default_element(rows, 0), json!({"name": "unnamed"}));
    }

    #[test]
    fn test_recursive_default_terminates() {
        let model = SchemaModel::try_from(&json!({
            "$defs": {
                "Node": {
                    "type": "object",
                    "required": ["next"],
                    "properties": {"next": {"$ref": "#/$defs/Node"}, "v": {"type": "integer", "default": 0}}
                }
            },
            "$ref": "#/$defs/Node"
        }))
        .unwrap();
        assert_eq!(model.default_value(model.root(), true), Some(json!({"v": 0})));
    }

    #[test]
    fn test_cache_shares_models_by_id() {
        let mut cache = SchemaCache::new();
        let a = cache.get_or_map(&json!({"$id": "urn:a", "type": "string"})).unwrap();
        let b = cache.get_or_map(&json!({"$id": "urn:a", "type": "string"})).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        cache.get_or_map(&json!({"type": "integer"})).unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Probe {
        /// Radius in metres.
        radius: f64,
        label: Option<String>,
    }

    #[test]
    fn test_for_type_maps_derived_schema() {
        let model = SchemaModel::for_type::<Probe>().unwrap();
        let radius = model.root().child("radius").unwrap();
        assert!(radius.required);
        assert_eq!(radius.kind, FieldKind::Primitive(crate::data::types::PrimitiveType::Number));
        let label = model.root().child("label").unwrap();
        assert!(label.nullable);
        assert!(!label.required);
    }
}
