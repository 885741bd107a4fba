use std::collections::{BTreeMap, HashMap, HashSet};

use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::data::{
    model::SchemaModel,
    types::{Constraints, FieldKind, PrimitiveType, SchemaField, Union},
};

/// Structural problems found while mapping a raw schema.
///
/// `path` is the JSON pointer of the offending node inside the schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("unresolvable reference `{reference}` at {path}")]
    UnresolvedRef { path: String, reference: String },

    #[error("malformed `{keyword}` at {path}: {reason}")]
    MalformedConstraint {
        path: String,
        keyword: String,
        reason: String,
    },

    #[error("union at {path} has no branches")]
    EmptyUnion { path: String },

    #[error("invalid schema at {path}: {reason}")]
    InvalidSchema { path: String, reason: String },
}

/// Keywords that describe the field at a `$ref`/`allOf` site rather than the
/// referenced body.
const ANNOTATION_KEYS: &[&str] = &[
    "title",
    "description",
    "default",
    "readOnly",
    "disabled",
    "x-widget",
    "autoui",
    "examples",
];

/// Keys that may sit beside `$ref` besides annotations.
const REF_SITE_KEYS: &[&str] = &["$ref", "$schema", "$id", "$comment", "$defs", "definitions"];

/// Follow `$ref` aliases when peeking at a body.
const MAX_ALIAS_HOPS: usize = 32;

/// Map a raw JSON Schema document into a [`SchemaModel`].
pub fn map(raw: &Value) -> Result<SchemaModel, SchemaError> {
    SchemaModel::try_from(raw)
}

impl TryFrom<&Value> for SchemaModel {
    type Error = SchemaError;

    fn try_from(raw: &Value) -> Result<Self, Self::Error> {
        let mut mapper = Mapper {
            raw_root: raw,
            refs: BTreeMap::new(),
            in_progress: HashSet::new(),
            patterns: HashMap::new(),
        };
        let mut root = mapper.map_node(raw, "", "#")?;
        root.required = true;

        let Mapper { mut refs, patterns, .. } = mapper;
        let kinds: BTreeMap<String, FieldKind> = refs
            .iter()
            .map(|(name, field)| (name.clone(), field.kind.clone()))
            .collect();
        link_kinds(&mut root, &kinds);
        for field in refs.values_mut() {
            link_kinds(field, &kinds);
        }

        let id = raw.get("$id").and_then(Value::as_str).map(String::from);
        let title = raw.get("title").and_then(Value::as_str).map(String::from);
        debug!(
            "mapped schema {:?}: {} reference(s), {} pattern(s)",
            title.as_deref().unwrap_or("<untitled>"),
            refs.len(),
            patterns.len()
        );
        Ok(SchemaModel::from_parts(root, refs, patterns, id, title))
    }
}

/// Copy the referenced entry's kind onto every link so consumers can match on
/// `kind` without resolving. The table is final here, so this terminates.
fn link_kinds(field: &mut SchemaField, kinds: &BTreeMap<String, FieldKind>) {
    if let Some(name) = &field.reference {
        if let Some(kind) = kinds.get(name) {
            field.kind = kind.clone();
        }
        return;
    }
    for child in &mut field.children {
        link_kinds(child, kinds);
    }
    if let FieldKind::Union(Union::OneOf(branches) | Union::AnyOf(branches)) = &mut field.kind {
        for branch in branches {
            link_kinds(branch, kinds);
        }
    }
}

struct Mapper<'a> {
    raw_root: &'a Value,
    refs: BTreeMap<String, SchemaField>,
    in_progress: HashSet<String>,
    patterns: HashMap<String, Regex>,
}

impl Mapper<'_> {
    fn map_node(&mut self, node: &Value, name: &str, loc: &str) -> Result<SchemaField, SchemaError> {
        let obj = match node {
            Value::Object(obj) => obj,
            Value::Bool(true) => {
                return Ok(SchemaField::new(name, FieldKind::Primitive(PrimitiveType::Any)));
            }
            other => {
                return Err(SchemaError::InvalidSchema {
                    path: loc.to_string(),
                    reason: format!("expected a schema object, got {other}"),
                });
            }
        };

        if let Some(all_of) = obj.get("allOf") {
            let parts = all_of.as_array().ok_or_else(|| SchemaError::InvalidSchema {
                path: format!("{loc}/allOf"),
                reason: "allOf must be an array".to_string(),
            })?;
            let mut base = obj.clone();
            base.remove("allOf");
            if parts.len() == 1 && parts[0].get("$ref").is_some() && !has_structure(&base) {
                let site = merge_site(&base, &parts[0]);
                return self.map_node(&Value::Object(site), name, loc);
            }
            let merged = self.flatten_all_of(base, parts, loc)?;
            return self.map_node(&Value::Object(merged), name, loc);
        }

        if let Some(reference) = obj.get("$ref") {
            let reference = reference.as_str().ok_or_else(|| SchemaError::InvalidSchema {
                path: format!("{loc}/$ref"),
                reason: "$ref must be a string".to_string(),
            })?;
            let sibling = obj
                .keys()
                .find(|k| !REF_SITE_KEYS.contains(&k.as_str()) && !ANNOTATION_KEYS.contains(&k.as_str()));
            if let Some(key) = sibling {
                return Err(SchemaError::InvalidSchema {
                    path: format!("{loc}/{key}"),
                    reason: format!("`{key}` beside `$ref` would be ignored; move it into an allOf with the reference"),
                });
            }
            let key = self.ensure_ref(reference, loc)?;
            let mut field = SchemaField::new(name, FieldKind::Primitive(PrimitiveType::Any));
            field.reference = Some(key);
            self.apply_annotations(&mut field, obj);
            return Ok(field);
        }

        // Nullable wrappers: `type: [T, "null"]` and `anyOf/oneOf: [.., {type: null}]`.
        if let Some(Value::Array(types)) = obj.get("type") {
            return self.map_type_list(obj, types, name, loc);
        }
        for keyword in ["anyOf", "oneOf"] {
            if let Some(branches) = obj.get(keyword) {
                return self.map_union(obj, keyword, branches, name, loc);
            }
        }

        let mut field = if let Some(values) = obj.get("enum") {
            let values = values.as_array().ok_or_else(|| SchemaError::InvalidSchema {
                path: format!("{loc}/enum"),
                reason: "enum must be an array".to_string(),
            })?;
            if values.is_empty() {
                return Err(SchemaError::EmptyUnion {
                    path: format!("{loc}/enum"),
                });
            }
            SchemaField::new(name, FieldKind::Union(Union::Enum(values.clone())))
        } else if let Some(value) = obj.get("const") {
            SchemaField::new(name, FieldKind::Union(Union::Enum(vec![value.clone()])))
        } else {
            match declared_type(obj) {
                Some("object") => self.map_object(obj, name, loc)?,
                Some("array") => self.map_array(obj, name, loc)?,
                Some(t) => SchemaField::new(name, FieldKind::Primitive(PrimitiveType::from_name(t))),
                None if obj.contains_key("properties") => self.map_object(obj, name, loc)?,
                None if obj.contains_key("items") || obj.contains_key("prefixItems") => {
                    self.map_array(obj, name, loc)?
                }
                None => SchemaField::new(name, FieldKind::Primitive(PrimitiveType::Any)),
            }
        };

        field.constraints = self.constraints(obj, loc)?;
        self.apply_annotations(&mut field, obj);
        Ok(field)
    }

    fn map_object(
        &mut self,
        obj: &Map<String, Value>,
        name: &str,
        loc: &str,
    ) -> Result<SchemaField, SchemaError> {
        let mut field = SchemaField::new(name, FieldKind::Object);
        let required: Vec<&str> = match obj.get("required") {
            None => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str().ok_or_else(|| SchemaError::InvalidSchema {
                        path: format!("{loc}/required"),
                        reason: format!("required entries must be strings, got {n}"),
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(SchemaError::InvalidSchema {
                    path: format!("{loc}/required"),
                    reason: format!("required must be an array, got {other}"),
                });
            }
        };

        match obj.get("properties") {
            None => {}
            Some(Value::Object(props)) => {
                for (key, sub) in props {
                    let mut child = self.map_node(sub, key, &format!("{loc}/properties/{key}"))?;
                    child.required = required.contains(&key.as_str());
                    field.children.push(child);
                }
            }
            Some(other) => {
                return Err(SchemaError::InvalidSchema {
                    path: format!("{loc}/properties"),
                    reason: format!("properties must be an object, got {other}"),
                });
            }
        }
        Ok(field)
    }

    fn map_array(
        &mut self,
        obj: &Map<String, Value>,
        name: &str,
        loc: &str,
    ) -> Result<SchemaField, SchemaError> {
        let mut field = SchemaField::new(name, FieldKind::Array);
        if let Some(prefix) = obj.get("prefixItems") {
            let prefix = prefix.as_array().ok_or_else(|| SchemaError::InvalidSchema {
                path: format!("{loc}/prefixItems"),
                reason: "prefixItems must be an array".to_string(),
            })?;
            field.tuple = true;
            for (i, sub) in prefix.iter().enumerate() {
                let mut child = self.map_node(sub, &i.to_string(), &format!("{loc}/prefixItems/{i}"))?;
                child.required = true;
                field.children.push(child);
            }
        } else {
            let mut item = match obj.get("items") {
                Some(sub) => self.map_node(sub, "items", &format!("{loc}/items"))?,
                None => SchemaField::new("items", FieldKind::Primitive(PrimitiveType::Any)),
            };
            item.required = true;
            field.children.push(item);
        }
        Ok(field)
    }

    fn map_type_list(
        &mut self,
        obj: &Map<String, Value>,
        types: &[Value],
        name: &str,
        loc: &str,
    ) -> Result<SchemaField, SchemaError> {
        let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
        if names.len() != types.len() {
            return Err(SchemaError::InvalidSchema {
                path: format!("{loc}/type"),
                reason: "type entries must be strings".to_string(),
            });
        }
        let nullable = names.contains(&"null");
        let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();

        let mut field = match non_null.as_slice() {
            [] => {
                let mut single = obj.clone();
                single.insert("type".into(), Value::from("null"));
                self.map_node(&Value::Object(single), name, loc)?
            }
            [one] => {
                let mut single = obj.clone();
                single.insert("type".into(), Value::from(*one));
                self.map_node(&Value::Object(single), name, loc)?
            }
            many => {
                let mut branches = Vec::with_capacity(many.len());
                for (i, t) in many.iter().enumerate() {
                    let mut branch = obj.clone();
                    branch.insert("type".into(), Value::from(*t));
                    for key in ANNOTATION_KEYS {
                        branch.remove(*key);
                    }
                    branches.push(self.map_node(&Value::Object(branch), &i.to_string(), &format!("{loc}/type/{i}"))?);
                }
                let mut field = SchemaField::new(name, FieldKind::Union(Union::AnyOf(branches)));
                self.apply_annotations(&mut field, obj);
                field
            }
        };
        field.nullable |= nullable;
        Ok(field)
    }

    fn map_union(
        &mut self,
        obj: &Map<String, Value>,
        keyword: &str,
        branches: &Value,
        name: &str,
        loc: &str,
    ) -> Result<SchemaField, SchemaError> {
        let branches = branches.as_array().ok_or_else(|| SchemaError::InvalidSchema {
            path: format!("{loc}/{keyword}"),
            reason: format!("{keyword} must be an array"),
        })?;
        if branches.is_empty() {
            return Err(SchemaError::EmptyUnion {
                path: format!("{loc}/{keyword}"),
            });
        }
        let is_null = |b: &&Value| b.get("type").and_then(Value::as_str) == Some("null");
        let nullable = branches.iter().any(|b| is_null(&b));
        let non_null: Vec<&Value> = branches.iter().filter(|b| !is_null(b)).collect();

        let mut base = obj.clone();
        base.remove(keyword);

        let mut field = match non_null.as_slice() {
            [] => {
                base.insert("type".into(), Value::from("null"));
                self.map_node(&Value::Object(base), name, loc)?
            }
            [only] if nullable => {
                let site = merge_site(&base, only);
                self.map_node(&Value::Object(site), name, loc)?
            }
            _ => {
                let mut mapped = Vec::with_capacity(non_null.len());
                for (i, branch) in non_null.iter().enumerate() {
                    mapped.push(self.map_node(branch, &i.to_string(), &format!("{loc}/{keyword}/{i}"))?);
                }
                let union = if keyword == "oneOf" {
                    Union::OneOf(mapped)
                } else {
                    Union::AnyOf(mapped)
                };
                let mut field = SchemaField::new(name, FieldKind::Union(union));
                field.constraints = self.constraints(&base, loc)?;
                self.apply_annotations(&mut field, &base);
                field
            }
        };
        field.nullable |= nullable;
        Ok(field)
    }

    /// Merge `allOf` parts into one node. Keys already on the node win;
    /// `properties` and `required` are unioned.
    fn flatten_all_of(
        &mut self,
        mut base: Map<String, Value>,
        parts: &[Value],
        loc: &str,
    ) -> Result<Map<String, Value>, SchemaError> {
        for (i, part) in parts.iter().enumerate() {
            let part_loc = format!("{loc}/allOf/{i}");
            let body = self.peek_body(part, &part_loc)?;
            let Some(body) = body.as_object() else {
                return Err(SchemaError::InvalidSchema {
                    path: part_loc,
                    reason: "allOf entries must be schema objects".to_string(),
                });
            };
            for (key, value) in body {
                match (key.as_str(), base.get_mut(key)) {
                    ("properties", Some(Value::Object(existing))) => {
                        if let Value::Object(extra) = value {
                            for (k, v) in extra {
                                existing.entry(k.clone()).or_insert_with(|| v.clone());
                            }
                        }
                    }
                    ("required", Some(Value::Array(existing))) => {
                        if let Value::Array(extra) = value {
                            for v in extra {
                                if !existing.contains(v) {
                                    existing.push(v.clone());
                                }
                            }
                        }
                    }
                    (_, Some(_)) => {}
                    (_, None) => {
                        base.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        Ok(base)
    }

    /// Resolve a node through `$ref` aliases to the raw body it stands for.
    fn peek_body(&self, node: &Value, loc: &str) -> Result<Value, SchemaError> {
        let mut current = node.clone();
        for _ in 0..MAX_ALIAS_HOPS {
            let Some(reference) = current.get("$ref").and_then(Value::as_str) else {
                return Ok(current);
            };
            let (_, body) = self.lookup(reference, loc)?;
            current = body.clone();
        }
        Err(SchemaError::InvalidSchema {
            path: loc.to_string(),
            reason: "reference alias chain too long".to_string(),
        })
    }

    fn lookup<'r>(&'r self, reference: &str, loc: &str) -> Result<(String, &'r Value), SchemaError> {
        let unresolved = || SchemaError::UnresolvedRef {
            path: loc.to_string(),
            reference: reference.to_string(),
        };
        if reference == "#" {
            return Ok(("#".to_string(), self.raw_root));
        }
        let pointer = reference.strip_prefix('#').ok_or_else(unresolved)?;
        let body = self.raw_root.pointer(pointer).ok_or_else(unresolved)?;
        let key = pointer
            .strip_prefix("/$defs/")
            .or_else(|| pointer.strip_prefix("/definitions/"))
            .filter(|name| !name.contains('/'))
            .map(String::from)
            .unwrap_or_else(|| reference.to_string());
        Ok((key, body))
    }

    /// Map the body behind `reference` into the table once, returning its key.
    fn ensure_ref(&mut self, reference: &str, loc: &str) -> Result<String, SchemaError> {
        let (key, body) = self.lookup(reference, loc)?;
        if self.refs.contains_key(&key) || self.in_progress.contains(&key) {
            return Ok(key);
        }
        let body = body.clone();
        self.in_progress.insert(key.clone());
        let mut field = self.map_node(&body, &key, reference)?;
        self.in_progress.remove(&key);
        field.required = false;
        trace!("resolved reference {reference} as `{key}`");
        self.refs.insert(key.clone(), field);
        Ok(key)
    }

    fn apply_annotations(&self, field: &mut SchemaField, obj: &Map<String, Value>) {
        if let Some(title) = obj.get("title").and_then(Value::as_str) {
            field.title = Some(title.to_string());
        }
        if let Some(description) = obj.get("description").and_then(Value::as_str) {
            field.description = Some(description.to_string());
        }
        if let Some(default) = obj.get("default") {
            field.default = Some(default.clone());
        }
        let flag = |key: &str| obj.get(key).and_then(Value::as_bool).unwrap_or(false);
        field.read_only |= flag("readOnly") || flag("disabled");
        field.widget = obj
            .get("x-widget")
            .or_else(|| obj.get("autoui"))
            .and_then(Value::as_str)
            .map(String::from)
            .or(field.widget.take());
        if let Some(Value::Array(examples)) = obj.get("examples") {
            field.examples = examples.clone();
        }
    }

    fn constraints(&mut self, obj: &Map<String, Value>, loc: &str) -> Result<Constraints, SchemaError> {
        let number = |key: &str| -> Result<Option<f64>, SchemaError> {
            match obj.get(key) {
                None => Ok(None),
                Some(Value::Number(n)) => Ok(n.as_f64()),
                Some(other) => Err(malformed(loc, key, format!("expected a number, got {other}"))),
            }
        };
        let count = |key: &str| -> Result<Option<u64>, SchemaError> {
            match obj.get(key) {
                None => Ok(None),
                Some(v) => v
                    .as_u64()
                    .map(Some)
                    .ok_or_else(|| malformed(loc, key, format!("expected a non-negative integer, got {v}"))),
            }
        };

        let mut c = Constraints {
            minimum: number("minimum")?,
            maximum: number("maximum")?,
            multiple_of: number("multipleOf")?,
            min_length: count("minLength")?,
            max_length: count("maxLength")?,
            min_items: count("minItems")?,
            max_items: count("maxItems")?,
            min_properties: count("minProperties")?,
            max_properties: count("maxProperties")?,
            unique_items: obj.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false),
            closed: obj.get("additionalProperties") == Some(&Value::Bool(false)),
            format: obj.get("format").and_then(Value::as_str).map(String::from),
            ..Constraints::default()
        };

        // Draft 4 spells exclusivity as a boolean beside minimum/maximum.
        match obj.get("exclusiveMinimum") {
            Some(Value::Bool(true)) => c.exclusive_minimum = c.minimum.take(),
            Some(Value::Bool(false)) | None => {}
            Some(_) => c.exclusive_minimum = number("exclusiveMinimum")?,
        }
        match obj.get("exclusiveMaximum") {
            Some(Value::Bool(true)) => c.exclusive_maximum = c.maximum.take(),
            Some(Value::Bool(false)) | None => {}
            Some(_) => c.exclusive_maximum = number("exclusiveMaximum")?,
        }

        if let (Some(lo), Some(hi)) = (c.minimum, c.maximum) {
            if lo > hi {
                return Err(malformed(loc, "minimum", format!("minimum {lo} exceeds maximum {hi}")));
            }
        }
        if let (Some(lo), Some(hi)) = (c.exclusive_minimum, c.exclusive_maximum) {
            if lo >= hi {
                return Err(malformed(
                    loc,
                    "exclusiveMinimum",
                    format!("exclusiveMinimum {lo} is not below exclusiveMaximum {hi}"),
                ));
            }
        }
        if let Some(m) = c.multiple_of {
            if m <= 0.0 {
                return Err(malformed(loc, "multipleOf", format!("must be positive, got {m}")));
            }
        }
        for (lo_key, lo, hi_key, hi) in [
            ("minLength", c.min_length, "maxLength", c.max_length),
            ("minItems", c.min_items, "maxItems", c.max_items),
            ("minProperties", c.min_properties, "maxProperties", c.max_properties),
        ] {
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    return Err(malformed(loc, lo_key, format!("{lo_key} {lo} exceeds {hi_key} {hi}")));
                }
            }
        }

        match obj.get("pattern") {
            None => {}
            Some(Value::String(pattern)) => {
                if !self.patterns.contains_key(pattern) {
                    let re = Regex::new(pattern)
                        .map_err(|e| malformed(loc, "pattern", e.to_string()))?;
                    self.patterns.insert(pattern.clone(), re);
                }
                c.pattern = Some(pattern.clone());
            }
            Some(other) => {
                return Err(malformed(loc, "pattern", format!("expected a string, got {other}")));
            }
        }
        Ok(c)
    }
}

fn malformed(loc: &str, keyword: &str, reason: String) -> SchemaError {
    SchemaError::MalformedConstraint {
        path: loc.to_string(),
        keyword: keyword.to_string(),
        reason,
    }
}

fn declared_type(obj: &Map<String, Value>) -> Option<&str> {
    obj.get("type").and_then(Value::as_str)
}

/// Whether a node declares anything beyond annotations.
fn has_structure(obj: &Map<String, Value>) -> bool {
    obj.keys().any(|k| !ANNOTATION_KEYS.contains(&k.as_str()))
}

/// A branch merged with the annotations of the site that wraps it.
fn merge_site(site: &Map<String, Value>, branch: &Value) -> Map<String, Value> {
    let mut merged = branch.as_object().cloned().unwrap_or_default();
    for (key, value) in site {
        merged.insert(key.clone(), value.clone());
    }
    merged
}
