//! Validation of a document against a [`SchemaModel`].
//!
//! [`validate`] is total and free of side effects: every violated constraint
//! becomes one [`ErrorNode`] in the returned [`ErrorTree`], nothing is raised.

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::data::{
    coerce::{check_type, is_integral},
    model::SchemaModel,
    path::FieldPath,
    types::{FieldKind, PrimitiveType, SchemaField, Union},
};

/// The constraint an [`ErrorNode`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ConstraintKind {
    Required,
    Coercion,
    Minimum,
    Maximum,
    ExclusiveMinimum,
    ExclusiveMaximum,
    MultipleOf,
    MinLength,
    MaxLength,
    Pattern,
    Format,
    Enum,
    Union,
    MinItems,
    MaxItems,
    UniqueItems,
    MinProperties,
    MaxProperties,
    AdditionalProperties,
}

impl ConstraintKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKind::Required => "required",
            ConstraintKind::Coercion => "coercion",
            ConstraintKind::Minimum => "minimum",
            ConstraintKind::Maximum => "maximum",
            ConstraintKind::ExclusiveMinimum => "exclusiveMinimum",
            ConstraintKind::ExclusiveMaximum => "exclusiveMaximum",
            ConstraintKind::MultipleOf => "multipleOf",
            ConstraintKind::MinLength => "minLength",
            ConstraintKind::MaxLength => "maxLength",
            ConstraintKind::Pattern => "pattern",
            ConstraintKind::Format => "format",
            ConstraintKind::Enum => "enum",
            ConstraintKind::Union => "union",
            ConstraintKind::MinItems => "minItems",
            ConstraintKind::MaxItems => "maxItems",
            ConstraintKind::UniqueItems => "uniqueItems",
            ConstraintKind::MinProperties => "minProperties",
            ConstraintKind::MaxProperties => "maxProperties",
            ConstraintKind::AdditionalProperties => "additionalProperties",
        }
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One violated constraint at one path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNode {
    pub path: FieldPath,
    pub code: ConstraintKind,
    pub message: String,
}

impl fmt::Display for ErrorNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: [{}] {}", self.path, self.code, self.message)
    }
}

/// Current validation failures, keyed by path.
///
/// Paths iterate in the order the validator reached them: declaration order,
/// children before their container. Serializes as a flat list of nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorTree {
    nodes: BTreeMap<FieldPath, Vec<ErrorNode>>,
    order: Vec<FieldPath>,
}

impl ErrorTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, node: ErrorNode) {
        match self.nodes.get_mut(&node.path) {
            Some(nodes) => nodes.push(node),
            None => {
                self.order.push(node.path.clone());
                self.nodes.insert(node.path.clone(), vec![node]);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes across all paths.
    pub fn len(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn get(&self, path: &FieldPath) -> &[ErrorNode] {
        self.nodes.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, path: &FieldPath) -> Option<&ErrorNode> {
        self.get(path).first()
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.order.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ErrorNode> {
        self.order.iter().flat_map(|p| self.get(p))
    }

    /// Codes per path, handy for comparing trees.
    pub fn codes(&self) -> BTreeMap<FieldPath, Vec<ConstraintKind>> {
        self.nodes
            .iter()
            .map(|(p, nodes)| (p.clone(), nodes.iter().map(|n| n.code).collect()))
            .collect()
    }

    pub fn into_nodes(self) -> Vec<ErrorNode> {
        self.nodes().cloned().collect()
    }
}

impl Serialize for ErrorTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.nodes())
    }
}

/// Validate `instance` against `model`.
pub fn validate(model: &SchemaModel, instance: &Value) -> ErrorTree {
    let mut errors = ErrorTree::new();
    Validator { model }.field(model.root(), Some(instance), &FieldPath::root(), &mut errors);
    trace!("validation pass: {} error(s)", errors.len());
    errors
}

/// Unions nested deeper than this are not searched for a null member.
const MAX_UNION_DEPTH: usize = 16;

struct Validator<'m> {
    model: &'m SchemaModel,
}

impl Validator<'_> {
    fn field(&self, field: &SchemaField, value: Option<&Value>, path: &FieldPath, out: &mut ErrorTree) {
        let resolved = self.model.resolve(field);
        let nullable = field.nullable || resolved.nullable;

        let Some(value) = value else {
            if field.required {
                push(out, path, ConstraintKind::Required, "required field is missing".to_string());
            }
            return;
        };
        if value.is_null() {
            if nullable {
                return;
            }
            // A required field holding a null it cannot take counts as missing;
            // an optional one falls through to the type check.
            if field.required && !self.accepts_null(resolved, 0) {
                push(out, path, ConstraintKind::Required, "required field is null".to_string());
                return;
            }
        }
        if let Err(mismatch) = check_type(self.model, resolved, value) {
            push(out, path, ConstraintKind::Coercion, mismatch.message());
            return;
        }

        match &resolved.kind {
            FieldKind::Object => self.object(resolved, value, path, out),
            FieldKind::Array => self.array(resolved, value, path, out),
            FieldKind::Union(Union::Enum(values)) => {
                if !values.contains(value) {
                    push(out, path, ConstraintKind::Enum, format!("{value} is not one of {}", list(values)));
                }
            }
            FieldKind::Union(Union::OneOf(branches)) => {
                let matched = self.matching_branches(branches, value, path);
                if matched != 1 {
                    push(
                        out,
                        path,
                        ConstraintKind::Union,
                        format!("must match exactly one alternative, matched {matched}"),
                    );
                }
            }
            FieldKind::Union(Union::AnyOf(branches)) => {
                if self.matching_branches(branches, value, path) == 0 {
                    push(out, path, ConstraintKind::Union, "matches none of the alternatives".to_string());
                }
            }
            FieldKind::Primitive(_) => {}
        }

        if !resolved.kind.is_container() {
            self.scalar(resolved, value, path, out);
        }
    }

    /// Whether `null` is a legal value of `field` itself, as opposed to
    /// being allowed by a nullable wrapper.
    fn accepts_null(&self, field: &SchemaField, depth: usize) -> bool {
        if depth > MAX_UNION_DEPTH {
            return false;
        }
        match &field.kind {
            FieldKind::Primitive(PrimitiveType::Null | PrimitiveType::Any) => true,
            FieldKind::Union(Union::Enum(values)) => values.contains(&Value::Null),
            FieldKind::Union(Union::OneOf(branches) | Union::AnyOf(branches)) => branches.iter().any(|b| {
                let resolved = self.model.resolve(b);
                b.nullable || resolved.nullable || self.accepts_null(resolved, depth + 1)
            }),
            _ => false,
        }
    }

    fn matching_branches(&self, branches: &[SchemaField], value: &Value, path: &FieldPath) -> usize {
        branches
            .iter()
            .filter(|branch| {
                let mut scratch = ErrorTree::new();
                let mut branch = (*branch).clone();
                branch.required = true;
                self.field(&branch, Some(value), path, &mut scratch);
                scratch.is_empty()
            })
            .count()
    }

    fn object(&self, field: &SchemaField, value: &Value, path: &FieldPath, out: &mut ErrorTree) {
        let Value::Object(map) = value else {
            return;
        };
        for child in &field.children {
            self.field(child, map.get(&child.name), &path.join(child.name.as_str()), out);
        }

        let c = &field.constraints;
        let count = map.len() as u64;
        if let Some(min) = c.min_properties {
            if count < min {
                push(out, path, ConstraintKind::MinProperties, format!("needs at least {min} properties, has {count}"));
            }
        }
        if let Some(max) = c.max_properties {
            if count > max {
                push(out, path, ConstraintKind::MaxProperties, format!("allows at most {max} properties, has {count}"));
            }
        }
        if c.closed {
            let extra: Vec<&str> = map
                .keys()
                .filter(|k| field.child(k).is_none())
                .map(String::as_str)
                .collect();
            if !extra.is_empty() {
                push(
                    out,
                    path,
                    ConstraintKind::AdditionalProperties,
                    format!("unexpected properties: {}", extra.join(", ")),
                );
            }
        }
    }

    fn array(&self, field: &SchemaField, value: &Value, path: &FieldPath, out: &mut ErrorTree) {
        let Value::Array(items) = value else {
            return;
        };
        for (i, item) in items.iter().enumerate() {
            if let Some(schema) = field.item(i) {
                self.field(schema, Some(item), &path.join(i), out);
            }
        }

        let c = &field.constraints;
        let len = items.len() as u64;
        let min = c.min_items.or(field.tuple.then_some(field.children.len() as u64));
        if let Some(min) = min {
            if len < min {
                push(out, path, ConstraintKind::MinItems, format!("needs at least {min} items, has {len}"));
            }
        }
        if let Some(max) = c.max_items {
            if len > max {
                push(out, path, ConstraintKind::MaxItems, format!("allows at most {max} items, has {len}"));
            }
        }
        if c.unique_items {
            let duplicate = items
                .iter()
                .enumerate()
                .find_map(|(i, a)| items[..i].iter().position(|b| b == a).map(|j| (j, i)));
            if let Some((first, second)) = duplicate {
                push(
                    out,
                    path,
                    ConstraintKind::UniqueItems,
                    format!("items {first} and {second} are equal"),
                );
            }
        }
    }

    fn scalar(&self, field: &SchemaField, value: &Value, path: &FieldPath, out: &mut ErrorTree) {
        let c = &field.constraints;
        if let Some(n) = value.as_f64() {
            if let Some(min) = c.minimum {
                if n < min {
                    push(out, path, ConstraintKind::Minimum, format!("{n} is less than the minimum {min}"));
                }
            }
            if let Some(max) = c.maximum {
                if n > max {
                    push(out, path, ConstraintKind::Maximum, format!("{n} is greater than the maximum {max}"));
                }
            }
            if let Some(min) = c.exclusive_minimum {
                if n <= min {
                    push(out, path, ConstraintKind::ExclusiveMinimum, format!("{n} must be greater than {min}"));
                }
            }
            if let Some(max) = c.exclusive_maximum {
                if n >= max {
                    push(out, path, ConstraintKind::ExclusiveMaximum, format!("{n} must be less than {max}"));
                }
            }
            if let Some(step) = c.multiple_of {
                if !is_multiple(n, step, value) {
                    push(out, path, ConstraintKind::MultipleOf, format!("{n} is not a multiple of {step}"));
                }
            }
        }

        if let Value::String(s) = value {
            let len = s.chars().count() as u64;
            if let Some(min) = c.min_length {
                if len < min {
                    push(out, path, ConstraintKind::MinLength, format!("needs at least {min} characters, has {len}"));
                }
            }
            if let Some(max) = c.max_length {
                if len > max {
                    push(out, path, ConstraintKind::MaxLength, format!("allows at most {max} characters, has {len}"));
                }
            }
            if let Some(pattern) = &c.pattern {
                if let Some(re) = self.model.pattern(pattern) {
                    if !re.is_match(s) {
                        push(out, path, ConstraintKind::Pattern, format!("does not match pattern {pattern}"));
                    }
                }
            }
            if let Some(format) = &c.format {
                if !format_matches(format, s) {
                    push(out, path, ConstraintKind::Format, format!("{s:?} is not a valid {format}"));
                }
            }
        }
    }
}

fn push(out: &mut ErrorTree, path: &FieldPath, code: ConstraintKind, message: String) {
    out.push(ErrorNode {
        path: path.clone(),
        code,
        message,
    });
}

fn list(values: &[Value]) -> String {
    let parts: Vec<String> = values.iter().map(Value::to_string).collect();
    format!("[{}]", parts.join(", "))
}

fn is_multiple(n: f64, step: f64, value: &Value) -> bool {
    if is_integral(value) && step.fract() == 0.0 {
        return n % step == 0.0;
    }
    let ratio = n / step;
    (ratio - ratio.round()).abs() < 1e-9
}

/// Check the formats this engine understands; unknown formats always pass.
fn format_matches(format: &str, s: &str) -> bool {
    match format {
        "date" => NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok(),
        "date-time" => DateTime::parse_from_rfc3339(s).is_ok(),
        "time" => NaiveTime::parse_from_str(s, "%H:%M:%S").is_ok()
            || NaiveTime::parse_from_str(s, "%H:%M:%S%.f").is_ok(),
        "email" => is_email(s),
        f if f.contains("color") => is_hex_color(s),
        _ => true,
    }
}

fn is_email(s: &str) -> bool {
    let Some((local, domain)) = s.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.split('.').count() >= 2
        && domain.split('.').all(|part| !part.is_empty())
        && !s.chars().any(char::is_whitespace)
}

fn is_hex_color(s: &str) -> bool {
    match s.strip_prefix('#') {
        Some(hex) => matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}
