use serde_json::{Number, Value};

use crate::data::{
    model::SchemaModel,
    types::{FieldKind, PrimitiveType, SchemaField, Union},
};

/// A value that does not have the shape its field declares.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeMismatch {
    pub expected: String,
    pub actual: String,
}

impl TypeMismatch {
    fn new(expected: impl Into<String>, value: &Value) -> Self {
        Self {
            expected: expected.into(),
            actual: describe(value),
        }
    }

    pub fn message(&self) -> String {
        format!("expected {}, got {}", self.expected, self.actual)
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => format!("boolean {b}"),
        Value::Number(n) => format!("number {n}"),
        Value::String(s) => format!("string {s:?}"),
        Value::Array(a) => format!("array of {}", a.len()),
        Value::Object(_) => "object".to_string(),
    }
}

/// Convert raw host input towards the field's declared type.
///
/// Input that cannot be converted is returned untouched; the validator then
/// reports it as a type mismatch.
pub fn coerce(model: &SchemaModel, field: &SchemaField, raw: Value) -> Value {
    let resolved = model.resolve(field);
    let nullable = field.nullable || resolved.nullable;

    if let Value::String(s) = &raw {
        let is_string_field = matches!(resolved.kind, FieldKind::Primitive(PrimitiveType::String));
        if s.is_empty() && nullable && !is_string_field {
            return Value::Null;
        }
    }

    match &resolved.kind {
        FieldKind::Primitive(t) => coerce_primitive(t, raw),
        FieldKind::Union(Union::Enum(values)) => coerce_enum(values, raw),
        FieldKind::Union(Union::OneOf(branches) | Union::AnyOf(branches)) => {
            if branches.iter().any(|b| check_type(model, b, &raw).is_ok()) {
                return raw;
            }
            for branch in branches {
                let converted = coerce(model, branch, raw.clone());
                if converted != raw && check_type(model, branch, &converted).is_ok() {
                    return converted;
                }
            }
            raw
        }
        FieldKind::Object | FieldKind::Array => raw,
    }
}

fn coerce_primitive(t: &PrimitiveType, raw: Value) -> Value {
    match (t, &raw) {
        (PrimitiveType::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
            Ok(i) => Value::from(i),
            Err(_) => raw,
        },
        (PrimitiveType::Integer, Value::Number(n)) if !n.is_i64() && !n.is_u64() => {
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Value::from(f as i64),
                _ => raw,
            }
        }
        (PrimitiveType::Number, Value::String(s)) => {
            let s = s.trim();
            if let Ok(i) = s.parse::<i64>() {
                return Value::from(i);
            }
            match s.parse::<f64>().ok().and_then(Number::from_f64) {
                Some(n) => Value::Number(n),
                None => raw,
            }
        }
        (PrimitiveType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => raw,
        },
        (PrimitiveType::Null, Value::String(s)) if s.is_empty() || s == "null" => Value::Null,
        _ => raw,
    }
}

/// Match host text against enum members by their string form.
fn coerce_enum(values: &[Value], raw: Value) -> Value {
    if values.contains(&raw) {
        return raw;
    }
    let Value::String(s) = &raw else {
        return raw;
    };
    values
        .iter()
        .find(|v| match v {
            Value::String(member) => member == s,
            other => other.to_string() == *s,
        })
        .cloned()
        .unwrap_or(raw)
}

/// Check the JSON shape of `value` against the field's kind. Constraints are
/// not looked at; `null` is accepted for nullable fields.
pub fn check_type(model: &SchemaModel, field: &SchemaField, value: &Value) -> Result<(), TypeMismatch> {
    let resolved = model.resolve(field);
    if value.is_null() && (field.nullable || resolved.nullable) {
        return Ok(());
    }
    match &resolved.kind {
        FieldKind::Primitive(t) => {
            let ok = match t {
                PrimitiveType::String => value.is_string(),
                PrimitiveType::Integer => is_integral(value),
                PrimitiveType::Number => value.is_number(),
                PrimitiveType::Boolean => value.is_boolean(),
                PrimitiveType::Null => value.is_null(),
                PrimitiveType::Any | PrimitiveType::Unknown(_) => true,
            };
            if ok {
                Ok(())
            } else {
                Err(TypeMismatch::new(t.name(), value))
            }
        }
        FieldKind::Object if value.is_object() => Ok(()),
        FieldKind::Object => Err(TypeMismatch::new("object", value)),
        FieldKind::Array if value.is_array() => Ok(()),
        FieldKind::Array => Err(TypeMismatch::new("array", value)),
        // Membership and branch matching are constraint checks.
        FieldKind::Union(_) => Ok(()),
    }
}

pub(crate) fn is_integral(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
        _ => false,
    }
}
