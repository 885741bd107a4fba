use serde::Serialize;
use serde_json::Value;

/// Scalar JSON Schema types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    String,
    Integer,
    Number,
    Boolean,
    Null,
    /// No `type` keyword and nothing else to classify by.
    Any,
    /// A `type` name this engine does not know.
    Unknown(String),
}

impl PrimitiveType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "string" => PrimitiveType::String,
            "integer" => PrimitiveType::Integer,
            "number" => PrimitiveType::Number,
            "boolean" => PrimitiveType::Boolean,
            "null" => PrimitiveType::Null,
            other => PrimitiveType::Unknown(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            PrimitiveType::String => "string",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Number => "number",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Null => "null",
            PrimitiveType::Any => "any",
            PrimitiveType::Unknown(name) => name,
        }
    }
}

/// Alternatives of a union field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Union {
    /// Closed set of literal values (`enum` / `const`).
    Enum(Vec<Value>),
    /// Exactly one branch must match.
    OneOf(Vec<SchemaField>),
    /// At least one branch must match.
    AnyOf(Vec<SchemaField>),
}

impl Union {
    /// Schema branches for `oneOf`/`anyOf`, empty for enums.
    pub fn branches(&self) -> &[SchemaField] {
        match self {
            Union::Enum(_) => &[],
            Union::OneOf(b) | Union::AnyOf(b) => b,
        }
    }
}

/// Closed classification of a schema node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKind {
    Primitive(PrimitiveType),
    Object,
    Array,
    Union(Union),
}

impl FieldKind {
    pub fn is_container(&self) -> bool {
        matches!(self, FieldKind::Object | FieldKind::Array)
    }
}

/// Constraint keywords, carried verbatim from the raw schema.
///
/// `exclusive_minimum`/`exclusive_maximum` hold the bound itself; the draft-4
/// boolean form is folded into them at mapping time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_minimum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclusive_maximum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<u64>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub unique_items: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_properties: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_properties: Option<u64>,
    /// `additionalProperties: false`.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub closed: bool,
}

impl Constraints {
    /// Both `minimum` and `maximum` are declared.
    pub fn is_bounded(&self) -> bool {
        self.minimum.is_some() && self.maximum.is_some()
    }
}

/// One node of the mapped field tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaField {
    /// Property name; array items are named `items`, tuple slots by index.
    pub name: String,
    pub kind: FieldKind,
    pub constraints: Constraints,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub required: bool,
    /// Object properties in declaration order, or array item schemas.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SchemaField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
    /// Explicit widget override (`x-widget` / `autoui`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub widget: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    /// Reference-table entry this field links to instead of holding a body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Array declared with `prefixItems`: one child per position.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub tuple: bool,
}

impl SchemaField {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            constraints: Constraints::default(),
            default: None,
            required: false,
            children: Vec::new(),
            title: None,
            description: None,
            nullable: false,
            read_only: false,
            widget: None,
            examples: Vec::new(),
            reference: None,
            tuple: false,
        }
    }

    pub fn child(&self, name: &str) -> Option<&SchemaField> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Schema for the element at `index` of an array field.
    pub fn item(&self, index: usize) -> Option<&SchemaField> {
        if self.tuple {
            self.children.get(index)
        } else {
            self.children.first()
        }
    }

    /// Human label: title when present, otherwise the name.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }
}
