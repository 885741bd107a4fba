//! Field → widget kind resolution.

use std::{collections::BTreeSet, fmt, str::FromStr};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    data::{
        model::SchemaModel,
        path::FieldPath,
        types::{FieldKind, PrimitiveType, SchemaField, Union},
    },
    options::SessionOptions,
};

/// Every control the engine can ask a host to render.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum WidgetKind {
    Text,
    Textarea,
    Combobox,
    IntText,
    IntSlider,
    FloatText,
    FloatSlider,
    Checkbox,
    Dropdown,
    Date,
    Datetime,
    Color,
    Path,
    Markdown,
    SelectMultiple,
    TagsInput,
    IntRangeSlider,
    FloatRangeSlider,
    DataGrid,
    Array,
    Object,
    Union,
}

impl WidgetKind {
    pub const ALL: [WidgetKind; 22] = [
        WidgetKind::Text,
        WidgetKind::Textarea,
        WidgetKind::Combobox,
        WidgetKind::IntText,
        WidgetKind::IntSlider,
        WidgetKind::FloatText,
        WidgetKind::FloatSlider,
        WidgetKind::Checkbox,
        WidgetKind::Dropdown,
        WidgetKind::Date,
        WidgetKind::Datetime,
        WidgetKind::Color,
        WidgetKind::Path,
        WidgetKind::Markdown,
        WidgetKind::SelectMultiple,
        WidgetKind::TagsInput,
        WidgetKind::IntRangeSlider,
        WidgetKind::FloatRangeSlider,
        WidgetKind::DataGrid,
        WidgetKind::Array,
        WidgetKind::Object,
        WidgetKind::Union,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WidgetKind::Text => "Text",
            WidgetKind::Textarea => "Textarea",
            WidgetKind::Combobox => "Combobox",
            WidgetKind::IntText => "IntText",
            WidgetKind::IntSlider => "IntSlider",
            WidgetKind::FloatText => "FloatText",
            WidgetKind::FloatSlider => "FloatSlider",
            WidgetKind::Checkbox => "Checkbox",
            WidgetKind::Dropdown => "Dropdown",
            WidgetKind::Date => "Date",
            WidgetKind::Datetime => "Datetime",
            WidgetKind::Color => "Color",
            WidgetKind::Path => "Path",
            WidgetKind::Markdown => "Markdown",
            WidgetKind::SelectMultiple => "SelectMultiple",
            WidgetKind::TagsInput => "TagsInput",
            WidgetKind::IntRangeSlider => "IntRangeSlider",
            WidgetKind::FloatRangeSlider => "FloatRangeSlider",
            WidgetKind::DataGrid => "DataGrid",
            WidgetKind::Array => "Array",
            WidgetKind::Object => "Object",
            WidgetKind::Union => "Union",
        }
    }

    /// Kinds whose descriptor has one child per property or element.
    pub fn is_container(&self) -> bool {
        matches!(self, WidgetKind::Object | WidgetKind::Array | WidgetKind::DataGrid)
    }
}

impl fmt::Display for WidgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WidgetKind {
    type Err = String;

    /// Case-insensitive; `-` and `_` are ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        WidgetKind::ALL
            .into_iter()
            .find(|k| k.name().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown widget kind `{s}`"))
    }
}

/// No enabled widget can render a field.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("no widget for {path}: {reason}")]
pub struct UnsupportedFieldError {
    pub path: FieldPath,
    pub reason: String,
}

/// Picks a [`WidgetKind`] for each field.
///
/// Every field yields an ordered candidate list; the first kind not disabled
/// wins.
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetRegistry {
    disabled: BTreeSet<WidgetKind>,
    textarea_threshold: u64,
    select_multiple_max: usize,
}

impl Default for WidgetRegistry {
    fn default() -> Self {
        Self::from_options(&SessionOptions::default())
    }
}

impl WidgetRegistry {
    pub fn from_options(options: &SessionOptions) -> Self {
        Self {
            disabled: options.disabled_widgets.iter().copied().collect(),
            textarea_threshold: options.textarea_threshold,
            select_multiple_max: options.select_multiple_max,
        }
    }

    pub fn disable(&mut self, kind: WidgetKind) {
        self.disabled.insert(kind);
    }

    pub fn enable(&mut self, kind: WidgetKind) {
        self.disabled.remove(&kind);
    }

    pub fn is_enabled(&self, kind: WidgetKind) -> bool {
        !self.disabled.contains(&kind)
    }

    /// Widget for `field`, found at `path`.
    pub fn resolve(
        &self,
        model: &SchemaModel,
        field: &SchemaField,
        path: &FieldPath,
    ) -> Result<WidgetKind, UnsupportedFieldError> {
        let unsupported = |reason: String| UnsupportedFieldError {
            path: path.clone(),
            reason,
        };
        let candidates = self.candidates(model, field).map_err(unsupported)?;
        candidates
            .iter()
            .copied()
            .find(|k| self.is_enabled(*k))
            .ok_or_else(|| {
                let names: Vec<&str> = candidates.iter().map(WidgetKind::name).collect();
                UnsupportedFieldError {
                    path: path.clone(),
                    reason: format!("all candidate widgets are disabled: {}", names.join(", ")),
                }
            })
    }

    /// Ordered candidates for `field`, most specific first.
    pub fn candidates(&self, model: &SchemaModel, field: &SchemaField) -> Result<Vec<WidgetKind>, String> {
        let resolved = model.resolve(field);
        if let Some(name) = field.widget.as_deref().or(resolved.widget.as_deref()) {
            return name.parse::<WidgetKind>().map(|k| vec![k]);
        }

        let c = &resolved.constraints;
        let out = match &resolved.kind {
            FieldKind::Union(Union::Enum(_)) => vec![WidgetKind::Dropdown],
            FieldKind::Union(union) => {
                let branches = union.branches();
                let has_enum = branches
                    .iter()
                    .any(|b| matches!(model.resolve(b).kind, FieldKind::Union(Union::Enum(_))));
                let has_free = branches.iter().any(|b| {
                    matches!(
                        model.resolve(b).kind,
                        FieldKind::Primitive(PrimitiveType::String | PrimitiveType::Integer | PrimitiveType::Number)
                    )
                });
                if has_enum && has_free {
                    vec![WidgetKind::Combobox, WidgetKind::Text]
                } else {
                    vec![WidgetKind::Union]
                }
            }
            FieldKind::Primitive(PrimitiveType::Integer) if c.is_bounded() => {
                vec![WidgetKind::IntSlider, WidgetKind::IntText]
            }
            FieldKind::Primitive(PrimitiveType::Integer) => vec![WidgetKind::IntText],
            FieldKind::Primitive(PrimitiveType::Number) if c.is_bounded() => {
                vec![WidgetKind::FloatSlider, WidgetKind::FloatText]
            }
            FieldKind::Primitive(PrimitiveType::Number) => vec![WidgetKind::FloatText],
            FieldKind::Primitive(PrimitiveType::String) => self.string_candidates(resolved, field),
            FieldKind::Primitive(PrimitiveType::Boolean) => vec![WidgetKind::Checkbox],
            // Untyped values are edited as raw text.
            FieldKind::Primitive(PrimitiveType::Any) => vec![WidgetKind::Text],
            FieldKind::Primitive(other) => {
                return Err(format!("fields of type `{}` have no widget", other.name()));
            }
            FieldKind::Array => self.array_candidates(model, resolved),
            FieldKind::Object => vec![WidgetKind::Object],
        };
        Ok(out)
    }

    fn string_candidates(&self, resolved: &SchemaField, site: &SchemaField) -> Vec<WidgetKind> {
        let c = &resolved.constraints;
        if !site.examples.is_empty() || !resolved.examples.is_empty() {
            return vec![WidgetKind::Combobox, WidgetKind::Text];
        }
        let special = match c.format.as_deref() {
            Some("date") => Some(WidgetKind::Date),
            Some("date-time") => Some(WidgetKind::Datetime),
            Some(f) if f.contains("color") => Some(WidgetKind::Color),
            Some(f) if f.contains("path") => Some(WidgetKind::Path),
            Some(f) if f.contains("markdown") => Some(WidgetKind::Markdown),
            _ => None,
        };
        if let Some(kind) = special {
            return vec![kind, WidgetKind::Text];
        }
        match c.max_length {
            Some(max) if max >= self.textarea_threshold => vec![WidgetKind::Textarea, WidgetKind::Text],
            _ => vec![WidgetKind::Text],
        }
    }

    fn array_candidates(&self, model: &SchemaModel, array: &SchemaField) -> Vec<WidgetKind> {
        if array.tuple && array.children.len() == 2 {
            let slots: Vec<&SchemaField> = array.children.iter().map(|c| model.resolve(c)).collect();
            let all = |t: PrimitiveType| {
                slots
                    .iter()
                    .all(|s| s.kind == FieldKind::Primitive(t.clone()) && s.constraints.is_bounded())
            };
            if all(PrimitiveType::Integer) {
                return vec![WidgetKind::IntRangeSlider, WidgetKind::Array];
            }
            if all(PrimitiveType::Number) {
                return vec![WidgetKind::FloatRangeSlider, WidgetKind::Array];
            }
        }
        if array.constraints.format.as_deref() == Some("dataframe") {
            return vec![WidgetKind::DataGrid, WidgetKind::Array];
        }
        if array.tuple {
            return vec![WidgetKind::Array];
        }
        let Some(item) = array.children.first().map(|i| model.resolve(i)) else {
            return vec![WidgetKind::Array];
        };
        match &item.kind {
            FieldKind::Union(Union::Enum(options)) => {
                if options.len() < self.select_multiple_max {
                    vec![WidgetKind::SelectMultiple, WidgetKind::TagsInput]
                } else {
                    vec![WidgetKind::TagsInput, WidgetKind::SelectMultiple]
                }
            }
            FieldKind::Object => vec![WidgetKind::DataGrid, WidgetKind::Array],
            _ => vec![WidgetKind::Array],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn resolve_all(schema: Value, registry: &WidgetRegistry) -> Vec<(String, Result<WidgetKind, UnsupportedFieldError>)> {
        let model = SchemaModel::try_from(&schema).unwrap();
        model
            .root()
            .children
            .iter()
            .map(|f| {
                let path = FieldPath::root().join(f.name.as_str());
                (f.name.clone(), registry.resolve(&model, f, &path))
            })
            .collect()
    }

    #[test]
    fn test_precedence_table() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "level": {"type": "integer", "minimum": 0, "maximum": 10},
                "ratio": {"type": "number", "minimum": 0, "maximum": 1},
                "name": {"type": "string"},
                "notes": {"type": "string", "maxLength": 500},
                "born": {"type": "string", "format": "date"},
                "tint": {"type": "string", "format": "hexcolor"},
                "flag": {"type": "boolean"},
                "mode": {"enum": ["a", "b"]},
                "range": {"type": "array", "prefixItems": [
                    {"type": "integer", "minimum": 0, "maximum": 9},
                    {"type": "integer", "minimum": 0, "maximum": 9}
                ]},
                "picks": {"type": "array", "items": {"enum": [1, 2, 3]}},
                "rows": {"type": "array", "items": {"type": "object", "properties": {}}},
                "plain": {"type": "array", "items": {"type": "string"}},
                "fruit": {"anyOf": [{"enum": ["apple"]}, {"type": "string"}]},
                "shape": {"oneOf": [{"type": "object"}, {"type": "boolean"}]},
                "forced": {"type": "string", "x-widget": "textarea"}
            }
        });
        let got: Vec<(String, WidgetKind)> = resolve_all(schema, &WidgetRegistry::default())
            .into_iter()
            .map(|(n, k)| (n, k.unwrap()))
            .collect();
        let expect = [
            ("count", WidgetKind::IntText),
            ("level", WidgetKind::IntSlider),
            ("ratio", WidgetKind::FloatSlider),
            ("name", WidgetKind::Text),
            ("notes", WidgetKind::Textarea),
            ("born", WidgetKind::Date),
            ("tint", WidgetKind::Color),
            ("flag", WidgetKind::Checkbox),
            ("mode", WidgetKind::Dropdown),
            ("range", WidgetKind::IntRangeSlider),
            ("picks", WidgetKind::SelectMultiple),
            ("rows", WidgetKind::DataGrid),
            ("plain", WidgetKind::Array),
            ("fruit", WidgetKind::Combobox),
            ("shape", WidgetKind::Union),
            ("forced", WidgetKind::Textarea),
        ];
        let expect: Vec<(String, WidgetKind)> = expect.iter().map(|(n, k)| (n.to_string(), *k)).collect();
        assert_eq!(got, expect);
    }

    #[test]
    fn test_disabled_kind_falls_back() {
        let options = SessionOptions {
            disabled_widgets: vec![WidgetKind::IntSlider, WidgetKind::DataGrid],
            ..SessionOptions::default()
        };
        let registry = WidgetRegistry::from_options(&options);
        let got = resolve_all(
            json!({"type": "object", "properties": {
                "level": {"type": "integer", "minimum": 0, "maximum": 10},
                "rows": {"type": "array", "items": {"type": "object"}}
            }}),
            &registry,
        );
        assert_eq!(got[0].1, Ok(WidgetKind::IntText));
        assert_eq!(got[1].1, Ok(WidgetKind::Array));
    }

    #[test]
    fn test_large_enum_arrays_use_tags() {
        let options: Vec<i32> = (0..12).collect();
        let got = resolve_all(
            json!({"type": "object", "properties": {"many": {"type": "array", "items": {"enum": options}}}}),
            &WidgetRegistry::default(),
        );
        assert_eq!(got[0].1, Ok(WidgetKind::TagsInput));
    }

    #[test]
    fn test_unsupported_fields_report_path() {
        let mut registry = WidgetRegistry::default();
        registry.disable(WidgetKind::Checkbox);
        let got = resolve_all(
            json!({"type": "object", "properties": {
                "nothing": {"type": "null"},
                "flag": {"type": "boolean"},
                "odd": {"type": "string", "x-widget": "Spinner"}
            }}),
            &registry,
        );
        for (name, result) in &got {
            let err = result.as_ref().unwrap_err();
            assert_eq!(err.path, FieldPath::parse(name));
        }
    }

    #[test]
    fn test_untyped_values_get_text() {
        let got = resolve_all(
            json!({"type": "object", "properties": {
                "anything": {},
                "bare": {"type": "array"},
                "loose": {"type": "array", "items": true}
            }}),
            &WidgetRegistry::default(),
        );
        assert_eq!(got[0].1, Ok(WidgetKind::Text));
        assert_eq!(got[1].1, Ok(WidgetKind::Array));
        assert_eq!(got[2].1, Ok(WidgetKind::Array));

        let model = SchemaModel::try_from(&json!({"type": "array"})).unwrap();
        let item = &model.root().children[0];
        assert_eq!(
            WidgetRegistry::default().candidates(&model, item),
            Ok(vec![WidgetKind::Text])
        );
    }

    #[test]
    fn test_widget_kind_parsing() {
        assert_eq!("int-slider".parse::<WidgetKind>(), Ok(WidgetKind::IntSlider));
        assert_eq!("DataGrid".parse::<WidgetKind>(), Ok(WidgetKind::DataGrid));
        assert!("slider".parse::<WidgetKind>().is_err());
    }
}
