//! Common utilities and helper functions.
//!
//! Parsing of `path=value` arguments, `${env:VAR}` expansion and colored
//! reporting of validation errors and widget trees.

use std::{str::FromStr, sync::LazyLock};

use colored::Colorize;
use regex::{Captures, Regex};
use schemaform::{ErrorNode, FieldPath, Value, WidgetDescriptor};

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{env:([^}]*)\}").expect("valid placeholder regex"));

/// Replaces `${env:VAR_NAME}` placeholders with the variable's value.
///
/// Unset variables expand to an empty string. Anything else that looks like
/// a placeholder is left alone.
///
/// # Example
///
/// ```rust
/// use formctl::utils::replace_env_placeholders;
///
/// unsafe { std::env::set_var("FORMCTL_DOC_VAR", "hello"); }
/// assert_eq!(replace_env_placeholders("Value: ${env:FORMCTL_DOC_VAR}"), "Value: hello");
/// ```
pub fn replace_env_placeholders(input: &str) -> String {
    ENV_PLACEHOLDER
        .replace_all(input, |caps: &Captures| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => {
                    debug!("using {name}={value}");
                    value
                }
                Err(_) => String::new(),
            }
        })
        .into_owned()
}

/// One `--set path=value` argument.
///
/// The value is handed to the session as typed text, so `"5"` reaches an
/// integer field as `5` through coercion. Text starting with `[` or `{`, and
/// the word `null`, are read as JSON instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub path: FieldPath,
    pub value: Value,
}

impl FromStr for Assignment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (path, raw) = s
            .split_once('=')
            .ok_or_else(|| format!("expected PATH=VALUE, got `{s}`"))?;
        let path = path.trim();
        if path.is_empty() {
            return Err(format!("missing field path in `{s}`"));
        }
        let raw = replace_env_placeholders(raw);
        let trimmed = raw.trim_start();
        let value = if trimmed.starts_with('[') || trimmed.starts_with('{') || raw == "null" {
            serde_json::from_str(&raw).map_err(|e| format!("invalid JSON for `{path}`: {e}"))?
        } else {
            Value::String(raw)
        };
        Ok(Self {
            path: FieldPath::parse(path),
            value,
        })
    }
}

/// Parses a field path argument. The empty string and `.` name the root.
pub fn parse_path(s: &str) -> Result<FieldPath, String> {
    let s = s.trim();
    if s == "." {
        return Ok(FieldPath::root());
    }
    Ok(FieldPath::parse(s))
}

/// Prints error nodes, one per line.
pub fn print_errors<'a>(nodes: impl IntoIterator<Item = &'a ErrorNode>) {
    for node in nodes {
        println!(
            "  {} {} {}",
            node.path.to_string().yellow(),
            format!("[{}]", node.code).red(),
            node.message
        );
    }
}

/// One line of the widget listing, indented by depth.
pub fn describe_widget(descriptor: &WidgetDescriptor) -> String {
    let indent = "  ".repeat(descriptor.path.len());
    let mut line = format!(
        "{indent}{} {}",
        descriptor.label.bold(),
        format!("<{}>", descriptor.kind).cyan()
    );
    if descriptor.required {
        line += &" *".red().to_string();
    }
    if !descriptor.editable {
        line += &" (read-only)".dimmed().to_string();
    }
    if let Some(value) = &descriptor.value {
        line += &format!(" = {value}");
    }
    for err in &descriptor.current_error {
        line += &format!("  {}", err.message.red());
    }
    line
}
