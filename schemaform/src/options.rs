//! Session configuration.
//!
//! Options are usually kept in a small TOML file next to the documents being
//! edited:
//!
//! ```toml
//! skip_delete_confirmation = true
//! textarea_threshold = 120
//! disabled_widgets = ["IntSlider", "FloatSlider"]
//! ```

use std::{fs, path::Path};

use anyhow::Context;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::registry::WidgetKind;

/// Knobs for one editing session and its widget registry.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct SessionOptions {
    /// Delete array elements without asking for confirmation first.
    pub skip_delete_confirmation: bool,
    /// Strings whose `maxLength` reaches this value get a multi-line editor.
    pub textarea_threshold: u64,
    /// Enum arrays with fewer options than this use a multi-select list,
    /// larger ones a tags input.
    pub select_multiple_max: usize,
    /// Widget kinds the host cannot render; the next candidate is used.
    pub disabled_widgets: Vec<WidgetKind>,
    /// Copy the existing file aside before a file store overwrites it.
    pub backup_on_save: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            skip_delete_confirmation: false,
            textarea_threshold: 200,
            select_multiple_max: 10,
            disabled_widgets: Vec::new(),
            backup_on_save: true,
        }
    }
}

impl SessionOptions {
    /// Load options from a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read options file {}", path.display()))?;
        let options: SessionOptions = toml::from_str(&content)
            .with_context(|| format!("invalid options file {}", path.display()))?;
        debug!("loaded session options from {}: {options:?}", path.display());
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "skip_delete_confirmation = true").unwrap();
        writeln!(file, "disabled_widgets = [\"IntSlider\"]").unwrap();
        let options = SessionOptions::from_toml_file(file.path()).unwrap();
        assert!(options.skip_delete_confirmation);
        assert_eq!(options.disabled_widgets, vec![WidgetKind::IntSlider]);
        assert_eq!(options.textarea_threshold, 200);
        assert!(options.backup_on_save);
    }

    #[test]
    fn test_unknown_widget_name_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "disabled_widgets = [\"Spinner\"]").unwrap();
        assert!(SessionOptions::from_toml_file(file.path()).is_err());
    }
}
