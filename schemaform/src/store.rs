//! Persistence for edited documents.
//!
//! Save goes through the [`DocumentStore`] trait so hosts can plug in their
//! own backends. [`FileStore`] writes JSON or TOML depending on the file
//! extension and keeps a timestamped copy of the previous file.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use anyhow::{Context, bail};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unsupported document extension {ext:?} for {}", path.display())]
    UnsupportedExtension { path: PathBuf, ext: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("store rejected the document: {0}")]
    Rejected(String),
}

/// On-disk document format, picked by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn from_path(path: &Path) -> Result<Self, StoreError> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        match ext {
            "json" => Ok(DocumentFormat::Json),
            "toml" | "tml" => Ok(DocumentFormat::Toml),
            _ => Err(StoreError::UnsupportedExtension {
                path: path.to_path_buf(),
                ext: ext.to_string(),
            }),
        }
    }

    pub fn parse(&self, content: &str) -> Result<Value, StoreError> {
        Ok(match self {
            DocumentFormat::Json => serde_json::from_str(content)?,
            DocumentFormat::Toml => {
                let v: toml::Value = toml::from_str(content)?;
                serde_json::to_value(v)?
            }
        })
    }

    pub fn render(&self, document: &Value) -> Result<String, StoreError> {
        Ok(match self {
            DocumentFormat::Json => serde_json::to_string_pretty(document)?,
            // TOML has no null; absent keys carry the same meaning.
            DocumentFormat::Toml => toml::to_string_pretty(&strip_nulls(document))?,
        })
    }
}

fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Where a session's document is loaded from and saved to.
pub trait DocumentStore {
    /// The stored document, or `None` when nothing has been stored yet.
    fn load(&self) -> Result<Option<Value>, StoreError>;

    fn save(&mut self, document: &Value) -> Result<(), StoreError>;
}

/// A document file on disk.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
    format: DocumentFormat,
    backup: bool,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let format = DocumentFormat::from_path(&path)?;
        Ok(Self {
            path,
            format,
            backup: true,
        })
    }

    /// Toggle the copy made before an existing file is overwritten.
    pub fn with_backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> DocumentFormat {
        self.format
    }

    /// Path the backup of the current file gets: `<stem>.bk-<unix-secs>.<ext>`.
    pub fn backup_path(&self, secs: u64) -> PathBuf {
        let ext = self.path.extension().and_then(|s| s.to_str()).unwrap_or("");
        self.path.with_extension(format!("bk-{secs}.{ext}"))
    }

    fn io_err(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl DocumentStore for FileStore {
    fn load(&self) -> Result<Option<Value>, StoreError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.io_err(e))?;
        if content.trim().is_empty() {
            return Ok(None);
        }
        self.format.parse(&content).map(Some)
    }

    fn save(&mut self, document: &Value) -> Result<(), StoreError> {
        let s = self.format.render(document)?;

        if self.backup && self.path.exists() {
            let secs = SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let backup_path = self.backup_path(secs);
            fs::copy(&self.path, &backup_path).map_err(|e| self.io_err(e))?;
            debug!("backed up {} to {}", self.path.display(), backup_path.display());
        }
        fs::write(&self.path, s).map_err(|e| self.io_err(e))?;
        info!("saved document to {}", self.path.display());
        Ok(())
    }
}

/// Keeps the document in memory. Useful for hosts that persist elsewhere and
/// for tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    document: Option<Value>,
    saves: usize,
    reject_next: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(document: Value) -> Self {
        Self {
            document: Some(document),
            ..Self::default()
        }
    }

    pub fn document(&self) -> Option<&Value> {
        self.document.as_ref()
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves
    }

    /// Make the next save fail with `reason`.
    pub fn reject_next(&mut self, reason: impl Into<String>) {
        self.reject_next = Some(reason.into());
    }
}

impl DocumentStore for MemoryStore {
    fn load(&self) -> Result<Option<Value>, StoreError> {
        Ok(self.document.clone())
    }

    fn save(&mut self, document: &Value) -> Result<(), StoreError> {
        if let Some(reason) = self.reject_next.take() {
            return Err(StoreError::Rejected(reason));
        }
        self.document = Some(document.clone());
        self.saves += 1;
        Ok(())
    }
}

/// Derive a default schema path from a document path:
/// `config.toml` → `config-schema.json` in the same directory.
pub fn default_schema_by_init(document: &Path) -> PathBuf {
    let binding = document
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let mut name_split = binding.split('.').collect::<Vec<_>>();
    if name_split.len() > 1 {
        name_split.pop();
    }

    let name = format!("{}-schema.json", name_split.join("."));

    match document.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Read a JSON schema file.
pub fn load_schema(path: &Path) -> anyhow::Result<Value> {
    if !path.exists() {
        bail!("Schema file does not exist: {}", path.display());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("schema {} is not valid JSON", path.display()))
}

/// Read a JSON or TOML document; `None` when the file is missing or blank.
pub fn load_document(path: &Path) -> anyhow::Result<Option<Value>> {
    let store = FileStore::new(path)?;
    store
        .load()
        .with_context(|| format!("failed to load document {}", path.display()))
}
