//! Invocation context.
//!
//! [`FormContext`] resolves where the document, its schema and the session
//! options live, and opens [`Session`]s over them.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use colored::Colorize;
use schemaform::{
    FileStore, SchemaModel, Session, SessionOptions,
    store::{default_schema_by_init, load_document, load_schema},
};

/// Paths the invocation works on.
#[derive(Debug, Clone, Default)]
pub struct FormPaths {
    /// The edited document, `.json` or `.toml`.
    pub document: PathBuf,
    /// Its JSON Schema.
    pub schema: PathBuf,
    /// Optional TOML file with [`SessionOptions`].
    pub options: Option<PathBuf>,
}

/// State shared by all commands of one invocation.
#[derive(Debug, Clone, Default)]
pub struct FormContext {
    pub paths: FormPaths,
    pub options: SessionOptions,
}

impl FormContext {
    /// Resolve paths and load options.
    ///
    /// Without an explicit schema the one next to the document is used:
    /// `config.toml` is described by `config-schema.json`.
    pub fn new(
        document: PathBuf,
        schema: Option<PathBuf>,
        options: Option<PathBuf>,
    ) -> anyhow::Result<Self> {
        let schema = schema.unwrap_or_else(|| default_schema_by_init(&document));
        let session_options = match &options {
            Some(path) => SessionOptions::from_toml_file(path)?,
            None => SessionOptions::default(),
        };
        debug!(
            "document {}, schema {}",
            document.display(),
            schema.display()
        );
        Ok(Self {
            paths: FormPaths {
                document,
                schema,
                options,
            },
            options: session_options,
        })
    }

    /// Read and map the schema.
    pub fn model(&self) -> anyhow::Result<Arc<SchemaModel>> {
        let raw = load_schema(&self.paths.schema)?;
        let model = SchemaModel::try_from(&raw)
            .with_context(|| format!("invalid schema {}", self.paths.schema.display()))?;
        Ok(Arc::new(model))
    }

    /// Open a session over the document, or over schema defaults when the
    /// document does not exist yet.
    pub fn open_session(&self) -> anyhow::Result<Session> {
        let model = self.model()?;
        let initial = load_document(&self.paths.document)?;
        if initial.is_none() {
            println!(
                "{}",
                format!(
                    "{} not found, starting from schema defaults",
                    self.paths.document.display()
                )
                .yellow()
            );
        }
        Session::open(model, initial, self.options.clone())
            .with_context(|| format!("cannot bind {}", self.paths.document.display()))
    }

    /// The store edits are saved to.
    pub fn store(&self) -> anyhow::Result<FileStore> {
        Ok(FileStore::new(&self.paths.document)?.with_backup(self.options.backup_on_save))
    }
}
