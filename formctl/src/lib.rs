//! # formctl
//!
//! Command-line host for [`schemaform`] sessions.
//!
//! `formctl` binds a JSON or TOML document to its JSON Schema, reports
//! validation errors, lists the widgets a graphical host would draw and
//! applies scripted edits before saving through the same save gate a
//! form would use.
//!
//! ## Modules
//!
//! - [`ctx`] - Document, schema and options paths of one invocation
//! - [`edit`] - Handlers behind the `check`, `widgets` and `edit` commands
//! - [`utils`] - Argument parsing and terminal output helpers

/// Paths and options of one invocation.
pub mod ctx;

/// Command handlers.
///
/// Each handler opens a session over the document, drives it and reports
/// the outcome on stdout.
pub mod edit;

/// Common utilities and helper functions.
pub mod utils;

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;
