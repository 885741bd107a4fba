//! Schema and document data structures.
//!
//! - [`schema`] - maps a raw JSON Schema into a [`model::SchemaModel`]
//! - [`model`] - the mapped model, its reference table and the schema cache
//! - [`types`] - field kinds, constraints and schema fields
//! - [`path`] - field paths into documents
//! - [`instance`] - the live document being edited
//! - [`coerce`] - conversion of host input and type checks

/// Coercion of raw input towards declared field types.
pub mod coerce;

/// The live document of a session.
pub mod instance;

/// Normalized schema model and schema cache.
pub mod model;

/// Paths into documents.
pub mod path;

/// JSON Schema mapping.
pub mod schema;

/// Field kinds, constraints and schema fields.
pub mod types;

pub use instance::DataInstance;
pub use model::{SchemaCache, SchemaModel};
pub use path::{FieldPath, PathSegment};
