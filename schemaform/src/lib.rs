//! # schemaform
//!
//! A schema-driven form binding and validation engine.
//!
//! Given a JSON Schema, schemaform builds a tree of widget descriptors bound
//! two-way to an in-memory document, re-validates the document after every
//! edit and exposes save/revert/CRUD actions over it. Rendering is left to the
//! host: it draws each descriptor's [`WidgetKind`], forwards raw input to
//! [`Session::set_value`] and shows each descriptor's current error.
//!
//! ## Features
//!
//! - JSON Schema mapping with `$ref` (including recursive schemas), `allOf`,
//!   `oneOf`/`anyOf`, nullable wrappers and tuple arrays
//! - Deterministic widget selection with per-session disabled kinds
//! - Permissive editing: input that does not convert is kept and reported
//! - Two-phase save gated on an empty error tree, revert to the last save
//! - JSON and TOML documents with automatic backup before overwriting
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use schemaform::{ActionOutcome, FieldPath, SchemaModel, Session, SessionOptions};
//! use serde_json::json;
//!
//! let model = SchemaModel::try_from(&json!({
//!     "type": "object",
//!     "properties": {"radius": {"type": "number", "minimum": 0}}
//! }))
//! .unwrap();
//! let mut session = Session::open(Arc::new(model), None, SessionOptions::default()).unwrap();
//!
//! session.set_value(&FieldPath::parse("radius"), json!("-5")).unwrap();
//! assert!(matches!(session.begin_save().unwrap(), ActionOutcome::ValidationBlocked(_)));
//!
//! session.set_value(&FieldPath::parse("radius"), json!("5")).unwrap();
//! let mut store = schemaform::store::MemoryStore::new();
//! assert_eq!(session.save_to(&mut store).unwrap(), ActionOutcome::Saved);
//! ```
//!
//! ## Modules
//!
//! - [`data`] - schema mapping, the schema model and documents
//! - [`registry`] - field to widget kind resolution
//! - [`binding`] - the binding engine and widget tree
//! - [`validate`] - document validation
//! - [`session`] - the action/CRUD controller
//! - [`store`] - document persistence
//! - [`options`] - session configuration

#[macro_use]
extern crate log;

/// Schema mapping, schema model and document data structures.
pub mod data;

/// Field to widget kind resolution.
pub mod registry;

/// Two-way binding between documents and widget trees.
pub mod binding;

/// Document validation against a schema model.
pub mod validate;

/// Editing sessions and their actions.
pub mod session;

/// Document persistence.
pub mod store;

/// Session configuration.
pub mod options;

pub use binding::{BindingEngine, WidgetDescriptor, WidgetTree};
pub use data::{
    DataInstance, FieldPath, PathSegment, SchemaCache, SchemaModel,
    schema::{SchemaError, map},
    types::{Constraints, FieldKind, PrimitiveType, SchemaField, Union},
};
pub use options::SessionOptions;
pub use registry::{UnsupportedFieldError, WidgetKind, WidgetRegistry};
pub use session::{
    ActionKind, ActionOutcome, ActionRequest, HookPoint, PendingSave, Placement, SavedSession,
    Session, SessionError, SessionState,
};
pub use store::{DocumentStore, FileStore, MemoryStore, StoreError};
pub use validate::{ConstraintKind, ErrorNode, ErrorTree, validate};
pub use serde_json::Value;
