//! Editing sessions: save/revert/CRUD actions over a bound document.
//!
//! A [`Session`] moves through
//! `Clean -> Dirty -> {Saving -> Clean | SaveFailed -> Dirty}` and
//! `Dirty -> Reverted -> Clean`. Saving is two-phase so the host can run the
//! actual write wherever it likes; while a save is outstanding every mutation
//! is refused with [`SessionError::SessionBusy`].

use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    binding::{BindingEngine, WidgetDescriptor, WidgetTree},
    data::{
        instance::WriteError,
        model::{SchemaCache, SchemaModel},
        path::{FieldPath, PathSegment},
        schema::SchemaError,
        types::FieldKind,
    },
    options::SessionOptions,
    registry::{UnsupportedFieldError, WidgetRegistry},
    store::{DocumentStore, StoreError},
    validate::{ErrorNode, ErrorTree},
};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a save is in progress")]
    SessionBusy,

    #[error("no field at {0}")]
    UnknownField(FieldPath),

    #[error("{0} is not an array")]
    NotAnArray(FieldPath),

    #[error("{0} holds a scalar where a container is needed")]
    NotAContainer(FieldPath),

    #[error("index {index} is out of range for {path} (length {len})")]
    IndexOutOfRange {
        path: FieldPath,
        index: usize,
        len: usize,
    },

    #[error("{0} has a fixed number of elements")]
    FixedLength(FieldPath),

    #[error("no save is in progress")]
    NoPendingSave,

    #[error("no action is waiting for confirmation")]
    NoPendingConfirmation,

    #[error("no handler registered for action `{0}`")]
    UnknownAction(String),

    #[error("action `{name}` failed: {reason}")]
    Handler { name: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{} field(s) have no widget: {}", .0.len(), join_unsupported(.0))]
    Unsupported(Vec<UnsupportedFieldError>),

    #[error(transparent)]
    Schema(#[from] SchemaError),
}

impl From<WriteError> for SessionError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::NotAContainer { path } => SessionError::NotAContainer(path),
            WriteError::IndexOutOfRange { path, index, len } => {
                SessionError::IndexOutOfRange { path, index, len }
            }
        }
    }
}

fn join_unsupported(errors: &[UnsupportedFieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.path, e.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Where a session is in its save cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Clean,
    Dirty,
    Saving,
    SaveFailed,
    /// Transient: the instance is being rebuilt from the snapshot.
    Reverted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Clean => "clean",
            SessionState::Dirty => "dirty",
            SessionState::Saving => "saving",
            SessionState::SaveFailed => "save failed",
            SessionState::Reverted => "reverted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    Save,
    Add,
    Delete,
    Revert,
    Copy,
    Custom(String),
}

/// One user action. For `Add` the target is either the array (append) or
/// the element position to insert at; `Delete` and `Copy` target an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub target_path: FieldPath,
}

impl ActionRequest {
    pub fn new(kind: ActionKind, target_path: impl Into<FieldPath>) -> Self {
        Self {
            kind,
            target_path: target_path.into(),
        }
    }

    pub fn save() -> Self {
        Self::new(ActionKind::Save, FieldPath::root())
    }

    pub fn revert() -> Self {
        Self::new(ActionKind::Revert, FieldPath::root())
    }

    pub fn add(target: impl Into<FieldPath>) -> Self {
        Self::new(ActionKind::Add, target)
    }

    pub fn delete(target: impl Into<FieldPath>) -> Self {
        Self::new(ActionKind::Delete, target)
    }

    pub fn copy(target: impl Into<FieldPath>) -> Self {
        Self::new(ActionKind::Copy, target)
    }

    pub fn custom(name: impl Into<String>, target: impl Into<FieldPath>) -> Self {
        Self::new(ActionKind::Custom(name.into()), target)
    }
}

/// Document handed out by [`Session::begin_save`]; give it back to
/// [`Session::finish_save`] once the write has been attempted.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSave {
    pub document: Value,
    ticket: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Added(FieldPath),
    Deleted { path: FieldPath, removed: Value },
    Copied(FieldPath),
    /// A custom handler's value was written at this path.
    Applied(FieldPath),
    ConfirmationRequired(ActionRequest),
    Dismissed,
    /// Save refused; the session state is unchanged.
    ValidationBlocked(Vec<ErrorNode>),
    SaveStarted(PendingSave),
    Saved,
    SaveFailed(String),
    Reverted,
}

/// Persisted form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    pub schema_id: String,
    pub document: Value,
}

/// Callback run after an action completed; receives the current document.
pub type Hook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Named custom action. Receives the target path and its current value and
/// returns the value to write there.
pub type ActionHandler = Arc<dyn Fn(&FieldPath, Option<&Value>) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookPoint {
    Save,
    Revert,
    Add,
    Delete,
    Copy,
}

/// Where a new hook goes relative to the ones already registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement {
    Front,
    #[default]
    Back,
}

#[derive(Clone)]
struct NamedHook {
    name: String,
    callback: Hook,
}

/// One editing lifecycle over one document.
pub struct Session {
    engine: BindingEngine,
    options: SessionOptions,
    schema_id: String,
    state: SessionState,
    history: Vec<SessionState>,
    snapshot: Value,
    pending_confirmation: Option<ActionRequest>,
    pending_save: Option<u64>,
    next_ticket: u64,
    hooks: BTreeMap<HookPoint, Vec<NamedHook>>,
    handlers: BTreeMap<String, ActionHandler>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("schema_id", &self.schema_id)
            .field("state", &self.state)
            .field("document", self.engine.instance())
            .field("errors", &self.engine.errors().len())
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Bind `initial` (or the schema defaults) to `model`.
    ///
    /// Fails when any field of the initial document has no widget.
    pub fn open(
        model: Arc<SchemaModel>,
        initial: Option<Value>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let registry = WidgetRegistry::from_options(&options);
        let engine = BindingEngine::build(model, registry, initial);
        if !engine.unsupported().is_empty() {
            for err in engine.unsupported() {
                warn!("{err}");
            }
            return Err(SessionError::Unsupported(engine.unsupported().to_vec()));
        }

        let model = engine.model();
        let schema_id = model
            .id()
            .or(model.title())
            .unwrap_or("anonymous")
            .to_string();
        let snapshot = engine.document();
        info!(
            "opened session for `{schema_id}` with {} widget(s), {} error(s)",
            engine.tree().len(),
            engine.errors().len()
        );
        Ok(Self {
            engine,
            options,
            schema_id,
            state: SessionState::Clean,
            history: vec![SessionState::Clean],
            snapshot,
            pending_confirmation: None,
            pending_save: None,
            next_ticket: 0,
            hooks: BTreeMap::new(),
            handlers: BTreeMap::new(),
        })
    }

    /// Map `raw_schema` through `cache` and open a session on it.
    pub fn open_schema(
        cache: &mut SchemaCache,
        raw_schema: &Value,
        initial: Option<Value>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let model = cache.get_or_map(raw_schema)?;
        Self::open(model, initial, options)
    }

    /// Reopen a session closed earlier with [`Session::close`].
    pub fn resume(
        model: Arc<SchemaModel>,
        saved: SavedSession,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let session = Self::open(model, Some(saved.document), options)?;
        if session.schema_id != saved.schema_id {
            warn!(
                "resuming a `{}` document with schema `{}`",
                saved.schema_id, session.schema_id
            );
        }
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Every state the session has been in, oldest first.
    pub fn history(&self) -> &[SessionState] {
        &self.history
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, SessionState::Dirty | SessionState::SaveFailed)
    }

    pub fn schema_id(&self) -> &str {
        &self.schema_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn engine(&self) -> &BindingEngine {
        &self.engine
    }

    pub fn document(&self) -> Value {
        self.engine.document()
    }

    /// Last saved document, or the initial one.
    pub fn snapshot(&self) -> &Value {
        &self.snapshot
    }

    pub fn errors(&self) -> &ErrorTree {
        self.engine.errors()
    }

    pub fn tree(&self) -> &WidgetTree {
        self.engine.tree()
    }

    pub fn descriptor(&self, path: &FieldPath) -> Option<&WidgetDescriptor> {
        self.engine.descriptor(path)
    }

    pub fn pending_confirmation(&self) -> Option<&ActionRequest> {
        self.pending_confirmation.as_ref()
    }

    /// Register a hook under `name`. A hook already registered under that
    /// name is replaced.
    pub fn add_hook(&mut self, point: HookPoint, name: impl Into<String>, callback: Hook, placement: Placement) {
        let name = name.into();
        let hooks = self.hooks.entry(point).or_default();
        hooks.retain(|h| h.name != name);
        let hook = NamedHook { name, callback };
        match placement {
            Placement::Front => hooks.insert(0, hook),
            Placement::Back => hooks.push(hook),
        }
    }

    pub fn remove_hook(&mut self, point: HookPoint, name: &str) -> bool {
        let Some(hooks) = self.hooks.get_mut(&point) else {
            return false;
        };
        let before = hooks.len();
        hooks.retain(|h| h.name != name);
        hooks.len() != before
    }

    pub fn clear_hooks(&mut self, point: HookPoint) {
        self.hooks.remove(&point);
    }

    pub fn hook_names(&self, point: HookPoint) -> Vec<&str> {
        self.hooks
            .get(&point)
            .map(|hooks| hooks.iter().map(|h| h.name.as_str()).collect())
            .unwrap_or_default()
    }

    /// Register a custom action; replaces any handler with the same name.
    pub fn register_action(&mut self, name: impl Into<String>, handler: ActionHandler) {
        self.handlers.insert(name.into(), handler);
    }

    pub fn remove_action(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn set_value(&mut self, path: &FieldPath, value: Value) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.engine.set_value(path, value)?;
        self.after_edit();
        Ok(())
    }

    pub fn add_element(&mut self, array: &FieldPath, at: Option<usize>) -> Result<FieldPath, SessionError> {
        self.ensure_idle()?;
        let path = self.engine.add_element(array, at)?;
        self.after_edit();
        self.run_hooks(HookPoint::Add);
        Ok(path)
    }

    /// Remove an element right away, without asking for confirmation.
    pub fn remove_element(&mut self, array: &FieldPath, index: usize) -> Result<Value, SessionError> {
        self.ensure_idle()?;
        let removed = self.engine.remove_element(array, index)?;
        self.after_edit();
        self.run_hooks(HookPoint::Delete);
        Ok(removed)
    }

    pub fn copy_element(&mut self, array: &FieldPath, index: usize) -> Result<FieldPath, SessionError> {
        self.ensure_idle()?;
        let path = self.engine.copy_element(array, index)?;
        self.after_edit();
        self.run_hooks(HookPoint::Copy);
        Ok(path)
    }

    /// Run one action.
    pub fn dispatch(&mut self, request: ActionRequest) -> Result<ActionOutcome, SessionError> {
        self.ensure_idle()?;
        debug!("dispatch {:?} at {}", request.kind, request.target_path);
        match &request.kind {
            ActionKind::Save => self.begin_save(),
            ActionKind::Revert => self.revert(),
            ActionKind::Add => {
                let (array, at) = self.insert_target(&request.target_path)?;
                self.add_element(&array, at).map(ActionOutcome::Added)
            }
            ActionKind::Delete => {
                let (array, index) = element_target(&request.target_path)?;
                if self.options.skip_delete_confirmation {
                    return self.delete(&array, index);
                }
                self.check_element(&array, index)?;
                info!("delete of {} awaits confirmation", request.target_path);
                self.pending_confirmation = Some(request.clone());
                Ok(ActionOutcome::ConfirmationRequired(request.clone()))
            }
            ActionKind::Copy => {
                let (array, index) = element_target(&request.target_path)?;
                self.copy_element(&array, index).map(ActionOutcome::Copied)
            }
            ActionKind::Custom(name) => {
                let handler = self
                    .handlers
                    .get(name)
                    .cloned()
                    .ok_or_else(|| SessionError::UnknownAction(name.clone()))?;
                let target = &request.target_path;
                let current = self.engine.instance().get(target).cloned();
                let value = handler(target, current.as_ref()).map_err(|e| SessionError::Handler {
                    name: name.clone(),
                    reason: format!("{e:#}"),
                })?;
                self.set_value(target, value)?;
                Ok(ActionOutcome::Applied(target.clone()))
            }
        }
    }

    /// Carry out the action waiting for confirmation.
    pub fn confirm(&mut self) -> Result<ActionOutcome, SessionError> {
        self.ensure_idle()?;
        let request = self
            .pending_confirmation
            .take()
            .ok_or(SessionError::NoPendingConfirmation)?;
        let (array, index) = element_target(&request.target_path)?;
        self.delete(&array, index)
    }

    /// Drop the action waiting for confirmation.
    pub fn dismiss(&mut self) -> Result<ActionOutcome, SessionError> {
        let request = self
            .pending_confirmation
            .take()
            .ok_or(SessionError::NoPendingConfirmation)?;
        debug!("dismissed {:?} at {}", request.kind, request.target_path);
        Ok(ActionOutcome::Dismissed)
    }

    /// First save phase: validate and hand out the document to write.
    ///
    /// Returns [`ActionOutcome::ValidationBlocked`] with the blocking nodes
    /// when the document has errors, leaving the state untouched.
    pub fn begin_save(&mut self) -> Result<ActionOutcome, SessionError> {
        self.ensure_idle()?;
        let errors = self.engine.revalidate();
        if !errors.is_empty() {
            info!("save blocked by {} validation error(s)", errors.len());
            return Ok(ActionOutcome::ValidationBlocked(errors.clone().into_nodes()));
        }
        if self.state == SessionState::SaveFailed {
            self.transition(SessionState::Dirty);
        }
        self.next_ticket += 1;
        self.pending_save = Some(self.next_ticket);
        self.transition(SessionState::Saving);
        Ok(ActionOutcome::SaveStarted(PendingSave {
            document: self.engine.document(),
            ticket: self.next_ticket,
        }))
    }

    /// Second save phase: report how the write went.
    pub fn finish_save(
        &mut self,
        pending: PendingSave,
        result: Result<(), String>,
    ) -> Result<ActionOutcome, SessionError> {
        if self.pending_save != Some(pending.ticket) {
            return Err(SessionError::NoPendingSave);
        }
        self.pending_save = None;
        match result {
            Ok(()) => {
                self.snapshot = pending.document;
                self.transition(SessionState::Clean);
                self.run_hooks(HookPoint::Save);
                Ok(ActionOutcome::Saved)
            }
            Err(reason) => {
                warn!("save of `{}` failed: {reason}", self.schema_id);
                self.transition(SessionState::SaveFailed);
                Ok(ActionOutcome::SaveFailed(reason))
            }
        }
    }

    /// Abandon the outstanding save. The document is left as it was.
    pub fn cancel_save(&mut self) -> Result<(), SessionError> {
        self.pending_save.take().ok_or(SessionError::NoPendingSave)?;
        self.transition(SessionState::SaveFailed);
        Ok(())
    }

    /// Both save phases around `store`.
    pub fn save_to<S: DocumentStore + ?Sized>(&mut self, store: &mut S) -> Result<ActionOutcome, SessionError> {
        let pending = match self.begin_save()? {
            ActionOutcome::SaveStarted(pending) => pending,
            other => return Ok(other),
        };
        match store.save(&pending.document) {
            Ok(()) => self.finish_save(pending, Ok(())),
            Err(err) => {
                self.finish_save(pending, Err(err.to_string()))?;
                Err(SessionError::Store(err))
            }
        }
    }

    /// Throw away edits since the last save.
    pub fn revert(&mut self) -> Result<ActionOutcome, SessionError> {
        self.ensure_idle()?;
        self.pending_confirmation = None;
        self.transition(SessionState::Reverted);
        self.engine.replace_instance(self.snapshot.clone());
        self.run_hooks(HookPoint::Revert);
        self.transition(SessionState::Clean);
        Ok(ActionOutcome::Reverted)
    }

    /// End the session.
    pub fn close(self) -> SavedSession {
        if self.pending_save.is_some() {
            warn!("closing `{}` with a save still outstanding", self.schema_id);
        } else if self.is_dirty() {
            warn!("closing `{}` with unsaved changes", self.schema_id);
        }
        debug!("closed session for `{}`", self.schema_id);
        SavedSession {
            schema_id: self.schema_id,
            document: self.engine.document(),
        }
    }

    fn delete(&mut self, array: &FieldPath, index: usize) -> Result<ActionOutcome, SessionError> {
        let removed = self.remove_element(array, index)?;
        Ok(ActionOutcome::Deleted {
            path: array.join(index),
            removed,
        })
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if self.state == SessionState::Saving {
            return Err(SessionError::SessionBusy);
        }
        Ok(())
    }

    fn after_edit(&mut self) {
        if self.pending_confirmation.take().is_some() {
            debug!("pending confirmation dropped by an edit");
        }
        self.transition(SessionState::Dirty);
    }

    fn transition(&mut self, to: SessionState) {
        if self.state == to {
            return;
        }
        info!("session `{}`: {} -> {}", self.schema_id, self.state, to);
        self.state = to;
        self.history.push(to);
    }

    fn run_hooks(&self, point: HookPoint) {
        let Some(hooks) = self.hooks.get(&point) else {
            return;
        };
        let document = self.engine.document();
        for hook in hooks {
            trace!("running {point:?} hook `{}`", hook.name);
            (hook.callback)(&document);
        }
    }

    fn check_element(&self, array: &FieldPath, index: usize) -> Result<(), SessionError> {
        let model = self.engine.model();
        let field = model
            .field_at(array)
            .ok_or_else(|| SessionError::UnknownField(array.clone()))?;
        let resolved = model.resolve(field);
        if resolved.kind != FieldKind::Array {
            return Err(SessionError::NotAnArray(array.clone()));
        }
        if resolved.tuple {
            return Err(SessionError::FixedLength(array.clone()));
        }
        let len = self
            .engine
            .instance()
            .array_len(array)
            .ok_or_else(|| SessionError::NotAnArray(array.clone()))?;
        if index >= len {
            return Err(SessionError::IndexOutOfRange {
                path: array.clone(),
                index,
                len,
            });
        }
        Ok(())
    }

    /// Array and position for an `Add` target: the array itself appends,
    /// an element position inserts there.
    fn insert_target(&self, target: &FieldPath) -> Result<(FieldPath, Option<usize>), SessionError> {
        let model = self.engine.model();
        let is_array = model
            .field_at(target)
            .is_some_and(|f| model.resolve(f).kind == FieldKind::Array);
        if is_array {
            return Ok((target.clone(), None));
        }
        let (array, index) = element_target(target)?;
        Ok((array, Some(index)))
    }
}

/// Split an element path into its array and index.
fn element_target(target: &FieldPath) -> Result<(FieldPath, usize), SessionError> {
    match (target.parent(), target.last()) {
        (Some(array), Some(PathSegment::Index(i))) => Ok((array, *i)),
        _ => Err(SessionError::NotAnArray(target.clone())),
    }
}
