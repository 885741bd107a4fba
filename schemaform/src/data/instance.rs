use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::data::path::{FieldPath, PathSegment};

/// Why a write into the instance could not be carried out.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("{path} holds a scalar where a container is needed")]
    NotAContainer { path: FieldPath },

    #[error("index {index} is out of range for {path} (length {len})")]
    IndexOutOfRange { path: FieldPath, index: usize, len: usize },
}

/// The live document being edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DataInstance(Value);

impl DataInstance {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    pub fn get(&self, path: &FieldPath) -> Option<&Value> {
        let mut cur = &self.0;
        for seg in path.segments() {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Object(map)) => map.get(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn get_mut(&mut self, path: &FieldPath) -> Option<&mut Value> {
        let mut cur = &mut self.0;
        for seg in path.segments() {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Value::Object(map)) => map.get_mut(k)?,
                (PathSegment::Index(i), Value::Array(items)) => items.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Write `value` at `path`, creating missing objects on the way.
    ///
    /// Returns the shallowest path that did not exist before the write; this
    /// is the subtree whose shape changed. A failed write leaves the document
    /// untouched.
    pub fn set(&mut self, path: &FieldPath, value: Value) -> Result<FieldPath, WriteError> {
        self.check_writable(path)?;
        let mut created: Option<FieldPath> = None;
        let mut here = FieldPath::root();
        let mut cur = &mut self.0;
        for seg in path.segments() {
            match seg {
                PathSegment::Key(k) => {
                    if cur.is_null() {
                        *cur = Value::Object(Map::new());
                        created.get_or_insert_with(|| here.clone());
                    }
                    let Value::Object(map) = cur else {
                        return Err(WriteError::NotAContainer { path: here });
                    };
                    if !map.contains_key(k) {
                        created.get_or_insert_with(|| here.join(k.as_str()));
                    }
                    cur = map.entry(k.clone()).or_insert(Value::Null);
                }
                PathSegment::Index(i) => {
                    let Value::Array(items) = cur else {
                        return Err(WriteError::NotAContainer { path: here });
                    };
                    let len = items.len();
                    cur = items.get_mut(*i).ok_or(WriteError::IndexOutOfRange {
                        path: here.clone(),
                        index: *i,
                        len,
                    })?;
                }
            }
            here = here.join(seg.clone());
        }
        *cur = value;
        Ok(created.unwrap_or_else(|| path.clone()))
    }

    /// Walk `path` without writing. Keys may be missing or land on `null`,
    /// indices must hit an existing element of an existing array.
    fn check_writable(&self, path: &FieldPath) -> Result<(), WriteError> {
        let mut here = FieldPath::root();
        let mut cur = Some(&self.0);
        for seg in path.segments() {
            cur = match (seg, cur) {
                (PathSegment::Key(k), Some(Value::Object(map))) => map.get(k),
                (PathSegment::Key(_), None | Some(Value::Null)) => None,
                (PathSegment::Index(i), Some(Value::Array(items))) => {
                    Some(items.get(*i).ok_or(WriteError::IndexOutOfRange {
                        path: here.clone(),
                        index: *i,
                        len: items.len(),
                    })?)
                }
                _ => return Err(WriteError::NotAContainer { path: here }),
            };
            here = here.join(seg.clone());
        }
        Ok(())
    }

    /// Mutable access to the array at `path`, creating it when absent.
    pub fn array_mut(&mut self, path: &FieldPath) -> Result<&mut Vec<Value>, WriteError> {
        if self.get(path).is_none_or(Value::is_null) {
            self.set(path, Value::Array(Vec::new()))?;
        }
        match self.get_mut(path) {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(WriteError::NotAContainer { path: path.clone() }),
        }
    }

    /// Length of the array at `path`; absent counts as empty.
    pub fn array_len(&self, path: &FieldPath) -> Option<usize> {
        match self.get(path) {
            None | Some(Value::Null) => Some(0),
            Some(Value::Array(items)) => Some(items.len()),
            Some(_) => None,
        }
    }
}

impl From<Value> for DataInstance {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
