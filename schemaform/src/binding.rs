//! Two-way binding between a document and its widget tree.
//!
//! The [`BindingEngine`] owns the live [`DataInstance`] of one session. Every
//! edit goes through it: the raw input is coerced and written, the whole
//! document is re-validated and the affected part of the [`WidgetTree`] is
//! rebuilt, so the tree always reflects the instance.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::{
    data::{
        coerce::coerce,
        instance::DataInstance,
        model::SchemaModel,
        path::FieldPath,
        types::{FieldKind, SchemaField},
    },
    registry::{UnsupportedFieldError, WidgetKind, WidgetRegistry},
    session::SessionError,
    validate::{ErrorNode, ErrorTree, validate},
};

/// View record binding one field to one control.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetDescriptor {
    pub path: FieldPath,
    pub kind: WidgetKind,
    pub label: String,
    pub required: bool,
    pub editable: bool,
    /// Every error reported at this path, in the order they were found.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub current_error: Vec<ErrorNode>,
    /// Current value, for leaf widgets only. `None` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FieldPath>,
}

/// All descriptors of a session, keyed by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WidgetTree {
    nodes: BTreeMap<FieldPath, WidgetDescriptor>,
}

impl WidgetTree {
    pub fn get(&self, path: &FieldPath) -> Option<&WidgetDescriptor> {
        self.nodes.get(path)
    }

    pub fn root(&self) -> Option<&WidgetDescriptor> {
        self.nodes.get(&FieldPath::root())
    }

    pub fn contains(&self, path: &FieldPath) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Depth-first from the root, children in declaration/element order.
    pub fn walk(&self) -> Vec<&WidgetDescriptor> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<&FieldPath> = Vec::new();
        if let Some(root) = self.root() {
            stack.push(&root.path);
        }
        while let Some(path) = stack.pop() {
            let Some(node) = self.nodes.get(path) else {
                continue;
            };
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }

    fn remove_subtree(&mut self, at: &FieldPath) {
        self.nodes.retain(|path, _| !path.starts_with(at));
    }
}

impl Serialize for WidgetTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.walk())
    }
}

/// Keeps a [`DataInstance`], its [`ErrorTree`] and its [`WidgetTree`] in step.
#[derive(Debug, Clone)]
pub struct BindingEngine {
    model: Arc<SchemaModel>,
    registry: WidgetRegistry,
    instance: DataInstance,
    errors: ErrorTree,
    tree: WidgetTree,
    unsupported: Vec<UnsupportedFieldError>,
}

impl BindingEngine {
    /// Bind `initial` (or the schema defaults) and build the full tree.
    pub fn build(model: Arc<SchemaModel>, registry: WidgetRegistry, initial: Option<Value>) -> Self {
        let initial = initial
            .or_else(|| model.default_value(model.root(), true))
            .unwrap_or(Value::Null);
        let mut engine = Self {
            model,
            registry,
            instance: DataInstance::new(initial),
            errors: ErrorTree::new(),
            tree: WidgetTree::default(),
            unsupported: Vec::new(),
        };
        engine.rebuild_all();
        debug!(
            "bound document: {} widget(s), {} error(s), {} unsupported field(s)",
            engine.tree.len(),
            engine.errors.len(),
            engine.unsupported.len()
        );
        engine
    }

    pub fn model(&self) -> &Arc<SchemaModel> {
        &self.model
    }

    pub fn registry(&self) -> &WidgetRegistry {
        &self.registry
    }

    pub fn instance(&self) -> &DataInstance {
        &self.instance
    }

    /// Snapshot of the current document.
    pub fn document(&self) -> Value {
        self.instance.as_value().clone()
    }

    pub fn errors(&self) -> &ErrorTree {
        &self.errors
    }

    pub fn tree(&self) -> &WidgetTree {
        &self.tree
    }

    pub fn descriptor(&self, path: &FieldPath) -> Option<&WidgetDescriptor> {
        self.tree.get(path)
    }

    /// Fields no enabled widget could render, sorted by path.
    pub fn unsupported(&self) -> &[UnsupportedFieldError] {
        &self.unsupported
    }

    /// Write host input at `path`. Input that does not convert is stored raw
    /// and shows up as a `coercion` error.
    pub fn set_value(&mut self, path: &FieldPath, raw: Value) -> Result<(), SessionError> {
        let model = Arc::clone(&self.model);
        let field = model
            .field_at(path)
            .ok_or_else(|| SessionError::UnknownField(path.clone()))?;
        let value = coerce(&model, field, raw);
        trace!("set {path} = {value}");
        let changed = self.instance.set(path, value)?;
        self.after_mutation(&changed);
        Ok(())
    }

    /// Insert a default element into the array at `array`, at `at` or at the
    /// end. Returns the new element's path.
    pub fn add_element(&mut self, array: &FieldPath, at: Option<usize>) -> Result<FieldPath, SessionError> {
        let model = Arc::clone(&self.model);
        let field = self.growable_array(&model, array)?;
        let len = self.array_len(array)?;
        let at = at.unwrap_or(len);
        if at > len {
            return Err(SessionError::IndexOutOfRange {
                path: array.clone(),
                index: at,
                len,
            });
        }
        let element = model.default_element(field, at);
        self.instance.array_mut(array)?.insert(at, element);
        debug!("added element {at} to {array}");
        self.after_mutation(array);
        Ok(array.join(at))
    }

    /// Remove element `index` of the array at `array`; later elements shift
    /// down. Returns the removed value.
    pub fn remove_element(&mut self, array: &FieldPath, index: usize) -> Result<Value, SessionError> {
        let model = Arc::clone(&self.model);
        self.growable_array(&model, array)?;
        self.check_index(array, index)?;
        let removed = self.instance.array_mut(array)?.remove(index);
        debug!("removed element {index} from {array}");
        self.after_mutation(array);
        Ok(removed)
    }

    /// Deep-copy element `index` and insert the copy right after it.
    pub fn copy_element(&mut self, array: &FieldPath, index: usize) -> Result<FieldPath, SessionError> {
        let model = Arc::clone(&self.model);
        self.growable_array(&model, array)?;
        self.check_index(array, index)?;
        let items = self.instance.array_mut(array)?;
        let copy = items[index].clone();
        items.insert(index + 1, copy);
        debug!("copied element {index} of {array}");
        self.after_mutation(array);
        Ok(array.join(index + 1))
    }

    /// Swap the whole document and rebuild everything.
    pub fn replace_instance(&mut self, value: Value) {
        self.instance = DataInstance::new(value);
        self.rebuild_all();
        debug_assert!(self.is_consistent());
    }

    /// Re-run validation without touching the document.
    pub fn revalidate(&mut self) -> &ErrorTree {
        self.errors = validate(&self.model, self.instance.as_value());
        self.sync_errors();
        &self.errors
    }

    /// Whether tree, errors and unsupported list equal a fresh build from the
    /// current instance.
    pub fn is_consistent(&self) -> bool {
        let mut fresh = self.clone();
        fresh.rebuild_all();
        fresh.tree == self.tree && fresh.errors == self.errors && fresh.unsupported == self.unsupported
    }

    fn growable_array<'m>(&self, model: &'m SchemaModel, array: &FieldPath) -> Result<&'m SchemaField, SessionError> {
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
        Ok(field)
    }

    fn array_len(&self, array: &FieldPath) -> Result<usize, SessionError> {
        self.instance
            .array_len(array)
            .ok_or_else(|| SessionError::NotAnArray(array.clone()))
    }

    fn check_index(&self, array: &FieldPath, index: usize) -> Result<(), SessionError> {
        let len = self.array_len(array)?;
        if index >= len {
            return Err(SessionError::IndexOutOfRange {
                path: array.clone(),
                index,
                len,
            });
        }
        Ok(())
    }

    fn after_mutation(&mut self, changed: &FieldPath) {
        self.errors = validate(&self.model, self.instance.as_value());
        self.refresh(changed);
        debug_assert!(self.is_consistent(), "widget tree diverged after editing {changed}");
    }

    /// Rebuild the subtree at `changed`, or at its nearest ancestor that has
    /// a descriptor when `changed` itself has none yet.
    fn refresh(&mut self, changed: &FieldPath) {
        let mut at = changed.clone();
        while !self.tree.contains(&at) {
            match at.parent() {
                Some(parent) => at = parent,
                None => break,
            }
        }
        self.rebuild(&at);
        self.sync_errors();
    }

    fn rebuild(&mut self, at: &FieldPath) {
        let model = Arc::clone(&self.model);
        let Some(field) = model.field_at(at) else {
            return;
        };
        let inherited_read_only = at
            .parent()
            .and_then(|p| self.tree.get(&p))
            .is_some_and(|d| !d.editable);

        self.tree.remove_subtree(at);
        self.unsupported.retain(|u| !u.path.starts_with(at));

        let mut built = Vec::new();
        let mut unsupported = Vec::new();
        let present = self.render(at, field, inherited_read_only, &mut built, &mut unsupported);
        for node in built {
            self.tree.nodes.insert(node.path.clone(), node);
        }
        self.unsupported.extend(unsupported);
        self.unsupported.sort_by(|a, b| a.path.cmp(&b.path));

        if !present {
            if let Some(parent) = at.parent().and_then(|p| self.tree.nodes.get_mut(&p)) {
                parent.children.retain(|c| c != at);
            }
        }
    }

    fn rebuild_all(&mut self) {
        self.errors = validate(&self.model, self.instance.as_value());
        self.tree = WidgetTree::default();
        self.unsupported.clear();
        self.rebuild(&FieldPath::root());
    }

    fn sync_errors(&mut self) {
        for (path, node) in self.tree.nodes.iter_mut() {
            node.current_error = self.errors.get(path).to_vec();
        }
    }

    /// Build descriptors for `field` at `path` and below. Returns false when
    /// the field itself has no widget.
    fn render(
        &self,
        path: &FieldPath,
        field: &SchemaField,
        inherited_read_only: bool,
        out: &mut Vec<WidgetDescriptor>,
        unsupported: &mut Vec<UnsupportedFieldError>,
    ) -> bool {
        let kind = match self.registry.resolve(&self.model, field, path) {
            Ok(kind) => kind,
            Err(err) => {
                debug!("{err}");
                unsupported.push(err);
                return false;
            }
        };
        let resolved = self.model.resolve(field);
        let read_only = inherited_read_only || field.read_only || resolved.read_only;
        let value = self.instance.get(path);

        let mut children = Vec::new();
        if kind.is_container() {
            match (&resolved.kind, value) {
                (FieldKind::Object, Some(Value::Object(_))) => {
                    for child in &resolved.children {
                        let child_path = path.join(child.name.as_str());
                        if self.render(&child_path, child, read_only, out, unsupported) {
                            children.push(child_path);
                        }
                    }
                }
                (FieldKind::Array, Some(Value::Array(items))) => {
                    for i in 0..items.len() {
                        let Some(item) = resolved.item(i) else {
                            continue;
                        };
                        let child_path = path.join(i);
                        if self.render(&child_path, item, read_only, out, unsupported) {
                            children.push(child_path);
                        }
                    }
                }
                _ => {}
            }
        }

        let label = field.title.as_deref().unwrap_or_else(|| resolved.label()).to_string();
        out.push(WidgetDescriptor {
            path: path.clone(),
            kind,
            label,
            required: field.required,
            editable: !read_only,
            current_error: self.errors.get(path).to_vec(),
            value: if kind.is_container() { None } else { value.cloned() },
            children,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::ConstraintKind;
    use serde_json::json;

    fn engine(schema: Value, initial: Option<Value>) -> BindingEngine {
        let model = Arc::new(SchemaModel::try_from(&schema).unwrap());
        BindingEngine::build(model, WidgetRegistry::default(), initial)
    }

    #[test]
    fn test_object_children_follow_declaration_order() {
        let e = engine(
            json!({"type": "object", "properties": {"z": {"type": "string"}, "a": {"type": "integer"}}}),
            Some(json!({"a": 1})),
        );
        let paths: Vec<String> = e.tree().walk().iter().map(|d| d.path.to_string()).collect();
        assert_eq!(paths, vec!["(root)", "z", "a"]);
        assert_eq!(e.descriptor(&"z".into()).unwrap().value, None);
        assert_eq!(e.descriptor(&"a".into()).unwrap().value, Some(json!(1)));
    }

    #[test]
    fn test_set_value_refreshes_error() {
        let mut e = engine(
            json!({"type": "object", "properties": {"n": {"type": "integer", "minimum": 0}}}),
            Some(json!({"n": 1})),
        );
        let path = FieldPath::parse("n");
        e.set_value(&path, json!("-3")).unwrap();
        assert_eq!(e.document(), json!({"n": -3}));
        assert_eq!(e.descriptor(&path).unwrap().current_error.len(), 1);
        e.set_value(&path, json!("4")).unwrap();
        assert!(e.descriptor(&path).unwrap().current_error.is_empty());
        assert!(e.is_consistent());
    }

    #[test]
    fn test_descriptor_carries_every_error() {
        let mut e = engine(
            json!({
                "type": "object",
                "properties": {"code": {"type": "string", "minLength": 3, "pattern": "^[A-Z]+$"}}
            }),
            Some(json!({"code": "ABC"})),
        );
        let path = FieldPath::parse("code");
        assert!(e.descriptor(&path).unwrap().current_error.is_empty());
        e.set_value(&path, json!("a")).unwrap();
        let codes: Vec<ConstraintKind> = e
            .descriptor(&path)
            .unwrap()
            .current_error
            .iter()
            .map(|n| n.code)
            .collect();
        assert_eq!(codes, vec![ConstraintKind::MinLength, ConstraintKind::Pattern]);
        assert_eq!(e.descriptor(&path).unwrap().current_error, e.errors().get(&path));
        assert!(e.is_consistent());
    }

    #[test]
    fn test_absent_object_expands_on_write() {
        let mut e = engine(
            json!({"type": "object", "properties": {"meta": {"type": "object", "properties": {"x": {"type": "integer"}}}}}),
            None,
        );
        assert!(e.descriptor(&"meta".into()).unwrap().children.is_empty());
        e.set_value(&"meta.x".into(), json!(2)).unwrap();
        assert_eq!(e.descriptor(&"meta".into()).unwrap().children, vec![FieldPath::parse("meta.x")]);
        assert!(e.is_consistent());
    }

    #[test]
    fn test_read_only_propagates() {
        let e = engine(
            json!({"type": "object", "properties": {
                "locked": {"type": "object", "readOnly": true, "properties": {"v": {"type": "string"}}}
            }}),
            Some(json!({"locked": {"v": "x"}})),
        );
        assert!(!e.descriptor(&"locked.v".into()).unwrap().editable);
        assert!(e.descriptor(&FieldPath::root()).unwrap().editable);
    }

    #[test]
    fn test_tuple_arrays_are_fixed() {
        let mut e = engine(
            json!({"type": "object", "properties": {"span": {"type": "array", "prefixItems": [{"type": "integer"}, {"type": "integer"}]}}}),
            Some(json!({"span": [1, 2]})),
        );
        assert!(matches!(
            e.add_element(&"span".into(), None),
            Err(SessionError::FixedLength(_))
        ));
    }

    #[test]
    fn test_unknown_paths_are_rejected() {
        let mut e = engine(json!({"type": "object", "properties": {"a": {"type": "string"}}}), None);
        assert!(matches!(
            e.set_value(&"b".into(), json!(1)),
            Err(SessionError::UnknownField(_))
        ));
        assert!(matches!(
            e.add_element(&"a".into(), None),
            Err(SessionError::NotAnArray(_))
        ));
    }
}
