use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use schemaform::{
    ActionOutcome, ActionRequest, ConstraintKind, FieldPath, HookPoint, MemoryStore, Placement,
    SchemaCache, SchemaError, SchemaModel, Session, SessionError, SessionOptions, SessionState,
    Value, WidgetKind, validate,
};
use serde_json::json;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn open(schema: Value, initial: Option<Value>) -> Session {
    init_logger();
    let model = SchemaModel::try_from(&schema).expect("schema maps");
    Session::open(Arc::new(model), initial, SessionOptions::default()).expect("session opens")
}

fn path(s: &str) -> FieldPath {
    FieldPath::parse(s)
}

fn rows_schema() -> Value {
    json!({
        "type": "object",
        "required": ["rows"],
        "properties": {
            "rows": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "qty"],
                    "properties": {
                        "name": {"type": "string", "default": "item"},
                        "qty": {"type": "integer", "minimum": 1, "default": 1}
                    }
                }
            }
        }
    })
}

#[test]
fn test_radius_scenario() {
    let mut s = open(
        json!({"type": "object", "properties": {"radius": {"type": "number", "minimum": 0}}}),
        Some(json!({"radius": 1})),
    );
    s.set_value(&path("radius"), json!(-5)).unwrap();
    assert_eq!(
        s.errors().codes(),
        BTreeMap::from([(path("radius"), vec![ConstraintKind::Minimum])])
    );

    let mut store = MemoryStore::new();
    let outcome = s.save_to(&mut store).unwrap();
    let ActionOutcome::ValidationBlocked(nodes) = outcome else {
        panic!("save must be blocked");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].path, path("radius"));
    assert_eq!(nodes[0].code, ConstraintKind::Minimum);
    assert_eq!(s.state(), SessionState::Dirty);
    assert_eq!(store.saves(), 0);

    s.set_value(&path("radius"), json!(5)).unwrap();
    assert_eq!(s.save_to(&mut store).unwrap(), ActionOutcome::Saved);
    assert_eq!(s.state(), SessionState::Clean);
    assert_eq!(store.document(), Some(&json!({"radius": 5})));
}

#[test]
fn test_array_add_then_remove() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "first", "qty": 3}]})));
    let added = s.add_element(&path("rows"), Some(1)).unwrap();
    assert_eq!(added, path("rows.1"));
    assert_eq!(
        s.document(),
        json!({"rows": [{"name": "first", "qty": 3}, {"name": "item", "qty": 1}]})
    );
    assert_eq!(s.descriptor(&path("rows")).unwrap().children.len(), 2);
    assert!(s.descriptor(&path("rows.1.qty")).is_some());

    s.remove_element(&path("rows"), 0).unwrap();
    assert_eq!(s.document(), json!({"rows": [{"name": "item", "qty": 1}]}));
    assert!(s.descriptor(&path("rows.1")).is_none());
    assert_eq!(
        s.descriptor(&path("rows.0.name")).unwrap().value,
        Some(json!("item"))
    );
    assert!(s.engine().is_consistent());
}

#[test]
fn test_add_then_remove_round_trips() {
    let initial = json!({"rows": [{"name": "a", "qty": 1}, {"name": "b", "qty": 2}]});
    let mut s = open(rows_schema(), Some(initial.clone()));
    let before = s.errors().clone();
    for at in 0..=2 {
        s.add_element(&path("rows"), Some(at)).unwrap();
        s.remove_element(&path("rows"), at).unwrap();
        assert_eq!(s.document(), initial);
        assert_eq!(s.errors(), &before);
    }
}

#[test]
fn test_required_error_clears_without_touching_others() {
    let mut s = open(
        json!({
            "type": "object",
            "required": ["name"],
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer", "minimum": 0}
            }
        }),
        Some(json!({"age": -1})),
    );
    assert_eq!(s.errors().first(&path("name")).unwrap().code, ConstraintKind::Required);
    let age_before = s.errors().get(&path("age")).to_vec();

    s.set_value(&path("name"), json!("Ada")).unwrap();
    assert!(!s.errors().contains(&path("name")));
    assert_eq!(s.errors().get(&path("age")), age_before.as_slice());
    assert!(s.descriptor(&path("name")).unwrap().current_error.is_empty());
}

#[test]
fn test_delete_needs_confirmation() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}, {"name": "b", "qty": 2}]})));

    let outcome = s.dispatch(ActionRequest::delete("rows.0")).unwrap();
    assert_eq!(outcome, ActionOutcome::ConfirmationRequired(ActionRequest::delete("rows.0")));
    assert_eq!(s.document()["rows"].as_array().unwrap().len(), 2);

    assert_eq!(s.dismiss().unwrap(), ActionOutcome::Dismissed);
    assert!(matches!(s.confirm(), Err(SessionError::NoPendingConfirmation)));

    s.dispatch(ActionRequest::delete("rows.0")).unwrap();
    let outcome = s.confirm().unwrap();
    assert_eq!(
        outcome,
        ActionOutcome::Deleted {
            path: path("rows.0"),
            removed: json!({"name": "a", "qty": 1})
        }
    );
    assert_eq!(s.document(), json!({"rows": [{"name": "b", "qty": 2}]}));
    assert_eq!(s.descriptor(&path("rows.0.name")).unwrap().value, Some(json!("b")));
}

#[test]
fn test_edit_drops_pending_confirmation() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}]})));
    s.dispatch(ActionRequest::delete("rows.0")).unwrap();
    s.set_value(&path("rows.0.name"), json!("z")).unwrap();
    assert!(s.pending_confirmation().is_none());
    assert!(matches!(s.confirm(), Err(SessionError::NoPendingConfirmation)));
}

#[test]
fn test_delete_without_confirmation() {
    init_logger();
    let model = Arc::new(SchemaModel::try_from(&rows_schema()).unwrap());
    let options = SessionOptions {
        skip_delete_confirmation: true,
        ..SessionOptions::default()
    };
    let mut s = Session::open(model, Some(json!({"rows": [{"name": "a", "qty": 1}]})), options).unwrap();
    let outcome = s.dispatch(ActionRequest::delete("rows.0")).unwrap();
    assert!(matches!(outcome, ActionOutcome::Deleted { .. }));
    assert_eq!(s.document(), json!({"rows": []}));
}

#[test]
fn test_copy_inserts_after_source() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}, {"name": "b", "qty": 2}]})));
    let outcome = s.dispatch(ActionRequest::copy("rows.0")).unwrap();
    assert_eq!(outcome, ActionOutcome::Copied(path("rows.1")));
    assert_eq!(
        s.document(),
        json!({"rows": [{"name": "a", "qty": 1}, {"name": "a", "qty": 1}, {"name": "b", "qty": 2}]})
    );
    s.set_value(&path("rows.1.name"), json!("copy")).unwrap();
    assert_eq!(s.document()["rows"][0]["name"], json!("a"));
}

#[test]
fn test_add_action_targets() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}]})));
    assert_eq!(
        s.dispatch(ActionRequest::add("rows")).unwrap(),
        ActionOutcome::Added(path("rows.1"))
    );
    assert_eq!(
        s.dispatch(ActionRequest::add("rows.0")).unwrap(),
        ActionOutcome::Added(path("rows.0"))
    );
    assert_eq!(s.document()["rows"].as_array().unwrap().len(), 3);
    assert!(matches!(
        s.dispatch(ActionRequest::add("rows.9")),
        Err(SessionError::IndexOutOfRange { index: 9, len: 3, .. })
    ));
}

#[test]
fn test_revert_restores_snapshot() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}]})));
    let reverted = Arc::new(Mutex::new(0));
    let counter = reverted.clone();
    s.add_hook(
        HookPoint::Revert,
        "count",
        Arc::new(move |_: &Value| *counter.lock().unwrap() += 1),
        Placement::Back,
    );

    s.set_value(&path("rows.0.qty"), json!(0)).unwrap();
    s.add_element(&path("rows"), None).unwrap();
    assert!(!s.errors().is_empty());

    assert_eq!(s.dispatch(ActionRequest::revert()).unwrap(), ActionOutcome::Reverted);
    assert_eq!(s.document(), json!({"rows": [{"name": "a", "qty": 1}]}));
    assert!(s.errors().is_empty());
    assert!(s.descriptor(&path("rows.1")).is_none());
    assert_eq!(s.state(), SessionState::Clean);
    assert_eq!(
        &s.history()[s.history().len() - 3..],
        &[SessionState::Dirty, SessionState::Reverted, SessionState::Clean]
    );
    assert_eq!(*reverted.lock().unwrap(), 1);
}

#[test]
fn test_revert_after_save_uses_saved_document() {
    let mut s = open(
        json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
        Some(json!({"n": 1})),
    );
    let mut store = MemoryStore::new();
    s.set_value(&path("n"), json!(2)).unwrap();
    s.save_to(&mut store).unwrap();
    s.set_value(&path("n"), json!(3)).unwrap();
    s.revert().unwrap();
    assert_eq!(s.document(), json!({"n": 2}));
}

#[test]
fn test_store_failure_leaves_save_failed() {
    let mut s = open(
        json!({"type": "object", "properties": {"n": {"type": "integer"}}}),
        Some(json!({"n": 1})),
    );
    let mut store = MemoryStore::new();
    store.reject_next("read-only volume");
    s.set_value(&path("n"), json!(2)).unwrap();
    let err = s.save_to(&mut store).unwrap_err();
    assert!(matches!(err, SessionError::Store(_)));
    assert_eq!(s.state(), SessionState::SaveFailed);
    assert_eq!(s.document(), json!({"n": 2}));
    assert_eq!(s.snapshot(), &json!({"n": 1}));

    assert_eq!(s.save_to(&mut store).unwrap(), ActionOutcome::Saved);
    assert_eq!(s.state(), SessionState::Clean);
}

#[test]
fn test_permissive_edit_reports_coercion() {
    let mut s = open(
        json!({"type": "object", "properties": {"count": {"type": "integer"}}}),
        None,
    );
    s.set_value(&path("count"), json!("many")).unwrap();
    assert_eq!(s.document(), json!({"count": "many"}));
    let errors = &s.descriptor(&path("count")).unwrap().current_error;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].code, ConstraintKind::Coercion);
    assert!(matches!(s.begin_save().unwrap(), ActionOutcome::ValidationBlocked(_)));
}

#[test]
fn test_recursive_schema_session() {
    let schema = json!({
        "$defs": {
            "Node": {
                "type": "object",
                "required": ["label"],
                "properties": {
                    "label": {"type": "string", "default": "node"},
                    "children": {"type": "array", "items": {"$ref": "#/$defs/Node"}}
                }
            }
        },
        "$ref": "#/$defs/Node"
    });
    let mut s = open(schema, None);
    assert_eq!(s.document(), json!({"label": "node", "children": []}));

    let child = s.add_element(&path("children"), None).unwrap();
    assert_eq!(child, path("children.0"));
    let grandchild = s.add_element(&path("children.0.children"), None).unwrap();
    s.set_value(&grandchild.join("label"), json!("leaf")).unwrap();
    assert_eq!(
        s.document(),
        json!({
            "label": "node",
            "children": [{"label": "node", "children": [{"label": "leaf", "children": []}]}]
        })
    );
    assert_eq!(
        s.descriptor(&path("children.0.children.0.label")).unwrap().kind,
        WidgetKind::Text
    );
    assert!(s.errors().is_empty());
}

#[test]
fn test_unresolved_ref_fails_before_any_session() {
    let mut cache = SchemaCache::new();
    let err = Session::open_schema(
        &mut cache,
        &json!({"type": "object", "properties": {"x": {"$ref": "#/$defs/Nope"}}}),
        None,
        SessionOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, SessionError::Schema(SchemaError::UnresolvedRef { .. })));
    assert!(cache.is_empty());
}

#[test]
fn test_malformed_constraint_is_rejected() {
    let err = SchemaModel::try_from(&json!({
        "type": "object",
        "properties": {"tags": {"type": "array", "minItems": 3, "maxItems": 1}}
    }))
    .unwrap_err();
    assert!(matches!(
        err,
        SchemaError::MalformedConstraint { ref keyword, ref path, .. }
            if keyword == "minItems" && path == "#/properties/tags"
    ));
}

#[test]
fn test_unsupported_fields_block_open() {
    init_logger();
    let model = SchemaModel::try_from(&json!({
        "type": "object",
        "properties": {"blob": {"type": "null"}, "name": {"type": "string"}}
    }))
    .unwrap();
    let err = Session::open(Arc::new(model), Some(json!({"blob": null})), SessionOptions::default()).unwrap_err();
    let SessionError::Unsupported(fields) = err else {
        panic!("expected unsupported fields");
    };
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].path, path("blob"));
}

#[test]
fn test_close_and_resume() {
    let schema = json!({"$id": "urn:example:counter", "type": "object", "properties": {"n": {"type": "integer"}}});
    let mut cache = SchemaCache::new();
    let mut s = Session::open_schema(&mut cache, &schema, Some(json!({"n": 1})), SessionOptions::default()).unwrap();
    s.set_value(&path("n"), json!(7)).unwrap();
    let saved = s.close();
    assert_eq!(saved.schema_id, "urn:example:counter");

    let model = cache.get_or_map(&schema).unwrap();
    assert_eq!(cache.len(), 1);
    let resumed = Session::resume(model, saved, SessionOptions::default()).unwrap();
    assert_eq!(resumed.document(), json!({"n": 7}));
    assert_eq!(resumed.state(), SessionState::Clean);
}

#[test]
fn test_validation_is_idempotent_and_mapping_deterministic() {
    let schema = rows_schema();
    let a = SchemaModel::try_from(&schema).unwrap();
    let b = SchemaModel::try_from(&schema).unwrap();
    assert_eq!(a, b);
    let doc = json!({"rows": [{"name": 3, "qty": 0}, {}]});
    let first = validate(&a, &doc);
    assert_eq!(first, validate(&a, &doc));
    assert_eq!(first, validate(&b, &doc));
    assert_eq!(first.len(), 4);
}

#[test]
fn test_failed_write_leaves_session_untouched() {
    let mut s = open(rows_schema(), Some(json!({})));
    let errors_before = s.errors().clone();
    let err = s.set_value(&path("rows.0.name"), json!("x")).unwrap_err();
    assert!(matches!(err, SessionError::NotAContainer(ref p) if *p == path("rows")));
    assert_eq!(s.document(), json!({}));
    assert_eq!(s.errors(), &errors_before);
    assert_eq!(s.state(), SessionState::Clean);
    assert!(s.engine().is_consistent());

    s.set_value(&path("rows"), json!([])).unwrap();
    assert!(matches!(
        s.set_value(&path("rows.2.qty"), json!(3)),
        Err(SessionError::IndexOutOfRange { index: 2, len: 0, .. })
    ));
    assert_eq!(s.document(), json!({"rows": []}));
}

#[test]
fn test_null_on_optional_and_enum_fields() {
    let mut s = open(
        json!({
            "type": "object",
            "properties": {
                "n": {"type": "integer"},
                "mode": {"enum": ["fast", null]}
            }
        }),
        Some(json!({"n": 1, "mode": "fast"})),
    );
    s.set_value(&path("n"), Value::Null).unwrap();
    assert_eq!(s.document(), json!({"n": null, "mode": "fast"}));
    assert_eq!(
        s.errors().codes(),
        BTreeMap::from([(path("n"), vec![ConstraintKind::Coercion])])
    );
    assert!(matches!(s.begin_save().unwrap(), ActionOutcome::ValidationBlocked(_)));

    s.set_value(&path("mode"), Value::Null).unwrap();
    assert!(!s.errors().contains(&path("mode")));
    s.set_value(&path("n"), json!("2")).unwrap();
    assert!(s.errors().is_empty());

    let mut store = MemoryStore::new();
    assert_eq!(s.save_to(&mut store).unwrap(), ActionOutcome::Saved);
    assert_eq!(s.snapshot(), &json!({"n": 2, "mode": null}));
}

#[test]
fn test_every_mutation_is_refused_while_saving() {
    let mut s = open(rows_schema(), Some(json!({"rows": [{"name": "a", "qty": 1}, {"name": "b", "qty": 2}]})));
    s.dispatch(ActionRequest::delete("rows.0")).unwrap();
    let ActionOutcome::SaveStarted(pending) = s.begin_save().unwrap() else {
        panic!("expected the save to start");
    };
    assert_eq!(s.state(), SessionState::Saving);

    let rows = path("rows");
    assert!(matches!(s.add_element(&rows, None), Err(SessionError::SessionBusy)));
    assert!(matches!(s.remove_element(&rows, 0), Err(SessionError::SessionBusy)));
    assert!(matches!(s.copy_element(&rows, 0), Err(SessionError::SessionBusy)));
    assert!(matches!(s.confirm(), Err(SessionError::SessionBusy)));
    assert!(matches!(
        s.set_value(&path("rows.0.name"), json!("z")),
        Err(SessionError::SessionBusy)
    ));
    assert_eq!(s.document(), pending.document);

    assert_eq!(s.finish_save(pending, Ok(())).unwrap(), ActionOutcome::Saved);
    assert!(matches!(s.confirm().unwrap(), ActionOutcome::Deleted { .. }));
    assert_eq!(s.document(), json!({"rows": [{"name": "b", "qty": 2}]}));
}

#[test]
fn test_unique_items_refreshes_container_descriptor() {
    let mut s = open(
        json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "uniqueItems": true, "items": {"type": "string"}}
            }
        }),
        Some(json!({"tags": ["a", "b"]})),
    );
    assert!(s.descriptor(&path("tags")).unwrap().current_error.is_empty());

    s.set_value(&path("tags.1"), json!("a")).unwrap();
    let codes: Vec<ConstraintKind> = s
        .descriptor(&path("tags"))
        .unwrap()
        .current_error
        .iter()
        .map(|n| n.code)
        .collect();
    assert_eq!(codes, vec![ConstraintKind::UniqueItems]);
    assert!(s.descriptor(&path("tags.1")).unwrap().current_error.is_empty());

    s.set_value(&path("tags.1"), json!("c")).unwrap();
    assert!(s.descriptor(&path("tags")).unwrap().current_error.is_empty());
    assert!(s.engine().is_consistent());
}

#[test]
fn test_untyped_array_elements_are_editable() {
    let mut s = open(
        json!({"type": "object", "properties": {"bag": {"type": "array"}}}),
        Some(json!({"bag": [1, "two"]})),
    );
    assert_eq!(s.descriptor(&path("bag.0")).unwrap().kind, WidgetKind::Text);
    assert_eq!(s.descriptor(&path("bag.0")).unwrap().value, Some(json!(1)));
    s.set_value(&path("bag.1"), json!("three")).unwrap();
    assert_eq!(s.document(), json!({"bag": [1, "three"]}));
    assert!(s.errors().is_empty());
}
