//! Integration tests for the record store.

use parking_lot::Mutex;
use record_store::{
    ApplyOptions, ChangeFilter, ChangeSource, Derivation, Diff, Encoding, Epoch, FieldRule,
    HistoryManager, ObjectValidator, Record, RecordId, RecordType, SchemaVersion, Store,
    StoreChange, StoreError, StoreEvent, StoreSchema, StoreSnapshot, SubscriptionConfig,
};
use serde_json::{json, Map};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn test_schema() -> StoreSchema {
    let page = RecordType::new(
        "page",
        ObjectValidator::new()
            .field("name", FieldRule::String)
            .field("index", FieldRule::String),
    )
    .with_default_properties(|| {
        let mut props = Map::new();
        props.insert("index".into(), json!("a1"));
        props
    });

    let shape = RecordType::new(
        "shape",
        ObjectValidator::new()
            .field("x", FieldRule::Number)
            .field("y", FieldRule::Number)
            .field("parentId", FieldRule::id("page"))
            .field("color", FieldRule::one_of(["black", "red", "blue"])),
    )
    .with_default_properties(|| {
        let mut props = Map::new();
        props.insert("x".into(), json!(0));
        props.insert("y".into(), json!(0));
        props.insert("color".into(), json!("black"));
        props
    })
    .with_references(["parentId"]);

    StoreSchema::builder()
        .record_type(page)
        .record_type(shape)
        .build()
        .unwrap()
}

fn test_store() -> Store {
    init_tracing();
    Store::with_schema(test_schema())
}

fn page(suffix: &str) -> Record {
    Record::new(RecordId::new("page", suffix), "page").with("name", format!("Page {}", suffix))
}

fn shape(suffix: &str, page: &str) -> Record {
    Record::new(RecordId::new("shape", suffix), "shape")
        .with("parentId", RecordId::new("page", page).to_string())
}

fn record_changes(store: &Store) -> Arc<Mutex<Vec<StoreChange>>> {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    store.listen(ChangeFilter::all(), move |change| sink.lock().push(change.clone()));
    changes
}

// --- Realistic Workflow Tests ---

#[test]
fn test_editor_session_workflow() {
    let store = test_store();
    let changes = record_changes(&store);

    store.create([page("1")]).unwrap();
    store.create([shape("a", "1"), shape("b", "1")]).unwrap();
    store
        .update(&RecordId::new("shape", "a"), |r| r.with("x", 100).with("color", "red"))
        .unwrap();
    store.delete([RecordId::new("shape", "b")]).unwrap();

    let changes = changes.lock();
    assert_eq!(changes.len(), 4);
    assert_eq!(changes[3].epoch, Epoch(4));
    assert!(changes.iter().all(|c| c.source == ChangeSource::Local));

    let (before, after) = &changes[2].diff.updated[&RecordId::new("shape", "a")];
    assert_eq!(before.get("x"), Some(&json!(0)));
    assert_eq!(after.get("x"), Some(&json!(100)));

    let removed = &changes[3].diff.removed[&RecordId::new("shape", "b")];
    assert_eq!(removed.get_str("color"), Some("black"));

    assert_eq!(store.len(), 2);
}

#[test]
fn test_transaction_emits_one_coalesced_diff() {
    let store = test_store();
    store.create([page("1")]).unwrap();
    let changes = record_changes(&store);

    store
        .transaction(|tx| {
            tx.create([shape("a", "1"), shape("temp", "1")])?;
            tx.update(&RecordId::new("shape", "a"), |r| r.with("x", 5))?;
            tx.update(&RecordId::new("shape", "a"), |r| r.with("y", 7))?;
            tx.delete([RecordId::new("shape", "temp")]);
            tx.update(&RecordId::new("page", "1"), |r| r.with("name", "Renamed"))?;
            Ok(())
        })
        .unwrap();

    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    let diff = &changes[0].diff;

    assert_eq!(diff.added.len(), 1);
    let added = &diff.added[&RecordId::new("shape", "a")];
    assert_eq!(added.get("x"), Some(&json!(5)));
    assert_eq!(added.get("y"), Some(&json!(7)));
    assert!(!diff.contains(&RecordId::new("shape", "temp")));
    assert_eq!(diff.updated.len(), 1);
    assert!(diff.removed.is_empty());
}

#[test]
fn test_failed_transaction_leaves_nothing() {
    let store = test_store();
    store.create([page("1")]).unwrap();
    let changes = record_changes(&store);
    let epoch = store.epoch();

    let result = store.transaction(|tx| {
        tx.create([shape("a", "1")])?;
        tx.create([shape("b", "1").with("color", "chartreuse")])?;
        Ok(())
    });

    match result {
        Err(StoreError::Validation(e)) => {
            assert_eq!(e.record_id, Some(RecordId::new("shape", "b")));
            assert_eq!(e.path, "color");
        }
        other => panic!("Expected validation error, got {:?}", other),
    }
    assert!(!store.has(&RecordId::new("shape", "a")));
    assert!(!store.has(&RecordId::new("shape", "b")));
    assert!(changes.lock().is_empty());
    assert_eq!(store.epoch(), epoch);
}

#[test]
fn test_deliberate_abort() {
    let store = test_store();
    let result: record_store::Result<()> = store.transaction(|tx| {
        tx.create([page("1")])?;
        Err(StoreError::Aborted("user cancelled".into()))
    });
    assert!(matches!(result, Err(StoreError::Aborted(_))));
    assert!(store.is_empty());
}

// --- Diff Replay ---

#[test]
fn test_replay_diff_between_peers() {
    let local = test_store();
    let remote = test_store();
    let forwarded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&forwarded);
    local.listen(ChangeFilter::local(), move |change| sink.lock().push(change.diff.clone()));

    local.create([page("1"), shape("a", "1")]).unwrap();
    local
        .update(&RecordId::new("shape", "a"), |r| r.with("x", 42))
        .unwrap();
    local.delete([RecordId::new("page", "1")]).unwrap();

    let remote_changes = record_changes(&remote);
    for diff in forwarded.lock().iter() {
        remote.apply_diff(diff, &ApplyOptions::default()).unwrap();
    }

    assert_eq!(local.get_snapshot(), remote.get_snapshot());
    assert!(remote_changes
        .lock()
        .iter()
        .all(|c| c.source == ChangeSource::Remote));
}

#[test]
fn test_apply_diff_conflict_leaves_state_unchanged() {
    let store = test_store();
    store.create([page("1"), shape("a", "1")]).unwrap();
    store
        .update(&RecordId::new("shape", "a"), |r| r.with("x", 10))
        .unwrap();
    let snapshot = store.get_snapshot();
    let changes = record_changes(&store);

    let stale_before = store.get(&RecordId::new("shape", "a")).unwrap().with("x", 1);
    let mut diff = Diff::new();
    diff.added.insert(RecordId::new("page", "2"), page("2").with("index", "a2"));
    diff.updated.insert(
        RecordId::new("shape", "a"),
        (stale_before.clone(), stale_before.with("x", 2)),
    );

    let err = store.apply_diff(&diff, &ApplyOptions::default()).unwrap_err();
    match err {
        StoreError::Conflict(conflict) => {
            assert_eq!(conflict.id, RecordId::new("shape", "a"));
            assert_eq!(conflict.actual.unwrap().get("x"), Some(&json!(10)));
        }
        other => panic!("Expected conflict, got {:?}", other),
    }
    assert_eq!(store.get_snapshot(), snapshot);
    assert!(changes.lock().is_empty());

    store
        .apply_diff(&diff, &ApplyOptions::default().overwrite())
        .unwrap();
    assert_eq!(
        store.get(&RecordId::new("shape", "a")).unwrap().get("x"),
        Some(&json!(2))
    );
    assert!(store.has(&RecordId::new("page", "2")));
}

#[test]
fn test_apply_diff_already_applied_is_noop() {
    let store = test_store();
    store.create([page("1")]).unwrap();
    let before = page("1").with("index", "a1");
    let after = before.clone().with("name", "New");
    store.update(&RecordId::new("page", "1"), |r| r.with("name", "New")).unwrap();
    let epoch = store.epoch();

    let mut diff = Diff::new();
    diff.updated.insert(RecordId::new("page", "1"), (before, after));
    store.apply_diff(&diff, &ApplyOptions::default()).unwrap();
    assert_eq!(store.epoch(), epoch);
}

#[test]
fn test_remote_diff_from_older_schema_is_migrated() {
    let shape_v1 = RecordType::unvalidated("shape").with_migrations(
        record_store::Migrations::new().step(
            1,
            |r: Record| r.with("opacity", 1),
            |mut r: Record| {
                r.remove("opacity");
                r
            },
        ),
    );
    let schema = StoreSchema::builder().record_type(shape_v1).build().unwrap();
    let store = Store::with_schema(schema);

    let mut diff = Diff::new();
    let old = Record::new(RecordId::new("shape", "a"), "shape").with("x", 1);
    diff.added.insert(old.id.clone(), old);

    store
        .apply_diff(
            &diff,
            &ApplyOptions::default().with_remote_schema(SchemaVersion::new(0).with_record("shape", 0)),
        )
        .unwrap();
    assert_eq!(
        store.get(&RecordId::new("shape", "a")).unwrap().get("opacity"),
        Some(&json!(1))
    );

    let err = store
        .apply_diff(
            &diff,
            &ApplyOptions::default().with_remote_schema(SchemaVersion::new(0).with_record("shape", 5)),
        )
        .unwrap_err();
    assert!(matches!(err, StoreError::IncompatibleSchema { .. }));
}

// --- Snapshots ---

#[test]
fn test_snapshot_persistence_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = test_store();
    store.create([page("1"), shape("a", "1"), shape("b", "1")]).unwrap();
    let snapshot = store.get_snapshot();

    for (encoding, file) in [(Encoding::Json, "doc.json"), (Encoding::MessagePack, "doc.msgpack")] {
        let path = dir.path().join(file);
        std::fs::write(&path, snapshot.to_bytes(encoding).unwrap()).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let loaded = StoreSnapshot::from_bytes(&bytes, encoding).unwrap();
        let restored = Store::from_snapshot(test_schema(), Default::default(), &loaded).unwrap();

        assert_eq!(restored.get_snapshot(), snapshot);
        assert_eq!(restored.all_records(), store.all_records());
    }
}

#[test]
fn test_load_snapshot_replaces_contents() {
    let store = test_store();
    store.create([page("1"), page("2")]).unwrap();
    let changes = record_changes(&store);

    let snapshot = StoreSnapshot::new(store.schema().current_version())
        .with_record(page("2").with("index", "a1").with("name", "Two"))
        .with_record(page("3").with("index", "a2"));
    store.load_snapshot(&snapshot).unwrap();

    assert!(!store.has(&RecordId::new("page", "1")));
    assert_eq!(
        store.get(&RecordId::new("page", "2")).unwrap().get_str("name"),
        Some("Two")
    );
    assert!(store.has(&RecordId::new("page", "3")));

    let changes = changes.lock();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].source, ChangeSource::Remote);
    assert_eq!(changes[0].diff.removed.len(), 1);
    assert_eq!(changes[0].diff.updated.len(), 1);
    assert_eq!(changes[0].diff.added.len(), 1);
}

// --- Subscriptions ---

#[test]
fn test_channel_subscription_filters_kinds() {
    let store = test_store();
    let handle = store.subscribe(SubscriptionConfig {
        filter: ChangeFilter::record_types(vec!["shape".into()]),
        ..Default::default()
    });

    store.create([page("1")]).unwrap();
    store.create([shape("a", "1")]).unwrap();

    match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
        StoreEvent::Change { change } => {
            assert_eq!(change.epoch, Epoch(2));
            assert_eq!(change.diff.added.len(), 1);
        }
        other => panic!("Expected change, got {:?}", other),
    }
    assert!(handle.try_recv().is_err());

    assert!(store.unlisten(handle.id));
    assert!(matches!(handle.try_recv(), Ok(StoreEvent::Dropped { .. })));
}

#[test]
fn test_concurrent_writers_serialize() {
    let store = Arc::new(test_store());
    store.create([page("1")]).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..25 {
                    store.create([shape(&format!("{}-{}", t, i), "1")]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.ids_of_type("shape").len(), 100);
    assert_eq!(store.epoch(), Epoch(101));
}

// --- Computed Values and History ---

#[test]
fn test_computed_page_contents() {
    let store = test_store();
    store.create([page("1"), page("2"), shape("a", "1")]).unwrap();

    let shapes_on_page = store.computed(|store: &Store, page_id: &RecordId| {
        let ids: Vec<RecordId> = store
            .records_of_type("shape")
            .into_iter()
            .filter(|r| r.get_str("parentId") == Some(page_id.as_str()))
            .map(|r| r.id)
            .collect();
        Derivation::new(ids).reading_type("shape")
    });

    let p1 = RecordId::new("page", "1");
    assert_eq!(shapes_on_page.get(&p1), vec![RecordId::new("shape", "a")]);

    store
        .update(&RecordId::new("shape", "a"), |r| r.with("parentId", "page:2"))
        .unwrap();
    assert!(shapes_on_page.get(&p1).is_empty());
}

#[test]
fn test_history_ignores_remote_changes() {
    let store = test_store();
    let history = HistoryManager::attach(&store);

    let mut diff = Diff::new();
    diff.added.insert(RecordId::new("page", "r"), page("r").with("index", "a1"));
    store.apply_diff(&diff, &ApplyOptions::default()).unwrap();
    assert!(!history.can_undo());

    store.create([page("l")]).unwrap();
    assert!(history.undo().unwrap());
    assert!(store.has(&RecordId::new("page", "r")));
    assert!(!store.has(&RecordId::new("page", "l")));
}
