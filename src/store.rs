//! Main Store struct tying all components together.

use crate::computed::{ComputedCache, Derivation};
use crate::diff::Diff;
use crate::error::{Result, StoreError, ValidationError};
use crate::schema::{compare_schemas, SchemaCompatibility, SchemaVersion, StoreSchema};
use crate::snapshot::StoreSnapshot;
use crate::subscriptions::{
    ChangeFilter, ListenerId, StoreChange, SubscriptionConfig, SubscriptionHandle,
    SubscriptionManager,
};
use crate::transaction::{resolve_references, Transaction};
use crate::types::{ChangeSource, Epoch, Record, RecordId, RecordScope};
use parking_lot::{ReentrantMutex, RwLock};
use std::borrow::Borrow;
use std::cell::Cell;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use tracing::{debug, error, info};

/// What to do with incoming records whose reference fields point at records
/// that do not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum DanglingReferencePolicy {
    /// Keep them.
    #[default]
    Allow,
    /// Skip them (and anything that referenced them), with a warning.
    Drop,
    /// Fail the whole operation.
    Reject,
}

/// How `apply_diff` treats entries that disagree with the current state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Fail with a `ConflictError`; nothing is applied.
    #[default]
    Reject,
    /// Apply the incoming values regardless.
    Overwrite,
}

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Re-validate committed records and check index consistency after
    /// every commit. Defaults to on in debug builds.
    pub debug_checks: bool,

    /// Default handling of dangling references in `apply_diff` and
    /// `load_snapshot`.
    pub dangling_references: DanglingReferencePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            debug_checks: cfg!(debug_assertions),
            dangling_references: DanglingReferencePolicy::Allow,
        }
    }
}

/// Options for [`Store::apply_diff`].
#[derive(Clone, Debug)]
pub struct ApplyOptions {
    /// Source reported to listeners. Default: `Remote`.
    pub source: ChangeSource,

    pub on_conflict: ConflictPolicy,

    /// Schema the diff was written against. When set, the diff is gated
    /// through the comparator and migrated if it is older.
    pub remote_schema: Option<SchemaVersion>,

    /// Overrides `StoreConfig::dangling_references`.
    pub dangling_references: Option<DanglingReferencePolicy>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            source: ChangeSource::Remote,
            on_conflict: ConflictPolicy::Reject,
            remote_schema: None,
            dangling_references: None,
        }
    }
}

impl ApplyOptions {
    pub fn with_source(mut self, source: ChangeSource) -> Self {
        self.source = source;
        self
    }

    pub fn overwrite(mut self) -> Self {
        self.on_conflict = ConflictPolicy::Overwrite;
        self
    }

    pub fn with_remote_schema(mut self, version: SchemaVersion) -> Self {
        self.remote_schema = Some(version);
        self
    }

    pub fn with_dangling_references(mut self, policy: DanglingReferencePolicy) -> Self {
        self.dangling_references = Some(policy);
        self
    }
}

/// Committed contents: the record table, a per-kind index and the epoch.
#[derive(Default)]
struct StoreState {
    records: HashMap<RecordId, Record>,
    by_type: HashMap<String, BTreeSet<RecordId>>,
    epoch: Epoch,
}

impl StoreState {
    fn insert(&mut self, record: Record) {
        self.by_type
            .entry(record.type_name.clone())
            .or_default()
            .insert(record.id.clone());
        self.records.insert(record.id.clone(), record);
    }

    fn remove(&mut self, id: &RecordId) {
        if let Some(record) = self.records.remove(id) {
            if let Some(ids) = self.by_type.get_mut(&record.type_name) {
                ids.remove(id);
                if ids.is_empty() {
                    self.by_type.remove(&record.type_name);
                }
            }
        }
    }

    /// Removals first, so a kind-replacing id ends up with its new value.
    fn apply(&mut self, diff: &Diff) {
        for id in diff.removed.keys() {
            self.remove(id);
        }
        for (_, after) in diff.updated.values() {
            self.insert(after.clone());
        }
        for record in diff.added.values() {
            self.insert(record.clone());
        }
    }
}

/// Clears the open-transaction flag when the scope ends, including on panic.
struct OpenTransaction<'a>(&'a Cell<bool>);

impl<'a> OpenTransaction<'a> {
    fn begin(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for OpenTransaction<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// An in-memory, schema-validated record store.
///
/// Provides a unified interface for:
/// - Creating, updating and deleting records atomically
/// - Replaying diffs from peers
/// - Saving and loading versioned snapshots
/// - Notifying listeners of every committed change
///
/// One writer at a time; readers always see a committed state.
pub struct Store {
    config: StoreConfig,

    schema: StoreSchema,

    /// Committed records.
    state: RwLock<StoreState>,

    /// Serializes writers. The flag is set while a transaction body runs.
    write_lock: ReentrantMutex<Cell<bool>>,

    subscriptions: SubscriptionManager,
}

impl Store {
    /// Create an empty store.
    pub fn new(schema: StoreSchema, config: StoreConfig) -> Self {
        Self {
            config,
            schema,
            state: RwLock::new(StoreState::default()),
            write_lock: ReentrantMutex::new(Cell::new(false)),
            subscriptions: SubscriptionManager::new(),
        }
    }

    /// Create an empty store with the default config.
    pub fn with_schema(schema: StoreSchema) -> Self {
        Self::new(schema, StoreConfig::default())
    }

    /// Create a store and load `snapshot` into it.
    pub fn from_snapshot(
        schema: StoreSchema,
        config: StoreConfig,
        snapshot: &StoreSnapshot,
    ) -> Result<Self> {
        let store = Self::new(schema, config);
        store.load_snapshot(snapshot)?;
        Ok(store)
    }

    pub fn schema(&self) -> &StoreSchema {
        &self.schema
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // --- Reads ---

    /// Number of committed transactions.
    pub fn epoch(&self) -> Epoch {
        self.state.read().epoch
    }

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        self.state.read().records.get(id).cloned()
    }

    pub fn has(&self, id: &RecordId) -> bool {
        self.state.read().records.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().records.is_empty()
    }

    /// Every record, ordered by id.
    pub fn all_records(&self) -> Vec<Record> {
        let state = self.state.read();
        let mut records: Vec<Record> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Records of one kind, ordered by id.
    pub fn records_of_type(&self, type_name: &str) -> Vec<Record> {
        let state = self.state.read();
        state
            .by_type
            .get(type_name)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.records.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ids_of_type(&self, type_name: &str) -> Vec<RecordId> {
        self.state
            .read()
            .by_type
            .get(type_name)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    // --- Mutations ---

    /// Add new records. Missing props are filled from the kind's defaults.
    pub fn create<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.transaction(|tx| tx.create(records))
    }

    /// Create or replace records.
    pub fn put<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        self.transaction(|tx| tx.put(records))
    }

    /// Update one record through `updater`. Returns the stored result.
    pub fn update<F>(&self, id: &RecordId, updater: F) -> Result<Record>
    where
        F: FnOnce(Record) -> Record,
    {
        self.transaction(|tx| tx.update(id, updater))
    }

    /// Delete records. Missing ids are ignored. Returns how many were removed.
    pub fn delete<I>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<RecordId>,
    {
        self.transaction(|tx| Ok(tx.delete(ids)))
    }

    /// Run `f` atomically. Its writes commit as one diff if it returns `Ok`
    /// and are discarded if it returns `Err`.
    pub fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.transaction_with_source(ChangeSource::Local, f)
    }

    /// Like [`Store::transaction`], reporting `source` to listeners.
    pub fn transaction_with_source<T, F>(&self, source: ChangeSource, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let guard = self.write_lock.lock();
        if guard.get() {
            return Err(StoreError::Transaction(
                "store mutated directly inside an open transaction; use the transaction handle"
                    .into(),
            ));
        }

        let (value, diff) = {
            let _open = OpenTransaction::begin(&guard);
            let mut tx = Transaction::new(self);
            match f(&mut tx) {
                Ok(value) => (value, tx.into_diff()),
                Err(e) => {
                    debug!(error = %e, "transaction rolled back");
                    return Err(e);
                }
            }
        };

        if let Some(change) = self.commit(diff, source) {
            self.subscriptions.broadcast(&change);
        }
        Ok(value)
    }

    /// Replay an external diff atomically.
    pub fn apply_diff(&self, diff: &Diff, options: &ApplyOptions) -> Result<()> {
        self.transaction_with_source(options.source, |tx| tx.apply_diff(diff, options))
    }

    fn commit(&self, diff: Diff, source: ChangeSource) -> Option<StoreChange> {
        if diff.is_empty() {
            return None;
        }

        let epoch = {
            let mut state = self.state.write();
            state.apply(&diff);
            state.epoch = state.epoch.next();
            if self.config.debug_checks {
                self.verify_commit(&state, &diff);
            }
            state.epoch
        };

        debug!(
            epoch = epoch.0,
            added = diff.added.len(),
            updated = diff.updated.len(),
            removed = diff.removed.len(),
            ?source,
            "committed transaction"
        );

        Some(StoreChange {
            diff,
            source,
            epoch,
        })
    }

    fn verify_commit(&self, state: &StoreState, diff: &Diff) {
        let written = diff
            .added
            .values()
            .chain(diff.updated.values().map(|(_, after)| after));
        for record in written {
            match self.schema.validate_record(record.clone()) {
                Ok(validated) if validated == *record => {}
                Ok(_) => error!(id = %record.id, "committed record is not in normalized form"),
                Err(e) => error!(id = %record.id, error = %e, "committed record failed validation"),
            }
        }

        let indexed: usize = state.by_type.values().map(BTreeSet::len).sum();
        if indexed != state.records.len() {
            error!(
                indexed,
                records = state.records.len(),
                "type index out of sync with record table"
            );
        }
    }

    // --- Snapshots ---

    /// Serialize every record with the current schema version.
    pub fn get_snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            schema_version: self.schema.current_version(),
            records: state
                .records
                .iter()
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
        }
    }

    /// Serialize only the records whose kind belongs to `scope`.
    pub fn get_snapshot_scoped(&self, scope: RecordScope) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            schema_version: self.schema.current_version(),
            records: state
                .records
                .iter()
                .filter(|(_, record)| {
                    self.schema
                        .record_type(&record.type_name)
                        .map_or(false, |rt| rt.scope() == scope)
                })
                .map(|(id, record)| (id.clone(), record.clone()))
                .collect(),
        }
    }

    /// Replace the store contents with `snapshot`, migrating it first if it
    /// is older than the schema.
    pub fn load_snapshot(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let migrated;
        let (snapshot, source) = match self.check_compatibility(&snapshot.schema_version) {
            SchemaCompatibility::Compatible => (snapshot, ChangeSource::Remote),
            SchemaCompatibility::RemoteNeedsMigration => {
                migrated = self.schema.migrate_snapshot(snapshot)?;
                (&migrated, ChangeSource::Migration)
            }
            compatibility => {
                return Err(StoreError::IncompatibleSchema {
                    compatibility,
                    local: self.schema.current_version(),
                    remote: snapshot.schema_version.clone(),
                })
            }
        };

        let mut records = Vec::with_capacity(snapshot.len());
        for (id, record) in &snapshot.records {
            if *id != record.id {
                return Err(ValidationError::new(
                    "id",
                    format!("snapshot key '{}' does not match record id", id),
                )
                .for_record(&record.id)
                .into());
            }
            records.push(self.schema.validate_record(record.clone())?);
        }

        let records = resolve_references(
            &self.schema,
            records,
            self.config.dangling_references,
            |_| false,
        )?;

        info!(records = records.len(), ?source, "loading snapshot");
        self.transaction_with_source(source, |tx| {
            tx.replace_all(records);
            Ok(())
        })
    }

    /// Compare this store's schema against a remote version vector.
    pub fn check_compatibility(&self, remote: &SchemaVersion) -> SchemaCompatibility {
        compare_schemas(&self.schema.current_version(), remote)
    }

    // --- Listeners ---

    /// Call `callback` synchronously after every matching commit.
    pub fn listen<F>(&self, filter: ChangeFilter, callback: F) -> ListenerId
    where
        F: Fn(&StoreChange) + Send + Sync + 'static,
    {
        self.subscriptions.listen(filter, callback)
    }

    /// Receive matching commits over a bounded channel.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        self.subscriptions.subscribe(config)
    }

    pub fn unlisten(&self, id: ListenerId) -> bool {
        self.subscriptions.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.listener_count()
    }

    /// Define a computed cache over this store.
    pub fn computed<K, V, F>(&self, derive: F) -> ComputedCache<'_, K, V>
    where
        K: Eq + Hash + Clone + Send + 'static,
        V: Clone + Send + 'static,
        F: Fn(&Store, &K) -> Derivation<V> + Send + Sync + 'static,
    {
        ComputedCache::define(self, derive)
    }

    // --- Transaction support ---

    pub(crate) fn committed_ids(&self) -> Vec<RecordId> {
        self.state.read().records.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldRule, ObjectValidator, RecordType};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn test_store() -> Store {
        let shape = RecordType::new(
            "shape",
            ObjectValidator::new()
                .field("x", FieldRule::Number)
                .field("parentId", FieldRule::id("page").optional()),
        )
        .with_default_properties(|| {
            let mut props = serde_json::Map::new();
            props.insert("x".into(), json!(0));
            props
        })
        .with_references(["parentId"]);
        let page = RecordType::new(
            "page",
            ObjectValidator::new().field("name", FieldRule::String),
        );
        let schema = StoreSchema::builder()
            .record_type(shape)
            .record_type(page)
            .build()
            .unwrap();
        Store::with_schema(schema)
    }

    fn shape(suffix: &str, x: i64) -> Record {
        Record::new(RecordId::new("shape", suffix), "shape").with("x", x)
    }

    #[test]
    fn test_create_and_get() {
        let store = test_store();
        let created = store
            .create([Record::new(RecordId::new("shape", "a"), "shape")])
            .unwrap();

        assert_eq!(created[0].get("x"), Some(&json!(0)));
        assert_eq!(store.get(&RecordId::new("shape", "a")), Some(created[0].clone()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.epoch(), Epoch(1));
    }

    #[test]
    fn test_create_duplicate() {
        let store = test_store();
        store.create([shape("a", 1)]).unwrap();
        let err = store.create([shape("a", 2)]).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == RecordId::new("shape", "a")));

        let err = store.create([shape("b", 1), shape("b", 2)]).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(_)));
        assert!(!store.has(&RecordId::new("shape", "b")));
    }

    #[test]
    fn test_update_noop_does_not_commit() {
        let store = test_store();
        store.create([shape("a", 1)]).unwrap();
        let epoch = store.epoch();

        store.update(&RecordId::new("shape", "a"), |r| r).unwrap();
        assert_eq!(store.epoch(), epoch);
    }

    #[test]
    fn test_records_of_type_index() {
        let store = test_store();
        store
            .create([
                shape("b", 1),
                shape("a", 2),
                Record::new(RecordId::new("page", "1"), "page").with("name", "Page"),
            ])
            .unwrap();

        let ids: Vec<_> = store
            .records_of_type("shape")
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![RecordId::new("shape", "a"), RecordId::new("shape", "b")]);

        store.delete([RecordId::new("shape", "a")]).unwrap();
        assert_eq!(store.ids_of_type("shape"), vec![RecordId::new("shape", "b")]);
        assert!(store.ids_of_type("ghost").is_empty());
    }

    #[test]
    fn test_nested_direct_mutation_fails() {
        let store = test_store();
        let result = store.transaction(|tx| {
            tx.create([shape("a", 1)])?;
            store.create([shape("b", 1)])
        });
        assert!(matches!(result, Err(StoreError::Transaction(_))));
        assert!(store.is_empty());

        // The flag is cleared afterwards.
        store.create([shape("c", 1)]).unwrap();
    }

    #[test]
    fn test_listener_may_mutate_store() {
        let store = Arc::new(test_store());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&store);
        store.listen(ChangeFilter::record_types(vec!["shape".into()]), move |change| {
            if let Some(store) = weak.upgrade() {
                if change.diff.added.contains_key(&RecordId::new("shape", "a")) {
                    store.create([shape("b", 2)]).unwrap();
                }
            }
        });
        let log = Arc::clone(&seen);
        store.listen(ChangeFilter::all(), move |change| log.lock().push(change.epoch));

        store.create([shape("a", 1)]).unwrap();

        assert!(store.has(&RecordId::new("shape", "b")));
        assert_eq!(*seen.lock(), vec![Epoch(2), Epoch(1)]);
    }

    #[test]
    fn test_scoped_snapshot() {
        let schema = StoreSchema::builder()
            .record_type(RecordType::unvalidated("shape"))
            .record_type(RecordType::unvalidated("pointer").with_scope(RecordScope::Presence))
            .build()
            .unwrap();
        let store = Store::with_schema(schema);
        store
            .create([
                Record::new(RecordId::new("shape", "a"), "shape"),
                Record::new(RecordId::new("pointer", "me"), "pointer"),
            ])
            .unwrap();

        let document = store.get_snapshot_scoped(RecordScope::Document);
        assert_eq!(document.len(), 1);
        assert!(document.records.contains_key(&RecordId::new("shape", "a")));
        assert_eq!(store.get_snapshot().len(), 2);
    }

    #[test]
    fn test_store_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Store>();
    }
}
