//! Transactions: buffered writes that commit as one diff.

use crate::diff::{Diff, IncrementalDiffBuilder};
use crate::error::{ConflictError, Result, StoreError, ValidationError};
use crate::migrate::migrate_diff;
use crate::schema::{compare_schemas, SchemaCompatibility, StoreSchema};
use crate::store::{ApplyOptions, ConflictPolicy, DanglingReferencePolicy, Store};
use crate::types::{Record, RecordId};
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::warn;

/// Handle passed to [`Store::transaction`].
///
/// Writes are buffered in an overlay and folded into a net diff as they
/// happen. Reads see the overlay first, then committed state.
pub struct Transaction<'s> {
    store: &'s Store,
    /// `None` marks a record deleted in this transaction.
    overlay: HashMap<RecordId, Option<Record>>,
    builder: IncrementalDiffBuilder,
}

impl<'s> Transaction<'s> {
    pub(crate) fn new(store: &'s Store) -> Self {
        Self {
            store,
            overlay: HashMap::new(),
            builder: IncrementalDiffBuilder::new(),
        }
    }

    pub(crate) fn into_diff(self) -> Diff {
        self.builder.build()
    }

    pub fn schema(&self) -> &StoreSchema {
        self.store.schema()
    }

    // --- Reads ---

    pub fn get(&self, id: &RecordId) -> Option<Record> {
        match self.overlay.get(id) {
            Some(entry) => entry.clone(),
            None => self.store.get(id),
        }
    }

    pub fn has(&self, id: &RecordId) -> bool {
        match self.overlay.get(id) {
            Some(entry) => entry.is_some(),
            None => self.store.has(id),
        }
    }

    /// Net diff of the writes so far.
    pub fn pending_diff(&self) -> &Diff {
        self.builder.peek()
    }

    // --- Writes ---

    /// Add new records. Every record is validated before any is written.
    pub fn create<I>(&mut self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut prepared = Vec::new();
        let mut seen = HashSet::new();
        for record in records {
            let record = self.store.schema().prepare_new(record)?;
            if self.has(&record.id) || !seen.insert(record.id.clone()) {
                return Err(StoreError::AlreadyExists(record.id));
            }
            prepared.push(record);
        }

        for record in &prepared {
            self.write(record.clone());
        }
        Ok(prepared)
    }

    /// Create or replace records.
    pub fn put<I>(&mut self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        let prepared = records
            .into_iter()
            .map(|record| self.store.schema().prepare_new(record))
            .collect::<Result<Vec<_>>>()?;

        for record in &prepared {
            self.write(record.clone());
        }
        Ok(prepared)
    }

    pub fn update<F>(&mut self, id: &RecordId, updater: F) -> Result<Record>
    where
        F: FnOnce(Record) -> Record,
    {
        let current = self
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let next = updater(current.clone());

        if next.id != current.id {
            return Err(ValidationError::new("id", "id cannot change")
                .for_record(id)
                .into());
        }
        if next.type_name != current.type_name {
            return Err(ValidationError::new("typeName", "typeName cannot change")
                .for_record(id)
                .into());
        }
        if next == current {
            return Ok(current);
        }

        let next = self.store.schema().validate_record(next)?;
        self.write(next.clone());
        Ok(next)
    }

    /// Delete records; missing ids are ignored. Returns how many were removed.
    pub fn delete<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator,
        I::Item: Borrow<RecordId>,
    {
        let mut removed = 0;
        for id in ids {
            if self.erase(id.borrow()) {
                removed += 1;
            }
        }
        removed
    }

    /// Run `f` as a savepoint: if it fails, only its own writes are undone.
    pub fn transaction<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'s>) -> Result<T>,
    {
        let overlay = self.overlay.clone();
        let builder = self.builder.clone();
        match f(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.overlay = overlay;
                self.builder = builder;
                Err(e)
            }
        }
    }

    /// Replay an external diff. On error nothing from the diff is written.
    pub fn apply_diff(&mut self, diff: &Diff, options: &ApplyOptions) -> Result<()> {
        let store = self.store;
        let schema = store.schema();

        let migrated;
        let diff = match &options.remote_schema {
            None => diff,
            Some(remote) => {
                let local = schema.current_version();
                match compare_schemas(&local, remote) {
                    SchemaCompatibility::Compatible => diff,
                    SchemaCompatibility::RemoteNeedsMigration => {
                        migrated = migrate_diff(schema, diff, remote)?;
                        &migrated
                    }
                    compatibility => {
                        return Err(StoreError::IncompatibleSchema {
                            compatibility,
                            local,
                            remote: remote.clone(),
                        })
                    }
                }
            }
        };

        check_keys(diff)?;
        if options.on_conflict == ConflictPolicy::Reject {
            self.check_conflicts(diff)?;
        }

        let mut incoming = Vec::with_capacity(diff.updated.len() + diff.added.len());
        for (_, after) in diff.updated.values() {
            incoming.push(schema.validate_record(after.clone())?);
        }
        for record in diff.added.values() {
            incoming.push(schema.validate_record(record.clone())?);
        }

        let removed: BTreeSet<&RecordId> = diff.removed.keys().collect();
        let policy = options
            .dangling_references
            .unwrap_or(store.config().dangling_references);
        let incoming = resolve_references(schema, incoming, policy, |id| {
            !removed.contains(id) && self.has(id)
        })?;

        for id in diff.removed.keys() {
            self.erase(id);
        }
        for record in incoming {
            self.write(record);
        }
        Ok(())
    }

    fn check_conflicts(&self, diff: &Diff) -> Result<()> {
        for (id, expected) in &diff.removed {
            match self.get(id) {
                Some(actual) if actual != *expected => {
                    return Err(conflict(id, Some(expected), Some(actual)))
                }
                _ => {}
            }
        }

        for (id, (before, after)) in &diff.updated {
            match self.get(id) {
                Some(actual) if actual == *before || actual == *after => {}
                actual => return Err(conflict(id, Some(before), actual)),
            }
        }

        for (id, record) in &diff.added {
            if diff.removed.contains_key(id) {
                continue;
            }
            match self.get(id) {
                Some(actual) if actual != *record => return Err(conflict(id, None, Some(actual))),
                _ => {}
            }
        }
        Ok(())
    }

    /// Replace everything with `records`. Used by snapshot loading.
    pub(crate) fn replace_all(&mut self, records: Vec<Record>) {
        let keep: HashSet<&RecordId> = records.iter().map(|r| &r.id).collect();

        let mut current: Vec<RecordId> = self.store.committed_ids();
        current.extend(
            self.overlay
                .iter()
                .filter(|(_, entry)| entry.is_some())
                .map(|(id, _)| id.clone()),
        );
        let stale: Vec<RecordId> = current
            .into_iter()
            .filter(|id| !keep.contains(id))
            .collect();

        for id in &stale {
            self.erase(id);
        }
        for record in records {
            self.write(record);
        }
    }

    // --- Internal ---

    fn write(&mut self, record: Record) {
        match self.get(&record.id) {
            None => self.builder.added(record.clone()),
            Some(before) if before == record => return,
            Some(before) => self.builder.updated(before, record.clone()),
        }
        self.overlay.insert(record.id.clone(), Some(record));
    }

    fn erase(&mut self, id: &RecordId) -> bool {
        match self.get(id) {
            Some(before) => {
                self.builder.removed(before);
                self.overlay.insert(id.clone(), None);
                true
            }
            None => false,
        }
    }
}

fn conflict(id: &RecordId, expected: Option<&Record>, actual: Option<Record>) -> StoreError {
    ConflictError {
        id: id.clone(),
        expected: expected.cloned(),
        actual,
    }
    .into()
}

/// Every mapping key must equal the id of the record(s) under it.
fn check_keys(diff: &Diff) -> Result<()> {
    let entries = diff
        .added
        .iter()
        .chain(diff.removed.iter())
        .chain(
            diff.updated
                .iter()
                .flat_map(|(id, (before, after))| [(id, before), (id, after)]),
        );
    for (id, record) in entries {
        if *id != record.id {
            return Err(ValidationError::new(
                "id",
                format!("diff key '{}' does not match record id", id),
            )
            .for_record(&record.id)
            .into());
        }
    }
    Ok(())
}

/// Apply the dangling-reference policy to `incoming`.
///
/// A reference resolves if its target is among the kept incoming records or
/// `exists_outside` says it is present. Under `Drop` the check repeats until
/// nothing more is dropped.
pub(crate) fn resolve_references<F>(
    schema: &StoreSchema,
    mut incoming: Vec<Record>,
    policy: DanglingReferencePolicy,
    exists_outside: F,
) -> Result<Vec<Record>>
where
    F: Fn(&RecordId) -> bool,
{
    if policy == DanglingReferencePolicy::Allow {
        return Ok(incoming);
    }

    loop {
        let present: HashSet<RecordId> = incoming.iter().map(|r| r.id.clone()).collect();
        let mut kept = Vec::with_capacity(incoming.len());
        let mut dropped = 0usize;

        for record in incoming {
            let dangling = schema.record_type(&record.type_name).and_then(|rt| {
                rt.references_of(&record)
                    .into_iter()
                    .find(|(_, target)| !present.contains(target) && !exists_outside(target))
                    .map(|(field, target)| (field.to_string(), target))
            });

            match dangling {
                None => kept.push(record),
                Some((field, target)) => {
                    if policy == DanglingReferencePolicy::Reject {
                        return Err(StoreError::DanglingReference {
                            record: record.id,
                            field,
                            target,
                        });
                    }
                    warn!(
                        record = %record.id,
                        field = %field,
                        target = %target,
                        "dropping record with dangling reference"
                    );
                    dropped += 1;
                }
            }
        }

        incoming = kept;
        if dropped == 0 {
            return Ok(incoming);
        }
    }
}
