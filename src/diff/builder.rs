//! Incremental diff construction.

use super::Diff;
use crate::types::Record;

/// One mutation observed during a transaction.
#[derive(Clone, Debug, PartialEq)]
pub enum DiffEvent {
    Added(Record),
    Updated { before: Record, after: Record },
    Removed(Record),
}

/// Accumulates add / update / remove events into one minimal net [`Diff`].
///
/// Events are folded in order:
/// - add then update: one `added` entry with the latest value
/// - add then remove: nothing
/// - update then update: first `before`, latest `after` (dropped if equal)
/// - update then remove: `removed` with the pre-transaction value
/// - remove then add of the same kind: `updated` (nothing if equal)
/// - remove then add of a different kind: the id stays in `removed` and is
///   also `added`; consumers must process removals first
#[derive(Clone, Debug, Default)]
pub struct IncrementalDiffBuilder {
    diff: Diff,
}

impl IncrementalDiffBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: DiffEvent) {
        match event {
            DiffEvent::Added(record) => self.added(record),
            DiffEvent::Updated { before, after } => self.updated(before, after),
            DiffEvent::Removed(record) => self.removed(record),
        }
    }

    pub fn added(&mut self, record: Record) {
        let id = record.id.clone();

        if let Some(entry) = self.diff.updated.get_mut(&id) {
            entry.1 = record;
            self.drop_if_unchanged(&id);
            return;
        }

        let replaces_same_kind = !self.diff.added.contains_key(&id)
            && self
                .diff
                .removed
                .get(&id)
                .map_or(false, |prev| prev.type_name == record.type_name);

        if replaces_same_kind {
            if let Some(prev) = self.diff.removed.remove(&id) {
                if prev != record {
                    self.diff.updated.insert(id, (prev, record));
                }
            }
        } else {
            self.diff.added.insert(id, record);
        }
    }

    pub fn updated(&mut self, before: Record, after: Record) {
        let id = after.id.clone();

        if let Some(current) = self.diff.added.get_mut(&id) {
            *current = after;
            return;
        }

        if let Some(entry) = self.diff.updated.get_mut(&id) {
            entry.1 = after;
            self.drop_if_unchanged(&id);
            return;
        }

        if before != after {
            self.diff.updated.insert(id, (before, after));
        }
    }

    pub fn removed(&mut self, record: Record) {
        let id = record.id.clone();

        if self.diff.added.remove(&id).is_some() {
            return;
        }

        if let Some((before, _)) = self.diff.updated.remove(&id) {
            self.diff.removed.insert(id, before);
            return;
        }

        self.diff.removed.entry(id).or_insert(record);
    }

    /// Fold a whole diff in: removals, then updates, then additions.
    pub fn extend_from_diff(&mut self, diff: &Diff) {
        for record in diff.removed.values() {
            self.removed(record.clone());
        }
        for (before, after) in diff.updated.values() {
            self.updated(before.clone(), after.clone());
        }
        for record in diff.added.values() {
            self.added(record.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }

    /// The net diff so far.
    pub fn peek(&self) -> &Diff {
        &self.diff
    }

    /// Take the net diff, leaving the builder empty.
    pub fn take(&mut self) -> Diff {
        std::mem::take(&mut self.diff)
    }

    pub fn build(self) -> Diff {
        self.diff
    }

    fn drop_if_unchanged(&mut self, id: &crate::types::RecordId) {
        if let Some((before, after)) = self.diff.updated.get(id) {
            if before == after {
                self.diff.updated.remove(id);
            }
        }
    }
}

impl FromIterator<DiffEvent> for IncrementalDiffBuilder {
    fn from_iter<I: IntoIterator<Item = DiffEvent>>(iter: I) -> Self {
        let mut builder = Self::new();
        for event in iter {
            builder.push(event);
        }
        builder
    }
}
