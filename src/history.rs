//! Undo/redo over local changes.

use crate::diff::{squash_diffs, Diff};
use crate::error::Result;
use crate::store::{ApplyOptions, Store};
use crate::subscriptions::{ChangeFilter, ListenerId};
use crate::types::ChangeSource;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Debug)]
enum HistoryEntry {
    Change(Diff),
    /// Stop point for undo.
    Mark(String),
}

/// Entries undone together, in their original order.
#[derive(Clone, Debug)]
struct UndoneBatch {
    entries: Vec<HistoryEntry>,
    diff: Diff,
}

#[derive(Default)]
struct Stacks {
    undos: Vec<HistoryEntry>,
    redos: Vec<UndoneBatch>,
}

/// Records local diffs and replays them backwards or forwards.
///
/// Replays are applied with source `History`, so they are not recorded
/// again. A new local change discards everything that could be redone.
pub struct HistoryManager<'s> {
    store: &'s Store,
    stacks: Arc<Mutex<Stacks>>,
    listener: ListenerId,
}

impl<'s> HistoryManager<'s> {
    pub fn attach(store: &'s Store) -> Self {
        let stacks = Arc::new(Mutex::new(Stacks::default()));

        let weak = Arc::downgrade(&stacks);
        let listener = store.listen(ChangeFilter::local(), move |change| {
            if let Some(stacks) = weak.upgrade() {
                let mut stacks = stacks.lock();
                stacks.undos.push(HistoryEntry::Change(change.diff.clone()));
                stacks.redos.clear();
            }
        });

        Self {
            store,
            stacks,
            listener,
        }
    }

    /// Push a named stop point.
    pub fn mark(&self, name: impl Into<String>) {
        self.stacks
            .lock()
            .undos
            .push(HistoryEntry::Mark(name.into()));
    }

    pub fn can_undo(&self) -> bool {
        self.stacks
            .lock()
            .undos
            .iter()
            .any(|entry| matches!(entry, HistoryEntry::Change(_)))
    }

    pub fn can_redo(&self) -> bool {
        !self.stacks.lock().redos.is_empty()
    }

    /// Revert every change since the last mark. Returns false if there was
    /// nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        let entries = {
            let mut stacks = self.stacks.lock();
            let mut popped = Vec::new();
            let mut has_change = false;
            while let Some(entry) = stacks.undos.pop() {
                let is_mark = matches!(entry, HistoryEntry::Mark(_));
                popped.push(entry);
                if is_mark && has_change {
                    break;
                }
                has_change |= !is_mark;
            }
            popped.reverse();
            if !has_change {
                stacks.undos.extend(popped);
                return Ok(false);
            }
            popped
        };

        let diff = squash_entries(&entries);
        if let Err(e) = self.replay(&diff.reverse()) {
            self.stacks.lock().undos.extend(entries);
            return Err(e);
        }

        debug!(records = diff.len(), "undo");
        self.stacks.lock().redos.push(UndoneBatch { entries, diff });
        Ok(true)
    }

    /// Re-apply the last undone batch. Returns false if there was none.
    pub fn redo(&self) -> Result<bool> {
        let batch = match self.stacks.lock().redos.pop() {
            Some(batch) => batch,
            None => return Ok(false),
        };

        if let Err(e) = self.replay(&batch.diff) {
            self.stacks.lock().redos.push(batch);
            return Err(e);
        }

        debug!(records = batch.diff.len(), "redo");
        self.stacks.lock().undos.extend(batch.entries);
        Ok(true)
    }

    pub fn clear(&self) {
        let mut stacks = self.stacks.lock();
        stacks.undos.clear();
        stacks.redos.clear();
    }

    fn replay(&self, diff: &Diff) -> Result<()> {
        self.store.apply_diff(
            diff,
            &ApplyOptions::default().with_source(ChangeSource::History),
        )
    }
}

impl Drop for HistoryManager<'_> {
    fn drop(&mut self) {
        self.store.unlisten(self.listener);
    }
}

fn squash_entries(entries: &[HistoryEntry]) -> Diff {
    squash_diffs(entries.iter().filter_map(|entry| match entry {
        HistoryEntry::Change(diff) => Some(diff),
        HistoryEntry::Mark(_) => None,
    }))
}
