//! Record diffs and the incremental builder that coalesces them.
//!
//! A [`Diff`] is the net effect of one transaction: records added, records
//! updated (as `[before, after]` pairs) and records removed (with their last
//! value). The same [`IncrementalDiffBuilder`] rules are used by the store
//! and by [`squash_diffs`], so diffs coalesced outside the store match the
//! ones the store itself emits.

mod builder;

pub use builder::{DiffEvent, IncrementalDiffBuilder};

use crate::codec::{self, Encoding};
use crate::error::Result;
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Added / updated / removed records of one atomic change.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default)]
    pub added: BTreeMap<RecordId, Record>,
    #[serde(default)]
    pub updated: BTreeMap<RecordId, (Record, Record)>,
    #[serde(default)]
    pub removed: BTreeMap<RecordId, Record>,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Number of entries across all three mappings.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.removed.len()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.added.contains_key(id) || self.updated.contains_key(id) || self.removed.contains_key(id)
    }

    /// Every id mentioned by the diff.
    pub fn touched_ids(&self) -> impl Iterator<Item = &RecordId> {
        self.added
            .keys()
            .chain(self.updated.keys())
            .chain(self.removed.keys())
    }

    /// Every kind mentioned by the diff.
    pub fn touched_types(&self) -> BTreeSet<&str> {
        self.added
            .values()
            .chain(self.updated.values().flat_map(|(before, after)| [before, after]))
            .chain(self.removed.values())
            .map(|r| r.type_name.as_str())
            .collect()
    }

    /// The diff that undoes this one.
    pub fn reverse(&self) -> Diff {
        Diff {
            added: self.removed.clone(),
            updated: self
                .updated
                .iter()
                .map(|(id, (before, after))| (id.clone(), (after.clone(), before.clone())))
                .collect(),
            removed: self.added.clone(),
        }
    }

    /// Keep only entries whose records are of one of `types`.
    pub fn filter_types(&self, types: &[String]) -> Diff {
        let keep = |r: &Record| types.iter().any(|t| *t == r.type_name);
        Diff {
            added: self
                .added
                .iter()
                .filter(|(_, r)| keep(r))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
            updated: self
                .updated
                .iter()
                .filter(|(_, (_, after))| keep(after))
                .map(|(id, pair)| (id.clone(), pair.clone()))
                .collect(),
            removed: self
                .removed
                .iter()
                .filter(|(_, r)| keep(r))
                .map(|(id, r)| (id.clone(), r.clone()))
                .collect(),
        }
    }

    pub fn to_bytes(&self, encoding: Encoding) -> Result<Vec<u8>> {
        codec::encode(self, encoding)
    }

    pub fn from_bytes(bytes: &[u8], encoding: Encoding) -> Result<Self> {
        codec::decode(bytes, encoding)
    }
}

/// Coalesce a sequence of diffs (oldest first) into one net diff.
pub fn squash_diffs<'a, I>(diffs: I) -> Diff
where
    I: IntoIterator<Item = &'a Diff>,
{
    let mut builder = IncrementalDiffBuilder::new();
    for diff in diffs {
        builder.extend_from_diff(diff);
    }
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(id: &str, x: i64) -> Record {
        Record::new(RecordId::from(id), "shape").with("x", x)
    }

    #[test]
    fn test_reverse_swaps_directions() {
        let mut diff = Diff::new();
        diff.added.insert("shape:a".into(), rec("shape:a", 1));
        diff.updated
            .insert("shape:b".into(), (rec("shape:b", 1), rec("shape:b", 2)));
        diff.removed.insert("shape:c".into(), rec("shape:c", 3));

        let reversed = diff.reverse();
        assert_eq!(reversed.removed.get("shape:a"), Some(&rec("shape:a", 1)));
        assert_eq!(reversed.added.get("shape:c"), Some(&rec("shape:c", 3)));
        assert_eq!(
            reversed.updated.get("shape:b"),
            Some(&(rec("shape:b", 2), rec("shape:b", 1)))
        );
        assert_eq!(reversed.reverse(), diff);
    }

    #[test]
    fn test_squash_collapses_create_then_delete() {
        let mut first = Diff::new();
        first.added.insert("shape:a".into(), rec("shape:a", 1));
        let mut second = Diff::new();
        second
            .updated
            .insert("shape:a".into(), (rec("shape:a", 1), rec("shape:a", 2)));
        let mut third = Diff::new();
        third.removed.insert("shape:a".into(), rec("shape:a", 2));

        assert_eq!(
            squash_diffs([&first, &second]).added.get("shape:a"),
            Some(&rec("shape:a", 2))
        );
        assert!(squash_diffs([&first, &second, &third]).is_empty());
    }

    #[test]
    fn test_wire_format() {
        let mut diff = Diff::new();
        diff.updated
            .insert("shape:b".into(), (rec("shape:b", 1), rec("shape:b", 2)));
        let value = serde_json::to_value(&diff).unwrap();
        assert_eq!(
            value,
            json!({
                "added": {},
                "updated": {"shape:b": [
                    {"id": "shape:b", "typeName": "shape", "x": 1},
                    {"id": "shape:b", "typeName": "shape", "x": 2}
                ]},
                "removed": {}
            })
        );
        let parsed: Diff = serde_json::from_value(json!({"updated": value["updated"].clone()})).unwrap();
        assert_eq!(parsed, diff);
    }

    #[test]
    fn test_touched_and_filter() {
        let mut diff = Diff::new();
        diff.added.insert("shape:a".into(), rec("shape:a", 1));
        diff.removed.insert(
            "page:1".into(),
            Record::new(RecordId::from("page:1"), "page"),
        );

        assert_eq!(diff.touched_ids().count(), 2);
        assert_eq!(diff.touched_types().into_iter().collect::<Vec<_>>(), vec!["page", "shape"]);

        let shapes = diff.filter_types(&["shape".to_string()]);
        assert_eq!(shapes.len(), 1);
        assert!(shapes.contains(&RecordId::from("shape:a")));
    }
}
