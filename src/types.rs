//! Core types for the record store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::fmt;

/// Identity of a record, formatted as `"<typeName>:<suffix>"`.
///
/// Ids are scoped to a record kind: the part before the first `:` names the
/// kind the record belongs to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Build an id for `type_name` with the given suffix.
    pub fn new(type_name: &str, suffix: &str) -> Self {
        RecordId(format!("{}:{}", type_name, suffix))
    }

    /// Wrap an already formatted id.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        RecordId(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The kind prefix, if the id has one.
    pub fn type_prefix(&self) -> Option<&str> {
        self.0.split_once(':').map(|(prefix, _)| prefix)
    }

    /// Everything after the kind prefix, or the whole id if it has none.
    pub fn suffix(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, suffix)| suffix)
    }

    /// Whether this id is scoped to `type_name`.
    pub fn belongs_to(&self, type_name: &str) -> bool {
        self.type_prefix() == Some(type_name)
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for RecordId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        RecordId(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        RecordId(s)
    }
}

/// Counter of committed transactions (per store).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Epoch(pub u64);

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({})", self.0)
    }
}

impl Epoch {
    pub fn next(self) -> Self {
        Epoch(self.0 + 1)
    }
}

/// Keys taken by a record's identity in its serialized form.
pub const RESERVED_KEYS: [&str; 2] = ["id", "typeName"];

/// A single record in the store.
///
/// Serializes as one flat object: `{"id": .., "typeName": .., ...props}`,
/// so props may not use the keys in [`RESERVED_KEYS`].
/// `id` and `type_name` are fixed at creation; the store rejects updates that
/// change them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,

    #[serde(rename = "typeName")]
    pub type_name: String,

    /// Kind-specific fields.
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

impl Record {
    /// Create a record with no props.
    pub fn new(id: RecordId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            props: Map::new(),
        }
    }

    /// Builder-style prop setter.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.props.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.props.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.props.remove(key)
    }

    /// Read a prop as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.props.get(key).and_then(Value::as_str)
    }

    /// Read a prop as a float, if it is a number.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.props.get(key).and_then(Value::as_f64)
    }
}

/// Which part of the application a kind of record belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordScope {
    /// Persisted document content (shapes, pages, bindings).
    #[default]
    Document,
    /// Per-session state that is not shared.
    Session,
    /// Ephemeral state shared with peers (cursors, selections).
    Presence,
}

/// Where a committed change came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSource {
    /// Mutation issued through the local API.
    Local,
    /// Diff or snapshot received from a peer or loaded from persistence.
    Remote,
    /// Contents rewritten by the migration engine.
    Migration,
    /// Undo/redo replay.
    History,
}
