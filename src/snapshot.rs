//! Serializable store snapshots.

use crate::codec::{self, Encoding};
use crate::error::Result;
use crate::schema::SchemaVersion;
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Records keyed by id, in id order.
pub type RecordMap = BTreeMap<RecordId, Record>;

/// A full copy of a store's records and the version vector they conform to.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StoreSnapshot {
    pub schema_version: SchemaVersion,
    pub records: RecordMap,
}

impl StoreSnapshot {
    pub fn new(schema_version: SchemaVersion) -> Self {
        Self {
            schema_version,
            records: RecordMap::new(),
        }
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.records.insert(record.id.clone(), record);
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn to_bytes(&self, encoding: Encoding) -> Result<Vec<u8>> {
        codec::encode(self, encoding)
    }

    pub fn from_bytes(bytes: &[u8], encoding: Encoding) -> Result<Self> {
        codec::decode(bytes, encoding)
    }
}
