//! The store schema: registered record kinds plus store-level migrations.

use super::record_type::RecordType;
use crate::error::{MigrationFailure, Result, StoreError};
use crate::migrate::{self, Migrations};
use crate::snapshot::{RecordMap, StoreSnapshot};
use crate::types::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Schema version vector: one version per record kind plus a store version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SchemaVersion {
    pub store_version: u32,
    pub record_versions: BTreeMap<String, u32>,
}

impl SchemaVersion {
    pub fn new(store_version: u32) -> Self {
        Self {
            store_version,
            record_versions: BTreeMap::new(),
        }
    }

    pub fn with_record(mut self, type_name: impl Into<String>, version: u32) -> Self {
        self.record_versions.insert(type_name.into(), version);
        self
    }

    pub fn record_version(&self, type_name: &str) -> Option<u32> {
        self.record_versions.get(type_name).copied()
    }
}

/// Registry of record kinds, looked up by `typeName`.
#[derive(Clone, Debug, Default)]
pub struct StoreSchema {
    types: HashMap<String, RecordType>,
    store_migrations: Migrations<RecordMap>,
}

/// Builder for [`StoreSchema`].
#[derive(Default)]
pub struct StoreSchemaBuilder {
    types: Vec<RecordType>,
    store_migrations: Migrations<RecordMap>,
}

impl StoreSchemaBuilder {
    pub fn record_type(mut self, record_type: RecordType) -> Self {
        self.types.push(record_type);
        self
    }

    pub fn store_migrations(mut self, migrations: Migrations<RecordMap>) -> Self {
        self.store_migrations = migrations;
        self
    }

    pub fn build(self) -> Result<StoreSchema> {
        let mut types = HashMap::with_capacity(self.types.len());
        for record_type in self.types {
            let name = record_type.type_name().to_string();
            if types.insert(name.clone(), record_type).is_some() {
                return Err(StoreError::DuplicateType(name));
            }
        }
        Ok(StoreSchema {
            types,
            store_migrations: self.store_migrations,
        })
    }
}

impl StoreSchema {
    pub fn builder() -> StoreSchemaBuilder {
        StoreSchemaBuilder::default()
    }

    pub fn record_type(&self, type_name: &str) -> Option<&RecordType> {
        self.types.get(type_name)
    }

    pub fn require_type(&self, type_name: &str) -> Result<&RecordType> {
        self.types
            .get(type_name)
            .ok_or_else(|| StoreError::UnknownType(type_name.to_string()))
    }

    pub fn record_types(&self) -> impl Iterator<Item = &RecordType> {
        self.types.values()
    }

    pub fn store_migrations(&self) -> &Migrations<RecordMap> {
        &self.store_migrations
    }

    /// The version vector records are validated against.
    pub fn current_version(&self) -> SchemaVersion {
        SchemaVersion {
            store_version: self.store_migrations.current_version(),
            record_versions: self
                .types
                .iter()
                .map(|(name, rt)| (name.clone(), rt.current_version()))
                .collect(),
        }
    }

    /// Validate a record against its kind.
    pub fn validate_record(&self, record: Record) -> Result<Record> {
        let record_type = self.require_type(&record.type_name)?;
        Ok(record_type.validate(record)?)
    }

    /// Fill in defaults, then validate.
    pub fn prepare_new(&self, record: Record) -> Result<Record> {
        let record_type = self.require_type(&record.type_name)?;
        Ok(record_type.validate(record_type.apply_defaults(record))?)
    }

    pub fn migrate_record(
        &self,
        record: Record,
        from: u32,
        to: u32,
    ) -> std::result::Result<Record, MigrationFailure> {
        migrate::migrate_record(self, record, from, to)
    }

    /// Migrate a snapshot to this schema's current version.
    pub fn migrate_snapshot(
        &self,
        snapshot: &StoreSnapshot,
    ) -> std::result::Result<StoreSnapshot, MigrationFailure> {
        migrate::migrate_store(self, snapshot, &self.current_version())
    }
}
