//! Record kind descriptors.

use super::validate::{AcceptAll, Validator};
use crate::error::ValidationError;
use crate::migrate::Migrations;
use crate::types::{Record, RecordId, RecordScope, RESERVED_KEYS};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Constructor for a kind's default props.
pub type DefaultProps = Arc<dyn Fn() -> Map<String, Value> + Send + Sync>;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Everything the store knows about one kind of record.
#[derive(Clone)]
pub struct RecordType {
    type_name: String,
    scope: RecordScope,
    validator: Arc<dyn Validator>,
    migrations: Migrations<Record>,
    defaults: Option<DefaultProps>,
    references: Vec<String>,
}

impl fmt::Debug for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordType")
            .field("type_name", &self.type_name)
            .field("scope", &self.scope)
            .field("migrations", &self.migrations)
            .field("references", &self.references)
            .finish()
    }
}

impl RecordType {
    pub fn new(type_name: impl Into<String>, validator: impl Validator + 'static) -> Self {
        Self {
            type_name: type_name.into(),
            scope: RecordScope::default(),
            validator: Arc::new(validator),
            migrations: Migrations::new(),
            defaults: None,
            references: Vec::new(),
        }
    }

    /// A kind whose props are not checked.
    pub fn unvalidated(type_name: impl Into<String>) -> Self {
        Self::new(type_name, AcceptAll)
    }

    pub fn with_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_migrations(mut self, migrations: Migrations<Record>) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn with_default_properties<F>(mut self, defaults: F) -> Self
    where
        F: Fn() -> Map<String, Value> + Send + Sync + 'static,
    {
        self.defaults = Some(Arc::new(defaults));
        self
    }

    /// Props holding ids (or arrays of ids) of other records.
    pub fn with_references<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.references = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn scope(&self) -> RecordScope {
        self.scope
    }

    pub fn current_version(&self) -> u32 {
        self.migrations.current_version()
    }

    pub fn migrations(&self) -> &Migrations<Record> {
        &self.migrations
    }

    pub fn references(&self) -> &[String] {
        &self.references
    }

    /// Generate a fresh id for this kind.
    pub fn create_id(&self) -> RecordId {
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(nanos.to_le_bytes());
        hasher.update(counter.to_le_bytes());
        hasher.update(std::process::id().to_le_bytes());
        let digest = hasher.finalize();

        RecordId::new(&self.type_name, &hex::encode(&digest[..8]))
    }

    pub fn create_custom_id(&self, suffix: &str) -> RecordId {
        RecordId::new(&self.type_name, suffix)
    }

    pub fn is_id(&self, id: &RecordId) -> bool {
        id.belongs_to(&self.type_name)
    }

    /// Default props for a new record.
    pub fn default_props(&self) -> Map<String, Value> {
        self.defaults.as_ref().map(|f| f()).unwrap_or_default()
    }

    /// Build a record from defaults overlaid with `props`.
    pub fn create(&self, id: RecordId, props: Map<String, Value>) -> Record {
        let mut record = Record::new(id, self.type_name.clone());
        record.props = self.default_props();
        record.props.extend(props);
        record
    }

    /// Fill in any props the record is missing from the defaults.
    pub fn apply_defaults(&self, mut record: Record) -> Record {
        for (key, value) in self.default_props() {
            record.props.entry(key).or_insert(value);
        }
        record
    }

    /// Validate identity and props.
    pub fn validate(&self, record: Record) -> Result<Record, ValidationError> {
        let id = record.id.clone();
        if record.type_name != self.type_name {
            return Err(ValidationError::new(
                "typeName",
                format!("expected '{}', got '{}'", self.type_name, record.type_name),
            )
            .for_record(&id));
        }
        if !self.is_id(&id) {
            return Err(ValidationError::new(
                "id",
                format!("id must start with '{}:'", self.type_name),
            )
            .for_record(&id));
        }

        let record = self
            .validator
            .validate(record)
            .map_err(|e| e.for_record(&id))?;

        if record.id != id || record.type_name != self.type_name {
            return Err(ValidationError::new("id", "validator changed record identity").for_record(&id));
        }
        if let Some(key) = RESERVED_KEYS.iter().find(|key| record.props.contains_key(**key)) {
            return Err(
                ValidationError::new(*key, "reserved for the record's identity").for_record(&id)
            );
        }
        Ok(record)
    }

    /// Ids referenced by this record, paired with the prop holding them.
    pub fn references_of<'r>(&'r self, record: &'r Record) -> Vec<(&'r str, RecordId)> {
        let mut out = Vec::new();
        for field in &self.references {
            match record.get(field) {
                Some(Value::String(s)) => out.push((field.as_str(), RecordId::from(s.as_str()))),
                Some(Value::Array(items)) => {
                    for item in items.iter().filter_map(Value::as_str) {
                        out.push((field.as_str(), RecordId::from(item)));
                    }
                }
                _ => {}
            }
        }
        out
    }
}
