//! # Record Store
//!
//! A typed, schema-versioned, in-memory record store with transactional
//! diffs, migrations and memoized derived values.
//!
//! ## Core Concepts
//!
//! - **Records**: Flat JSON objects `{id, typeName, ...props}`, validated by
//!   their kind's [`RecordType`]
//! - **Diffs**: The net `added / updated / removed` effect of a transaction
//! - **Migrations**: Versioned `up`/`down` steps per kind and for the store
//! - **Computed caches**: Values derived from records, invalidated by diffs
//!
//! ## Example
//!
//! ```ignore
//! use record_store::{ChangeFilter, Record, RecordId, RecordType, Store, StoreSchema};
//!
//! let schema = StoreSchema::builder()
//!     .record_type(RecordType::unvalidated("shape"))
//!     .build()?;
//! let store = Store::with_schema(schema);
//!
//! store.listen(ChangeFilter::all(), |change| {
//!     println!("{} records changed", change.diff.len());
//! });
//!
//! let id = RecordId::new("shape", "a");
//! store.create([Record::new(id.clone(), "shape").with("x", 10)])?;
//! store.update(&id, |r| r.with("x", 20))?;
//!
//! let snapshot = store.get_snapshot();
//! ```

pub mod codec;
pub mod computed;
pub mod diff;
pub mod error;
pub mod history;
pub mod migrate;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod subscriptions;
pub mod transaction;
pub mod types;

// Re-exports
pub use codec::Encoding;
pub use computed::{CacheStats, ComputedCache, ComputedCacheConfig, Dependency, Derivation};
pub use diff::{squash_diffs, Diff, DiffEvent, IncrementalDiffBuilder};
pub use error::{
    ConflictError, MigrationFailure, MigrationFailureReason, Result, StoreError, ValidationError,
};
pub use history::HistoryManager;
pub use migrate::{migrate_diff, migrate_record, migrate_store, Migration, Migrations};
pub use schema::{
    compare_schemas, AcceptAll, FieldRule, ObjectValidator, RecordType, SchemaCompatibility,
    SchemaVersion, StoreSchema, Validator,
};
pub use snapshot::{RecordMap, StoreSnapshot};
pub use store::{ApplyOptions, ConflictPolicy, DanglingReferencePolicy, Store, StoreConfig};
pub use subscriptions::{
    ChangeFilter, DropReason, ListenerId, StoreChange, StoreEvent, SubscriptionConfig,
    SubscriptionHandle,
};
pub use transaction::Transaction;
pub use types::*;
