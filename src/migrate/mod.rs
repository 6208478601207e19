//! Migration engine.
//!
//! Each record kind owns a [`Migrations`] chain of `up`/`down` steps between
//! adjacent versions; the schema owns one more chain for store-level changes
//! that span kinds. Migrations are pure and applied strictly in version
//! order: a record never skips a step.

mod engine;
mod migrations;

pub use engine::{migrate_diff, migrate_record, migrate_store, STORE_TARGET};
pub use migrations::{Migration, MigrationFn, Migrations};
