//! Schema registry: record kinds, validators, version vectors.
//!
//! Every record kind is described by a [`RecordType`] registered in a
//! [`StoreSchema`]. Kinds are looked up by `typeName`, so validation and
//! migration dispatch is a single map lookup.

mod compare;
mod record_type;
mod registry;
mod validate;

pub use compare::{compare_schemas, SchemaCompatibility};
pub use record_type::{DefaultProps, RecordType};
pub use registry::{SchemaVersion, StoreSchema, StoreSchemaBuilder};
pub use validate::{AcceptAll, FieldRule, ObjectValidator, Validator};
