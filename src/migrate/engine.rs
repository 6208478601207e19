//! Record, store and diff migration against a [`StoreSchema`].

use crate::diff::Diff;
use crate::error::{MigrationFailure, MigrationFailureReason};
use crate::schema::{SchemaVersion, StoreSchema};
use crate::snapshot::{RecordMap, StoreSnapshot};
use crate::types::Record;
use tracing::debug;

/// Target name used in failures of store-level migrations.
pub const STORE_TARGET: &str = "store";

/// Migrate one record of a registered kind from version `from` to `to`.
pub fn migrate_record(
    schema: &StoreSchema,
    record: Record,
    from: u32,
    to: u32,
) -> Result<Record, MigrationFailure> {
    let id = record.id.clone();
    let type_name = record.type_name.clone();

    let record_type = schema.record_type(&type_name).ok_or_else(|| {
        MigrationFailure::new(&type_name, MigrationFailureReason::UnknownKind(type_name.clone()))
            .for_record(&id)
    })?;

    let migrated = record_type
        .migrations()
        .migrate(record, from, to)
        .map_err(|reason| MigrationFailure::new(&type_name, reason).for_record(&id))?;

    if migrated.id != id || migrated.type_name != type_name {
        return Err(MigrationFailure::new(
            &type_name,
            MigrationFailureReason::MigrationError {
                version: to,
                message: "migration changed record identity".into(),
            },
        )
        .for_record(&id));
    }

    Ok(migrated)
}

/// Migrate every record of `snapshot` to `target`.
///
/// Upgrades run the store-level steps first, so kinds they rename or split
/// are registered by the time per-kind steps run. Downgrades run per-kind
/// steps first and the store-level steps last. Kinds the target does not
/// know are left for the store-level steps. The input snapshot is never
/// modified; any failure fails the whole call.
pub fn migrate_store(
    schema: &StoreSchema,
    snapshot: &StoreSnapshot,
    target: &SchemaVersion,
) -> Result<StoreSnapshot, MigrationFailure> {
    let source = &snapshot.schema_version;
    let downgrade = target.store_version < source.store_version;

    let mut records = snapshot.records.clone();
    if !downgrade {
        records = run_store_migrations(schema, records, source.store_version, target.store_version)?;
    }

    let mut migrated = RecordMap::new();
    for (id, record) in records {
        let kind = record.type_name.clone();
        let from = source.record_version(&kind).unwrap_or(0);
        let to = match target.record_version(&kind) {
            Some(to) => to,
            None if downgrade => {
                migrated.insert(id, record);
                continue;
            }
            None => {
                return Err(MigrationFailure::new(
                    &kind,
                    MigrationFailureReason::UnknownKind(kind.clone()),
                )
                .for_record(&id))
            }
        };
        migrated.insert(id, migrate_record(schema, record, from, to)?);
    }

    if downgrade {
        migrated =
            run_store_migrations(schema, migrated, source.store_version, target.store_version)?;
    }

    debug!(
        records = migrated.len(),
        from_store_version = source.store_version,
        to_store_version = target.store_version,
        "migrated store snapshot"
    );

    Ok(StoreSnapshot {
        schema_version: target.clone(),
        records: migrated,
    })
}

fn run_store_migrations(
    schema: &StoreSchema,
    records: RecordMap,
    from: u32,
    to: u32,
) -> Result<RecordMap, MigrationFailure> {
    schema
        .store_migrations()
        .migrate(records, from, to)
        .map_err(|reason| MigrationFailure::new(STORE_TARGET, reason))
}

/// Migrate a peer's diff, written against `from`, to the schema's current
/// version. Store-level migrations cannot be applied to a diff, so the store
/// versions must match.
pub fn migrate_diff(
    schema: &StoreSchema,
    diff: &Diff,
    from: &SchemaVersion,
) -> Result<Diff, MigrationFailure> {
    let target = schema.current_version();
    if from.store_version != target.store_version {
        return Err(MigrationFailure::new(
            STORE_TARGET,
            MigrationFailureReason::NoPathFound {
                from: from.store_version,
                to: target.store_version,
                missing: from.store_version.min(target.store_version) + 1,
            },
        ));
    }

    let migrate = |record: &Record| -> Result<Record, MigrationFailure> {
        let kind = &record.type_name;
        let from_version = from.record_version(kind).unwrap_or(0);
        let to_version = target.record_version(kind).ok_or_else(|| {
            MigrationFailure::new(kind, MigrationFailureReason::UnknownKind(kind.clone()))
                .for_record(&record.id)
        })?;
        migrate_record(schema, record.clone(), from_version, to_version)
    };

    let mut out = Diff::new();
    for (id, record) in &diff.added {
        out.added.insert(id.clone(), migrate(record)?);
    }
    for (id, (before, after)) in &diff.updated {
        out.updated.insert(id.clone(), (migrate(before)?, migrate(after)?));
    }
    for (id, record) in &diff.removed {
        out.removed.insert(id.clone(), migrate(record)?);
    }
    Ok(out)
}
