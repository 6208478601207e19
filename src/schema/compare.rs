//! Compatibility between two schema version vectors.

use super::registry::SchemaVersion;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of comparing a local schema with a remote one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaCompatibility {
    /// Same versions everywhere.
    Compatible,
    /// The remote data is older; it can be migrated up locally.
    RemoteNeedsMigration,
    /// The remote data is newer than this build understands.
    LocalNeedsMigration,
    /// Kinds differ with no migration path, or each side is ahead somewhere.
    Incompatible,
}

/// Compare `local` against `remote`.
///
/// A kind present on only one side is acceptable when the store versions
/// differ, since a store-level migration can add, rename or remove it.
pub fn compare_schemas(local: &SchemaVersion, remote: &SchemaVersion) -> SchemaCompatibility {
    let mut local_newer = false;
    let mut remote_newer = false;

    match local.store_version.cmp(&remote.store_version) {
        Ordering::Greater => local_newer = true,
        Ordering::Less => remote_newer = true,
        Ordering::Equal => {}
    }

    for (kind, local_version) in &local.record_versions {
        if let Some(remote_version) = remote.record_versions.get(kind) {
            match local_version.cmp(remote_version) {
                Ordering::Greater => local_newer = true,
                Ordering::Less => remote_newer = true,
                Ordering::Equal => {}
            }
        }
    }

    // A kind on one side only must come from a store-level step.
    let one_sided = local.record_versions.keys().ne(remote.record_versions.keys());
    if one_sided && local.store_version == remote.store_version {
        return SchemaCompatibility::Incompatible;
    }

    match (local_newer, remote_newer) {
        (false, false) => SchemaCompatibility::Compatible,
        (true, false) => SchemaCompatibility::RemoteNeedsMigration,
        (false, true) => SchemaCompatibility::LocalNeedsMigration,
        (true, true) => SchemaCompatibility::Incompatible,
    }
}
