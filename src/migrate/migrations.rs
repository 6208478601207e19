//! Ordered, version-indexed migration chains.

use crate::error::MigrationFailureReason;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A single migration direction.
pub type MigrationFn<T> = Arc<dyn Fn(T) -> Result<T, String> + Send + Sync>;

/// The pair of functions moving a value between version `N - 1` and `N`.
pub struct Migration<T> {
    pub up: MigrationFn<T>,
    pub down: MigrationFn<T>,
}

impl<T> Clone for Migration<T> {
    fn clone(&self) -> Self {
        Self {
            up: Arc::clone(&self.up),
            down: Arc::clone(&self.down),
        }
    }
}

/// Migration chain for one record kind (`T = Record`) or for the whole
/// store (`T = RecordMap`).
///
/// Step `N` migrates from version `N - 1` to `N`. The current version is the
/// highest registered step, or `first_version` if there are none.
pub struct Migrations<T> {
    first_version: u32,
    current_version: u32,
    steps: BTreeMap<u32, Migration<T>>,
}

impl<T> Clone for Migrations<T> {
    fn clone(&self) -> Self {
        Self {
            first_version: self.first_version,
            current_version: self.current_version,
            steps: self.steps.clone(),
        }
    }
}

impl<T> Default for Migrations<T> {
    fn default() -> Self {
        Self {
            first_version: 0,
            current_version: 0,
            steps: BTreeMap::new(),
        }
    }
}

impl<T> fmt::Debug for Migrations<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrations")
            .field("first_version", &self.first_version)
            .field("current_version", &self.current_version)
            .field("steps", &self.steps.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T> Migrations<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest version this chain starts from. Data older than this is
    /// rejected with [`MigrationFailureReason::VersionTooOld`].
    pub fn with_first_version(mut self, version: u32) -> Self {
        self.first_version = version;
        self.current_version = self.current_version.max(version);
        self
    }

    /// Register infallible `up`/`down` functions reaching `version`.
    pub fn step<U, D>(self, version: u32, up: U, down: D) -> Self
    where
        U: Fn(T) -> T + Send + Sync + 'static,
        D: Fn(T) -> T + Send + Sync + 'static,
    {
        self.try_step(version, move |v| Ok(up(v)), move |v| Ok(down(v)))
    }

    /// Register fallible `up`/`down` functions reaching `version`.
    pub fn try_step<U, D>(mut self, version: u32, up: U, down: D) -> Self
    where
        U: Fn(T) -> Result<T, String> + Send + Sync + 'static,
        D: Fn(T) -> Result<T, String> + Send + Sync + 'static,
    {
        self.steps.insert(
            version,
            Migration {
                up: Arc::new(up),
                down: Arc::new(down),
            },
        );
        self.current_version = self.current_version.max(version);
        self
    }

    pub fn first_version(&self) -> u32 {
        self.first_version
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn has_step(&self, version: u32) -> bool {
        self.steps.contains_key(&version)
    }

    /// Check that every step between `from` and `to` exists.
    pub fn path(&self, from: u32, to: u32) -> Result<(), MigrationFailureReason> {
        for version in [from, to] {
            if version > self.current_version {
                return Err(MigrationFailureReason::VersionTooNew {
                    version,
                    current: self.current_version,
                });
            }
            if version < self.first_version {
                return Err(MigrationFailureReason::VersionTooOld {
                    version,
                    first: self.first_version,
                });
            }
        }

        let (low, high) = if from <= to { (from, to) } else { (to, from) };
        match (low + 1..=high).find(|v| !self.steps.contains_key(v)) {
            Some(missing) => Err(MigrationFailureReason::NoPathFound { from, to, missing }),
            None => Ok(()),
        }
    }

    /// Walk `value` from version `from` to version `to`, one step at a time.
    pub fn migrate(&self, value: T, from: u32, to: u32) -> Result<T, MigrationFailureReason> {
        self.path(from, to)?;

        let mut value = value;
        if from < to {
            for (version, step) in self.steps.range(from + 1..=to) {
                value = (step.up)(value).map_err(|message| MigrationFailureReason::MigrationError {
                    version: *version,
                    message,
                })?;
            }
        } else if from > to {
            for (version, step) in self.steps.range(to + 1..=from).rev() {
                value = (step.down)(value).map_err(|message| {
                    MigrationFailureReason::MigrationError {
                        version: *version,
                        message,
                    }
                })?;
            }
        }
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> Migrations<Vec<u32>> {
        Migrations::new()
            .step(
                1,
                |mut v: Vec<u32>| {
                    v.push(1);
                    v
                },
                |mut v: Vec<u32>| {
                    v.pop();
                    v
                },
            )
            .step(
                2,
                |mut v: Vec<u32>| {
                    v.push(2);
                    v
                },
                |mut v: Vec<u32>| {
                    v.pop();
                    v
                },
            )
    }

    #[test]
    fn test_current_version_tracks_steps() {
        assert_eq!(chain().current_version(), 2);
        assert_eq!(Migrations::<u32>::new().current_version(), 0);
        assert_eq!(Migrations::<u32>::new().with_first_version(3).current_version(), 3);
    }

    #[test]
    fn test_version_before_first_is_too_old() {
        let chain = chain().with_first_version(1);
        assert_eq!(
            chain.migrate(vec![], 0, 2),
            Err(MigrationFailureReason::VersionTooOld {
                version: 0,
                first: 1
            })
        );
        assert_eq!(chain.migrate(vec![1], 1, 2), Ok(vec![1, 2]));
        assert_eq!(
            chain.path(2, 0),
            Err(MigrationFailureReason::VersionTooOld {
                version: 0,
                first: 1
            })
        );
    }

    #[test]
    fn test_up_and_down_in_order() {
        let migrations = chain();
        let up = migrations.migrate(vec![], 0, 2).unwrap();
        assert_eq!(up, vec![1, 2]);
        let down = migrations.migrate(up, 2, 0).unwrap();
        assert!(down.is_empty());
        assert_eq!(migrations.migrate(vec![7], 1, 1).unwrap(), vec![7]);
    }

    #[test]
    fn test_missing_step_is_no_path() {
        let migrations = chain().step(4, |v| v, |v| v);
        let err = migrations.migrate(vec![], 0, 4).unwrap_err();
        assert_eq!(
            err,
            MigrationFailureReason::NoPathFound {
                from: 0,
                to: 4,
                missing: 3
            }
        );
    }

    #[test]
    fn test_version_too_new() {
        let err = chain().migrate(vec![], 5, 2).unwrap_err();
        assert_eq!(
            err,
            MigrationFailureReason::VersionTooNew {
                version: 5,
                current: 2
            }
        );
    }

    #[test]
    fn test_failing_step_reports_version() {
        let migrations = chain().try_step(3, |_| Err("boom".to_string()), Ok);
        let err = migrations.migrate(vec![], 0, 3).unwrap_err();
        assert_eq!(
            err,
            MigrationFailureReason::MigrationError {
                version: 3,
                message: "boom".into()
            }
        );
    }
}
