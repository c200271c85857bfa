/*!
Defining the [Environment] struct: a named promotion target mapping model
names to the [SnapshotTableInfo] backing each one's view.
*/

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::model::snapshot::SnapshotTableInfo;

/// A named promotion target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// The environment's unique name, e.g. `prod` or `dev_alice`.
    pub name: String,
    /// The environment's current cut of the dependency DAG.
    pub snapshots: Vec<SnapshotTableInfo>,
    /// Start of the interval window this environment's apply covers.
    pub start_at: i64,
    /// End of the interval window; `None` means unbounded production.
    pub end_at: Option<i64>,
    /// The plan that last successfully applied to this environment.
    pub plan_id: Option<String>,
    /// The plan that applied immediately before `plan_id`.
    pub previous_plan_id: Option<String>,
    /// Absolute expiration for a finite (development) environment.
    pub expiration_ts: Option<i64>,
}

impl Environment {
    /// Create a new environment with an empty snapshot set.
    pub fn new(name: impl Into<String>, start_at: i64, end_at: Option<i64>) -> Self {
        Environment {
            name: name.into(),
            snapshots: Vec::new(),
            start_at,
            end_at,
            plan_id: None,
            previous_plan_id: None,
            expiration_ts: None,
        }
    }

    /// Whether this environment is a bounded development environment.
    pub fn is_dev(&self) -> bool {
        self.end_at.is_some()
    }

    /// Validate the invariant that every model name appears at most once.
    pub fn validate_unique_names(&self) -> Result<()> {
        let mut seen = HashSet::with_capacity(self.snapshots.len());
        for info in &self.snapshots {
            if !seen.insert(&info.snapshot_id.name) {
                return Err(CoreError::state(format!(
                    "environment {} has duplicate snapshot entries for model {}",
                    self.name, info.snapshot_id.name
                )));
            }
        }
        Ok(())
    }

    /// Replace this environment's snapshot set with `new_snapshots`,
    /// returning the `(added, removed)` table infos relative to the
    /// previous cut. Does not itself enforce `no_gaps`; that validation
    /// happens in the `StateStore::promote` implementation, which has
    /// access to interval coverage.
    pub fn replace_snapshots(
        &mut self,
        new_snapshots: Vec<SnapshotTableInfo>,
    ) -> (Vec<SnapshotTableInfo>, Vec<SnapshotTableInfo>) {
        let old: HashSet<_> = self.snapshots.iter().cloned().collect();
        let new: HashSet<_> = new_snapshots.iter().cloned().collect();
        let added: Vec<_> = new.difference(&old).cloned().collect();
        let removed: Vec<_> = old.difference(&new).cloned().collect();
        self.snapshots = new_snapshots;
        (added, removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Fingerprint, Fingerprints};
    use crate::model::snapshot::{SnapshotId, Version};

    fn info(name: &str, seed: u8) -> SnapshotTableInfo {
        SnapshotTableInfo {
            snapshot_id: SnapshotId {
                name: name.to_string(),
                fingerprints: Fingerprints {
                    own_data_hash: Fingerprint([seed; 32]),
                    data_hash: Fingerprint([seed; 32]),
                    metadata_hash: Fingerprint([seed; 32]),
                },
            },
            version: Version(format!("v{seed}")),
        }
    }

    #[test]
    fn rejects_duplicate_model_names() {
        let mut env = Environment::new("prod", 0, None);
        env.snapshots = vec![info("m", 1), info("m", 2)];
        assert!(env.validate_unique_names().is_err());
    }

    #[test]
    fn replace_reports_added_and_removed() {
        let mut env = Environment::new("prod", 0, None);
        env.snapshots = vec![info("a", 1), info("b", 1)];
        let (added, removed) = env.replace_snapshots(vec![info("a", 1), info("c", 1)]);
        assert_eq!(added, vec![info("c", 1)]);
        assert_eq!(removed, vec![info("b", 1)]);
    }

    #[test]
    fn dev_when_end_at_set() {
        assert!(Environment::new("dev", 0, Some(100)).is_dev());
        assert!(!Environment::new("prod", 0, None).is_dev());
    }
}
