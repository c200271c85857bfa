/*!
[Plan]: the validated, fully-resolved description of a single apply.
Construction is eager: every invariant a [PlanEvaluator](evaluator::PlanEvaluator)
relies on is checked once here, before any phase runs.
*/

pub mod evaluator;

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::environment::Environment;
use crate::model::snapshot::{ChangeCategory, Snapshot, SnapshotId};

/// A validated apply request: the full resolved snapshot set, the
/// environment it targets, and the restatement/backfill work it implies.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Opaque identity for this run, used for tracing and idempotency at
    /// external orchestration boundaries.
    pub plan_id: Uuid,
    /// Proposed snapshots whose `snapshot_id` does not already exist in the store.
    pub new_snapshots: Vec<Snapshot>,
    /// The full resolved snapshot set for the target environment (new + reused).
    pub snapshots: Vec<Snapshot>,
    /// The environment record this plan will promote into.
    pub environment: Environment,
    /// Model names whose intervals must be invalidated and rebuilt over
    /// `[start, end)`.
    pub restatements: HashSet<String>,
    /// Whether the apply is targeting a bounded development environment.
    pub is_dev: bool,
    /// Reject promotion if a newly promoted snapshot has missing intervals
    /// in an already-covered production window.
    pub no_gaps: bool,
    /// Skip the Backfill phase even if `requires_backfill` would be true.
    pub skip_backfill: bool,
    /// Start of the interval window this plan's restatement/backfill covers.
    pub start: i64,
    /// End of the interval window.
    pub end: i64,
}

impl Plan {
    /// Whether the Backfill phase must run: false only when every proposed
    /// snapshot is `NoChange`, there is nothing to restate, and the caller
    /// has not explicitly asked to skip it.
    pub fn requires_backfill(&self) -> bool {
        if self.skip_backfill {
            return false;
        }
        !self.restatements.is_empty()
            || self
                .snapshots
                .iter()
                .any(|s| s.change_category != ChangeCategory::NoChange)
    }
}

/// Builds and validates a [Plan] from the raw inputs described in the
/// component design: proposed snapshots, a target environment, an interval
/// window, and the apply's mode flags.
pub struct PlanBuilder {
    proposed_snapshots: Vec<Snapshot>,
    target_environment: String,
    start: i64,
    end: i64,
    restatements: HashSet<String>,
    is_dev: bool,
    no_gaps: bool,
    skip_backfill: bool,
    forward_only: bool,
}

impl PlanBuilder {
    /// Start building a plan targeting `target_environment` over `[start, end)`.
    pub fn new(proposed_snapshots: Vec<Snapshot>, target_environment: impl Into<String>, start: i64, end: i64) -> Self {
        PlanBuilder {
            proposed_snapshots,
            target_environment: target_environment.into(),
            start,
            end,
            restatements: HashSet::new(),
            is_dev: false,
            no_gaps: false,
            skip_backfill: false,
            forward_only: false,
        }
    }

    /// Mark this as a bounded development apply.
    pub fn is_dev(mut self, is_dev: bool) -> Self {
        self.is_dev = is_dev;
        self
    }

    /// Reject promotion if a newly promoted snapshot has gaps in an
    /// already-covered window.
    pub fn no_gaps(mut self, no_gaps: bool) -> Self {
        self.no_gaps = no_gaps;
        self
    }

    /// Skip the Backfill phase regardless of `requires_backfill`.
    pub fn skip_backfill(mut self, skip_backfill: bool) -> Self {
        self.skip_backfill = skip_backfill;
        self
    }

    /// Invalidate and rebuild intervals over `[start, end)` for these model names.
    pub fn restatements(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.restatements = names.into_iter().collect();
        self
    }

    /// Treat the whole apply as forward-only: every `Breaking` category in
    /// `proposed_snapshots` is downgraded to `ForwardOnly` before validation.
    pub fn forward_only(mut self, forward_only: bool) -> Self {
        self.forward_only = forward_only;
        self
    }

    /// Validate inputs and assemble the [Plan].
    ///
    /// `existing` is the state store's current snapshot set, keyed by id,
    /// used to resolve parents not present in `proposed_snapshots` and to
    /// determine which proposed snapshots are actually new.
    pub fn build(mut self, existing: &HashMap<SnapshotId, Snapshot>) -> Result<Plan> {
        if self.forward_only {
            for snapshot in &mut self.proposed_snapshots {
                if snapshot.change_category == ChangeCategory::Breaking {
                    snapshot.change_category = ChangeCategory::ForwardOnly;
                }
            }
        }

        if !self.restatements.is_empty() {
            let known: HashSet<&String> = self
                .proposed_snapshots
                .iter()
                .map(|s| &s.snapshot_id.name)
                .chain(existing.keys().map(|id| &id.name))
                .collect();
            if !self.restatements.iter().any(|name| known.contains(name)) {
                return Err(CoreError::config(format!(
                    "restatements {:?} do not intersect the resolved model set",
                    self.restatements
                )));
            }
            if let Some(forward_only) = self
                .proposed_snapshots
                .iter()
                .find(|s| self.restatements.contains(&s.snapshot_id.name) && s.change_category == ChangeCategory::ForwardOnly)
            {
                return Err(CoreError::config(format!(
                    "cannot restate {}: it is forward-only",
                    forward_only.snapshot_id.name
                )));
            }
        }

        let mut all_ids: HashSet<SnapshotId> = existing.keys().cloned().collect();
        for snapshot in &self.proposed_snapshots {
            all_ids.insert(snapshot.snapshot_id.clone());
        }
        for snapshot in &self.proposed_snapshots {
            for parent in &snapshot.parents {
                if !all_ids.contains(parent) {
                    return Err(CoreError::config(format!(
                        "model {} references unresolved parent {}",
                        snapshot.snapshot_id.name, parent
                    )));
                }
            }
        }

        let new_snapshots: Vec<Snapshot> = self
            .proposed_snapshots
            .iter()
            .filter(|s| !existing.contains_key(&s.snapshot_id))
            .cloned()
            .collect();

        let mut environment = Environment::new(
            self.target_environment.clone(),
            self.start,
            self.is_dev.then_some(self.end),
        );
        environment.snapshots = self.proposed_snapshots.iter().map(|s| s.into()).collect();
        environment.validate_unique_names()?;

        Ok(Plan {
            plan_id: Uuid::new_v4(),
            new_snapshots,
            snapshots: self.proposed_snapshots,
            environment,
            restatements: self.restatements,
            is_dev: self.is_dev,
            no_gaps: self.no_gaps,
            skip_backfill: self.skip_backfill,
            start: self.start,
            end: self.end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Fingerprint, Fingerprints};
    use crate::interval::IntervalSet;
    use crate::model::kind::ModelKind;
    use crate::model::snapshot::{SnapshotId, Version};

    fn snapshot(name: &str, seed: u8, parents: Vec<SnapshotId>, category: ChangeCategory) -> Snapshot {
        Snapshot {
            snapshot_id: SnapshotId {
                name: name.to_string(),
                fingerprints: Fingerprints {
                    own_data_hash: Fingerprint([seed; 32]),
                    data_hash: Fingerprint([seed; 32]),
                    metadata_hash: Fingerprint([seed; 32]),
                },
            },
            kind: ModelKind::Full,
            version: Version(format!("v{seed}")),
            parents,
            change_category: category,
            intervals: IntervalSet::new(),
            dev_intervals: IntervalSet::new(),
            paused_ts: Some(0),
            unpaused_ts: None,
            ttl_ms: 1000,
            created_ts: 0,
            start_date: None,
        }
    }

    #[test]
    fn rejects_unresolved_parent() {
        let child = snapshot(
            "child",
            1,
            vec![SnapshotId {
                name: "missing".to_string(),
                fingerprints: Fingerprints {
                    own_data_hash: Fingerprint([9; 32]),
                    data_hash: Fingerprint([9; 32]),
                    metadata_hash: Fingerprint([9; 32]),
                },
            }],
            ChangeCategory::Breaking,
        );
        let err = PlanBuilder::new(vec![child], "prod", 0, 100)
            .build(&HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn new_snapshots_excludes_already_existing() {
        let a = snapshot("a", 1, vec![], ChangeCategory::NoChange);
        let mut existing = HashMap::new();
        existing.insert(a.snapshot_id.clone(), a.clone());
        let plan = PlanBuilder::new(vec![a], "prod", 0, 100).build(&existing).unwrap();
        assert!(plan.new_snapshots.is_empty());
        assert_eq!(plan.snapshots.len(), 1);
    }

    #[test]
    fn requires_backfill_false_when_every_snapshot_is_no_change() {
        let a = snapshot("a", 1, vec![], ChangeCategory::NoChange);
        let plan = PlanBuilder::new(vec![a], "prod", 0, 100).build(&HashMap::new()).unwrap();
        assert!(!plan.requires_backfill());
    }

    #[test]
    fn skip_backfill_overrides_requires_backfill() {
        let a = snapshot("a", 1, vec![], ChangeCategory::Breaking);
        let plan = PlanBuilder::new(vec![a], "prod", 0, 100)
            .skip_backfill(true)
            .build(&HashMap::new())
            .unwrap();
        assert!(!plan.requires_backfill());
    }

    #[test]
    fn restatement_not_in_model_set_is_rejected() {
        let a = snapshot("a", 1, vec![], ChangeCategory::NoChange);
        let err = PlanBuilder::new(vec![a], "prod", 0, 100)
            .restatements(["ghost".to_string()])
            .build(&HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn restating_a_forward_only_model_is_rejected() {
        let a = snapshot("a", 1, vec![], ChangeCategory::ForwardOnly);
        let err = PlanBuilder::new(vec![a], "prod", 0, 100)
            .restatements(["a".to_string()])
            .build(&HashMap::new())
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));
    }

    #[test]
    fn forward_only_downgrades_breaking_before_validation() {
        let a = snapshot("a", 1, vec![], ChangeCategory::Breaking);
        let plan = PlanBuilder::new(vec![a], "prod", 0, 100)
            .forward_only(true)
            .build(&HashMap::new())
            .unwrap();
        assert_eq!(plan.snapshots[0].change_category, ChangeCategory::ForwardOnly);
    }
}
