/*!
[SnapshotEvaluator]: the external boundary to whatever physical warehouse
backs a snapshot's `physical_table_name`. The core only ever calls through
this trait; it has no opinion on SQL dialect, connection pooling, or DDL
syntax.
*/

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::environment::Environment;
use crate::model::snapshot::{Snapshot, SnapshotId};

/// Adapts the crate's snapshot model onto a physical warehouse. Consumed by
/// the [PlanEvaluator](crate::plan::evaluator::PlanEvaluator) and the
/// [Scheduler](crate::scheduler::Scheduler); never implemented by the core
/// itself.
#[async_trait]
pub trait SnapshotEvaluator: Send + Sync {
    /// Create physical tables for `new_snapshots`. A no-op for any snapshot
    /// whose `version` already has a backing table among `all_snapshots_by_id`.
    async fn create(
        &self,
        new_snapshots: &[Snapshot],
        all_snapshots_by_id: &HashMap<SnapshotId, Snapshot>,
    ) -> Result<()>;

    /// Compute one batch `[start, end)` of `snapshot` into its physical
    /// table. Must be safe to re-invoke over an overlapping interval.
    async fn evaluate(
        &self,
        snapshot: &Snapshot,
        start: i64,
        end: i64,
        latest: i64,
        snapshots_by_id: &HashMap<SnapshotId, Snapshot>,
    ) -> Result<()>;

    /// Create or repoint `environment`'s per-model views onto `snapshots`.
    async fn promote(&self, snapshots: &[Snapshot], environment: &Environment, is_dev: bool) -> Result<()>;

    /// Drop `environment`'s views for the given (now superseded) snapshots.
    async fn demote(&self, snapshots: &[Snapshot], environment: &Environment) -> Result<()>;

    /// Apply non-breaking schema alterations to the physical tables backing
    /// `snapshots`, reused from a prior version.
    async fn migrate(&self, snapshots: &[Snapshot]) -> Result<()>;
}

#[cfg(any(test, feature = "testing"))]
pub mod testing {
    //! In-memory [SnapshotEvaluator] fakes for driving scenario tests
    //! without a real warehouse connection.

    use std::collections::HashSet;
    use std::sync::Mutex;

    use super::*;

    /// Records every call made to it and can be configured to fail
    /// `evaluate` for a specific `(snapshot_id, interval)` pair, reproducing
    /// a mid-backfill failure.
    #[derive(Default)]
    pub struct RecordingSnapshotEvaluator {
        created: Mutex<Vec<SnapshotId>>,
        evaluated: Mutex<Vec<(SnapshotId, i64, i64)>>,
        promoted: Mutex<Vec<(String, SnapshotId)>>,
        demoted: Mutex<Vec<(String, SnapshotId)>>,
        migrated: Mutex<Vec<SnapshotId>>,
        failing: Mutex<HashSet<(SnapshotId, i64, i64)>>,
    }

    impl RecordingSnapshotEvaluator {
        /// A fresh evaluator that fails nothing.
        pub fn new() -> Self {
            Self::default()
        }

        /// Configure `evaluate(snapshot_id, start, end)` to return an error.
        pub fn fail_on(&self, snapshot_id: SnapshotId, start: i64, end: i64) {
            self.failing.lock().unwrap().insert((snapshot_id, start, end));
        }

        /// Every batch recorded so far, in call order.
        pub fn evaluated(&self) -> Vec<(SnapshotId, i64, i64)> {
            self.evaluated.lock().unwrap().clone()
        }

        /// Every snapshot_id ever passed to `create`.
        pub fn created(&self) -> Vec<SnapshotId> {
            self.created.lock().unwrap().clone()
        }

        /// Every `(environment, snapshot_id)` pair passed to `promote`.
        pub fn promoted(&self) -> Vec<(String, SnapshotId)> {
            self.promoted.lock().unwrap().clone()
        }

        /// Every `(environment, snapshot_id)` pair passed to `demote`.
        pub fn demoted(&self) -> Vec<(String, SnapshotId)> {
            self.demoted.lock().unwrap().clone()
        }

        /// Every snapshot_id ever passed to `migrate`.
        pub fn migrated(&self) -> Vec<SnapshotId> {
            self.migrated.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SnapshotEvaluator for RecordingSnapshotEvaluator {
        async fn create(
            &self,
            new_snapshots: &[Snapshot],
            _all_snapshots_by_id: &HashMap<SnapshotId, Snapshot>,
        ) -> Result<()> {
            let mut created = self.created.lock().unwrap();
            created.extend(new_snapshots.iter().map(|s| s.snapshot_id.clone()));
            Ok(())
        }

        async fn evaluate(
            &self,
            snapshot: &Snapshot,
            start: i64,
            end: i64,
            _latest: i64,
            _snapshots_by_id: &HashMap<SnapshotId, Snapshot>,
        ) -> Result<()> {
            let key = (snapshot.snapshot_id.clone(), start, end);
            if self.failing.lock().unwrap().contains(&key) {
                return Err(crate::error::CoreError::Execution {
                    snapshot_id: snapshot.snapshot_id.clone(),
                    interval: (start, end),
                    source: anyhow::anyhow!("simulated evaluation failure"),
                });
            }
            self.evaluated.lock().unwrap().push(key);
            Ok(())
        }

        async fn promote(&self, snapshots: &[Snapshot], environment: &Environment, _is_dev: bool) -> Result<()> {
            let mut promoted = self.promoted.lock().unwrap();
            promoted.extend(
                snapshots
                    .iter()
                    .map(|s| (environment.name.clone(), s.snapshot_id.clone())),
            );
            Ok(())
        }

        async fn demote(&self, snapshots: &[Snapshot], environment: &Environment) -> Result<()> {
            let mut demoted = self.demoted.lock().unwrap();
            demoted.extend(
                snapshots
                    .iter()
                    .map(|s| (environment.name.clone(), s.snapshot_id.clone())),
            );
            Ok(())
        }

        async fn migrate(&self, snapshots: &[Snapshot]) -> Result<()> {
            self.migrated
                .lock()
                .unwrap()
                .extend(snapshots.iter().map(|s| s.snapshot_id.clone()));
            Ok(())
        }
    }
}
