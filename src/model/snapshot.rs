/*!
The immutable, content-addressed [Snapshot]: the unit of versioning that the
rest of the crate reasons about. See the crate-level docs for how a
snapshot's `version` relates to its `physical_table_name`.
*/

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprints;
use crate::interval::IntervalSet;
use crate::model::kind::ModelKind;

/// Identifies a snapshot: the model name plus its data/metadata fingerprint.
/// Two snapshots of the same model with different fingerprints are distinct
/// `SnapshotId`s even if they end up sharing a `version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SnapshotId {
    /// The model this snapshot belongs to.
    pub name: String,
    /// The fingerprint pair distinguishing this snapshot from siblings.
    pub fingerprints: Fingerprints,
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}",
            self.name,
            self.fingerprints.data_hash.short()
        )
    }
}

/// A physical version identifier: snapshots sharing a `version` share a
/// physical table and an interval set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a snapshot's `data_hash` changed relative to the most recent prior
/// snapshot of the same model. Determines whether sibling/child snapshots
/// must also be rebuilt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeCategory {
    /// `data_hash` unchanged.
    NoChange,
    /// `data_hash` changed but existing intervals remain valid (e.g. a pure
    /// column reorder on a non-incremental model).
    NonBreaking,
    /// `data_hash` changed and existing intervals must be rebuilt.
    Breaking,
    /// A breaking change explicitly opted out of a rebuild of history.
    ForwardOnly,
    /// Unchanged directly, but a parent's `data_hash` changed in a way that
    /// does not invalidate this model's own intervals.
    IndirectNonBreaking,
    /// Unchanged directly, but a parent's breaking change requires this
    /// model to also rebuild.
    IndirectBreaking,
}

impl ChangeCategory {
    /// Whether this category requires existing intervals to be invalidated
    /// and rebuilt.
    pub fn requires_rebuild(&self) -> bool {
        matches!(self, ChangeCategory::Breaking | ChangeCategory::IndirectBreaking)
    }

    /// Whether this category permits reuse of the prior snapshot's
    /// `version` (and therefore its physical table and intervals).
    pub fn reuses_version(&self) -> bool {
        matches!(
            self,
            ChangeCategory::NoChange
                | ChangeCategory::NonBreaking
                | ChangeCategory::IndirectNonBreaking
        )
    }
}

/// The immutable unit of versioning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The snapshot's identity: model name + fingerprints.
    pub snapshot_id: SnapshotId,
    /// Resolved model kind, carried alongside the id for scheduling.
    pub kind: ModelKind,
    /// Shared physical version; assigned at first unpause.
    pub version: Version,
    /// Parent snapshot ids, forming the dependency DAG edges.
    pub parents: Vec<SnapshotId>,
    /// Change classification relative to the prior snapshot of this model.
    pub change_category: ChangeCategory,
    /// Production interval coverage, shared by all snapshots of this `version`.
    pub intervals: IntervalSet,
    /// Development-environment-private interval coverage.
    pub dev_intervals: IntervalSet,
    /// Timestamp of last pause; `None` means the snapshot is scheduled.
    pub paused_ts: Option<i64>,
    /// Timestamp of the cutover to unpaused, set by the first
    /// `unpause_snapshots` call and never cleared afterwards.
    pub unpaused_ts: Option<i64>,
    /// Relative expiration, in milliseconds, for an unreferenced snapshot.
    pub ttl_ms: i64,
    /// When this snapshot was first pushed to the store.
    pub created_ts: i64,
    /// The earliest time this snapshot may be materialized for.
    pub start_date: Option<i64>,
}

impl Snapshot {
    /// The physical table name backing this snapshot: stable across every
    /// sibling that shares its `version`.
    pub fn physical_table_name(&self) -> String {
        format!("sqlmesh__{}__{}", self.snapshot_id.name, self.version)
    }

    /// Whether the snapshot is unpaused (actively scheduled).
    pub fn is_unpaused(&self) -> bool {
        self.paused_ts.is_none()
    }

    /// Missing grain-aligned sub-intervals of `[lo, hi)`, against production
    /// intervals in production mode or `dev_intervals` in dev mode.
    pub fn missing_intervals(&self, lo: i64, hi: i64, grain_ms: i64, is_dev: bool) -> Vec<(i64, i64)> {
        let covered = if is_dev { &self.dev_intervals } else { &self.intervals };
        if !self.kind.is_incremental() {
            // Non-incremental kinds have at most one batch per run: either
            // the whole window is missing, or none of it is.
            if covered.covers(lo, hi) {
                Vec::new()
            } else {
                vec![(lo, hi)]
            }
        } else {
            covered.missing(lo, hi, grain_ms)
        }
    }

    /// Whether this snapshot and `other` are backed by the same physical table.
    pub fn shares_version_with(&self, other: &Snapshot) -> bool {
        self.version == other.version
    }
}

/// The minimal projection of a [Snapshot] an [Environment](super::environment::Environment)
/// needs to resolve a model's backing view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTableInfo {
    /// The snapshot's identity.
    pub snapshot_id: SnapshotId,
    /// The snapshot's physical version.
    pub version: Version,
}

impl From<&Snapshot> for SnapshotTableInfo {
    fn from(snapshot: &Snapshot) -> Self {
        SnapshotTableInfo {
            snapshot_id: snapshot.snapshot_id.clone(),
            version: snapshot.version.clone(),
        }
    }
}
