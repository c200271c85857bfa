/*!
The [StateStore] trait: the persistence contract for snapshots,
environments and the schema version row. See the crate-level docs for the
atomicity requirements a conforming implementation must uphold.

A [memory] reference implementation ships for tests and for embedding this
crate where a full relational backend is unnecessary.
*/

#[cfg(any(test, feature = "testing"))]
pub mod memory;

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::Result;
use crate::model::environment::Environment;
use crate::model::snapshot::{Snapshot, SnapshotId, SnapshotTableInfo, Version};
use crate::versions::Versions;

/// `(name, version)` — used to fetch every snapshot sharing a version.
pub type NameVersion = (String, Version);

/// The read/write contract a state backend must implement. All write
/// operations are atomic with respect to concurrent readers: a reader may
/// observe the state before or after a write, but never a partial write.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Bulk-fetch snapshots. `None` fetches every snapshot in the store.
    async fn get_snapshots(
        &self,
        ids: Option<&[SnapshotId]>,
    ) -> Result<HashMap<SnapshotId, Snapshot>>;

    /// Fetch every snapshot that shares a `(name, version)` with one of `pairs`.
    async fn get_snapshots_with_same_version(&self, pairs: &[NameVersion]) -> Result<Vec<Snapshot>>;

    /// Which of `ids` already exist in the store.
    async fn snapshots_exist(&self, ids: &[SnapshotId]) -> Result<HashSet<SnapshotId>>;

    /// Fetch an environment by name, if it exists.
    async fn get_environment(&self, name: &str) -> Result<Option<Environment>>;

    /// Fetch every environment.
    async fn get_environments(&self) -> Result<Vec<Environment>>;

    /// Fetch every snapshot belonging to any of `names`.
    async fn get_snapshots_by_models(&self, names: &[String]) -> Result<Vec<Snapshot>>;

    /// Fetch (bootstrapping if absent) the `_versions` row, optionally
    /// validating it against this build's expectations.
    async fn get_versions(&self, validate: bool) -> Result<Versions>;

    /// Append `snapshots` to the store. Fails with `CoreError::Conflict` if
    /// any `snapshot_id` already exists.
    async fn push_snapshots(&self, snapshots: Vec<Snapshot>) -> Result<()>;

    /// Remove snapshots by id. GC-only; never called on referenced snapshots.
    async fn delete_snapshots(&self, ids: &[SnapshotId]) -> Result<()>;

    /// Delete and return every snapshot whose TTL has elapsed and which is
    /// not referenced by any environment.
    async fn delete_expired_snapshots(&self) -> Result<Vec<SnapshotId>>;

    /// Delete and return every environment whose `expiration_ts` has elapsed.
    async fn delete_expired_environments(&self) -> Result<Vec<String>>;

    /// Append `[s, e)` to the shared (or, if `is_dev`, dev-private) interval
    /// set of the snapshot's version.
    async fn add_interval(&self, snapshot_id: &SnapshotId, s: i64, e: i64, is_dev: bool) -> Result<()>;

    /// Remove `[s, e)` from every snapshot sharing a version with any of
    /// `snapshots`. When `all_snapshots` is provided, version membership is
    /// resolved against it instead of a fresh store read (used by callers
    /// that already hold the relevant snapshot set, e.g. dev-mode restatement).
    async fn remove_interval(
        &self,
        snapshots: &[SnapshotId],
        s: i64,
        e: i64,
        all_snapshots: Option<&HashMap<SnapshotId, Snapshot>>,
    ) -> Result<()>;

    /// Atomically replace `environment`'s snapshot set, returning the
    /// `(added, removed)` table infos. If `no_gaps`, fails with
    /// `CoreError::Conflict` when a newly added snapshot's model already
    /// existed in the environment and has missing intervals over
    /// `[environment.start_at, environment.end_at or now)`.
    async fn promote(
        &self,
        environment: Environment,
        no_gaps: bool,
    ) -> Result<(Vec<SnapshotTableInfo>, Vec<SnapshotTableInfo>)>;

    /// Set `paused_ts = None` on every snapshot in `snapshots`, recording
    /// `unpaused_dt` as the cutover time. Idempotent on already-unpaused
    /// snapshots.
    async fn unpause_snapshots(&self, snapshots: &[SnapshotId], unpaused_dt: i64) -> Result<()>;
}
