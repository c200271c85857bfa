/*!
An in-memory [StateStore] backed by [DashMap], sufficient to drive every
scenario in the crate's test suite and usable standalone wherever a full
relational backend would be overkill.
*/

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::{CoreError, Result};
use crate::migration::{Migration, Migrator};
use crate::model::environment::Environment;
use crate::model::snapshot::{Snapshot, SnapshotId, SnapshotTableInfo, Version};
use crate::state_store::{NameVersion, StateStore};
use crate::versions::Versions;

/// In-memory [StateStore]. Per the design note in the crate docs, the
/// shared `intervals`/`dev_intervals` of sibling snapshots live in a
/// `version -> IntervalSet` table here, not on the snapshot value itself;
/// every read reconstructs a snapshot's interval fields from that table.
pub struct InMemoryStateStore {
    snapshots: DashMap<SnapshotId, Snapshot>,
    version_intervals: DashMap<Version, crate::interval::IntervalSet>,
    version_dev_intervals: DashMap<Version, crate::interval::IntervalSet>,
    environments: DashMap<String, Environment>,
    versions: Mutex<Option<Versions>>,
    /// Serializes `push_snapshots`/`promote` so check-then-write stays
    /// atomic across the several `DashMap`s involved.
    write_lock: Mutex<()>,
    now_ms: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl InMemoryStateStore {
    /// An empty store. `now` supplies the current time for TTL and
    /// `no_gaps` checks; tests typically pass a fixed clock.
    pub fn new(now: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        InMemoryStateStore {
            snapshots: DashMap::new(),
            version_intervals: DashMap::new(),
            version_dev_intervals: DashMap::new(),
            environments: DashMap::new(),
            versions: Mutex::new(None),
            write_lock: Mutex::new(()),
            now_ms: Box::new(now),
        }
    }

    fn now(&self) -> i64 {
        (self.now_ms)()
    }

    /// Reconstruct `snapshot`'s shared interval fields from the version tables.
    fn hydrate(&self, mut snapshot: Snapshot) -> Snapshot {
        snapshot.intervals = self
            .version_intervals
            .get(&snapshot.version)
            .map(|v| v.clone())
            .unwrap_or_default();
        snapshot.dev_intervals = self
            .version_dev_intervals
            .get(&snapshot.version)
            .map(|v| v.clone())
            .unwrap_or_default();
        snapshot
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_snapshots(
        &self,
        ids: Option<&[SnapshotId]>,
    ) -> Result<HashMap<SnapshotId, Snapshot>> {
        let out = match ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.snapshots.get(id).map(|s| (id.clone(), s.clone())))
                .collect::<HashMap<_, _>>(),
            None => self
                .snapshots
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        Ok(out
            .into_iter()
            .map(|(id, snap)| (id, self.hydrate(snap)))
            .collect())
    }

    async fn get_snapshots_with_same_version(&self, pairs: &[NameVersion]) -> Result<Vec<Snapshot>> {
        let wanted: HashSet<_> = pairs.iter().cloned().collect();
        Ok(self
            .snapshots
            .iter()
            .filter(|e| wanted.contains(&(e.key().name.clone(), e.value().version.clone())))
            .map(|e| self.hydrate(e.value().clone()))
            .collect())
    }

    async fn snapshots_exist(&self, ids: &[SnapshotId]) -> Result<HashSet<SnapshotId>> {
        Ok(ids
            .iter()
            .filter(|id| self.snapshots.contains_key(id))
            .cloned()
            .collect())
    }

    async fn get_environment(&self, name: &str) -> Result<Option<Environment>> {
        Ok(self.environments.get(name).map(|e| e.clone()))
    }

    async fn get_environments(&self) -> Result<Vec<Environment>> {
        Ok(self.environments.iter().map(|e| e.value().clone()).collect())
    }

    async fn get_snapshots_by_models(&self, names: &[String]) -> Result<Vec<Snapshot>> {
        let names: HashSet<_> = names.iter().collect();
        Ok(self
            .snapshots
            .iter()
            .filter(|e| names.contains(&e.key().name))
            .map(|e| self.hydrate(e.value().clone()))
            .collect())
    }

    async fn get_versions(&self, validate: bool) -> Result<Versions> {
        let mut guard = self.versions.lock().unwrap();
        if guard.is_none() {
            *guard = Some(Versions::current());
        }
        let versions = guard.clone().unwrap();
        if validate {
            versions.validate()?;
        }
        Ok(versions)
    }

    async fn push_snapshots(&self, snapshots: Vec<Snapshot>) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap();
        for snapshot in &snapshots {
            if self.snapshots.contains_key(&snapshot.snapshot_id) {
                return Err(CoreError::conflict(format!(
                    "snapshot {} already exists",
                    snapshot.snapshot_id
                )));
            }
        }
        for snapshot in snapshots {
            self.version_intervals
                .entry(snapshot.version.clone())
                .or_default();
            self.version_dev_intervals
                .entry(snapshot.version.clone())
                .or_default();
            self.snapshots.insert(snapshot.snapshot_id.clone(), snapshot);
        }
        Ok(())
    }

    async fn delete_snapshots(&self, ids: &[SnapshotId]) -> Result<()> {
        for id in ids {
            self.snapshots.remove(id);
        }
        Ok(())
    }

    async fn delete_expired_snapshots(&self) -> Result<Vec<SnapshotId>> {
        let now = self.now();
        let referenced: HashSet<SnapshotId> = self
            .environments
            .iter()
            .flat_map(|e| e.value().snapshots.iter().map(|i| i.snapshot_id.clone()).collect::<Vec<_>>())
            .collect();
        let expired: Vec<SnapshotId> = self
            .snapshots
            .iter()
            .filter(|e| {
                let s = e.value();
                !referenced.contains(&s.snapshot_id) && now - s.created_ts >= s.ttl_ms
            })
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.snapshots.remove(id);
        }
        Ok(expired)
    }

    async fn delete_expired_environments(&self) -> Result<Vec<String>> {
        let now = self.now();
        let expired: Vec<String> = self
            .environments
            .iter()
            .filter(|e| e.value().expiration_ts.is_some_and(|ts| ts <= now))
            .map(|e| e.key().clone())
            .collect();
        for name in &expired {
            self.environments.remove(name);
        }
        Ok(expired)
    }

    async fn add_interval(&self, snapshot_id: &SnapshotId, s: i64, e: i64, is_dev: bool) -> Result<()> {
        let version = self
            .snapshots
            .get(snapshot_id)
            .map(|snap| snap.version.clone())
            .ok_or_else(|| CoreError::state(format!("unknown snapshot {snapshot_id}")))?;
        let table = if is_dev { &self.version_dev_intervals } else { &self.version_intervals };
        table.entry(version).or_default().add(s, e);
        Ok(())
    }

    async fn remove_interval(
        &self,
        snapshots: &[SnapshotId],
        s: i64,
        e: i64,
        all_snapshots: Option<&HashMap<SnapshotId, Snapshot>>,
    ) -> Result<()> {
        let mut versions = HashSet::new();
        for id in snapshots {
            let version = match all_snapshots.and_then(|all| all.get(id)) {
                Some(snap) => snap.version.clone(),
                None => self
                    .snapshots
                    .get(id)
                    .map(|s| s.version.clone())
                    .ok_or_else(|| CoreError::state(format!("unknown snapshot {id}")))?,
            };
            versions.insert(version);
        }
        for version in versions {
            if let Some(mut set) = self.version_intervals.get_mut(&version) {
                set.remove(s, e);
            }
        }
        Ok(())
    }

    async fn promote(
        &self,
        mut environment: Environment,
        no_gaps: bool,
    ) -> Result<(Vec<SnapshotTableInfo>, Vec<SnapshotTableInfo>)> {
        let _guard = self.write_lock.lock().unwrap();
        let previous = self.environments.get(&environment.name).map(|e| e.clone());
        let previous_models: HashSet<String> = previous
            .as_ref()
            .map(|e| e.snapshots.iter().map(|i| i.snapshot_id.name.clone()).collect())
            .unwrap_or_default();

        let new_snapshots = std::mem::take(&mut environment.snapshots);
        let (added, removed) = if let Some(mut prev) = previous.clone() {
            prev.replace_snapshots(new_snapshots)
        } else {
            let mut scratch = Environment::new(environment.name.clone(), environment.start_at, environment.end_at);
            scratch.replace_snapshots(new_snapshots)
        };

        if no_gaps {
            let hi = environment.end_at.unwrap_or_else(|| self.now());
            for info in &added {
                if previous_models.contains(&info.snapshot_id.name) {
                    let covered = self
                        .version_intervals
                        .get(&info.version)
                        .map(|v| v.clone())
                        .unwrap_or_default();
                    if !covered.covers(environment.start_at, hi) {
                        return Err(CoreError::conflict(format!(
                            "promote with no_gaps: {} has missing intervals in [{}, {})",
                            info.snapshot_id, environment.start_at, hi
                        )));
                    }
                }
            }
        }

        let final_snapshots: Vec<SnapshotTableInfo> = {
            let mut all = previous
                .map(|e| e.snapshots)
                .unwrap_or_default();
            for r in &removed {
                all.retain(|i| i != r);
            }
            for a in &added {
                if !all.contains(a) {
                    all.push(a.clone());
                }
            }
            all
        };
        environment.snapshots = final_snapshots;
        environment.validate_unique_names()?;
        self.environments.insert(environment.name.clone(), environment);
        Ok((added, removed))
    }

    async fn unpause_snapshots(&self, snapshots: &[SnapshotId], unpaused_dt: i64) -> Result<()> {
        for id in snapshots {
            if let Some(mut snap) = self.snapshots.get_mut(id) {
                if snap.paused_ts.is_some() {
                    snap.paused_ts = None;
                    snap.unpaused_ts = Some(unpaused_dt);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Migrator for InMemoryStateStore {
    async fn read_versions(&self) -> Result<Option<Versions>> {
        Ok(self.versions.lock().unwrap().clone())
    }

    async fn apply_migration(&self, _migration: &Migration) -> Result<()> {
        // The in-memory backend has no physical schema to alter; applying a
        // migration here is a no-op beyond bookkeeping done by `migrate()`.
        Ok(())
    }

    async fn migrate_rows(&self) -> Result<()> {
        Ok(())
    }

    async fn write_versions(&self, versions: Versions) -> Result<()> {
        *self.versions.lock().unwrap() = Some(versions);
        Ok(())
    }
}
