/*!
[BatchDag]: the dependency graph of `(snapshot_id, batch_interval)` work
items a [Scheduler](super::Scheduler) run dispatches against.
*/

use std::collections::{HashMap, HashSet, VecDeque};

use crate::model::snapshot::{Snapshot, SnapshotId};

/// Index into [BatchDag]'s node table.
pub type NodeId = usize;

/// A single unit of backfill work: one snapshot, one grain-aligned interval.
#[derive(Debug, Clone)]
pub struct BatchNode {
    /// The snapshot this batch materializes.
    pub snapshot_id: SnapshotId,
    /// Start of the batch's interval.
    pub start: i64,
    /// End of the batch's interval.
    pub end: i64,
}

/// The dependency DAG over `(snapshot_id, batch_interval)` nodes, plus the
/// bookkeeping a single-threaded dispatch loop needs: a ready queue and
/// per-node predecessor counts.
pub struct BatchDag {
    nodes: Vec<BatchNode>,
    successors: Vec<Vec<NodeId>>,
    remaining_predecessors: Vec<usize>,
    ready: VecDeque<NodeId>,
}

impl BatchDag {
    /// Compute missing work for `snapshots` over `[start, end)` and assemble
    /// the dependency graph. `batch_size`, if set, caps the number of grain
    /// units per incremental batch; `None` means one batch per grain unit.
    /// Non-materialized kinds (views, embedded models) are never dispatched.
    pub fn build(
        snapshots: &[Snapshot],
        start: i64,
        end: i64,
        grain_ms: i64,
        batch_size: Option<i64>,
        is_dev: bool,
    ) -> Self {
        let mut nodes = Vec::new();
        // snapshot_id -> node ids covering it, in ascending start order.
        let mut nodes_by_snapshot: HashMap<SnapshotId, Vec<NodeId>> = HashMap::new();

        for snapshot in snapshots {
            if !snapshot.kind.is_materialized() {
                // Views and embedded models have no physical table to
                // backfill; they are never dispatched, only depended upon.
                continue;
            }
            let earliest_start = snapshot.start_date.map(|d| d.max(start)).unwrap_or(start);
            if earliest_start >= end {
                continue;
            }
            let missing = snapshot.missing_intervals(earliest_start, end, grain_ms, is_dev);
            let mut node_ids = Vec::new();
            if snapshot.kind.is_incremental() {
                // `missing_intervals` already enumerates one grain step per
                // entry; re-coalesce contiguous runs so `split_batch` can
                // regroup them per `batch_size` (or one-per-grain if unset).
                for (s, e) in coalesce_runs(missing) {
                    for (bs, be) in split_batch(s, e, grain_ms, batch_size) {
                        let id = nodes.len();
                        nodes.push(BatchNode {
                            snapshot_id: snapshot.snapshot_id.clone(),
                            start: bs,
                            end: be,
                        });
                        node_ids.push(id);
                    }
                }
            } else {
                // Non-incremental kinds are all-or-nothing: `missing_intervals`
                // already returns at most one span, dispatched as a single batch.
                for (s, e) in missing {
                    let id = nodes.len();
                    nodes.push(BatchNode {
                        snapshot_id: snapshot.snapshot_id.clone(),
                        start: s,
                        end: e,
                    });
                    node_ids.push(id);
                }
            }
            nodes_by_snapshot.insert(snapshot.snapshot_id.clone(), node_ids);
        }

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut predecessor_sets: Vec<HashSet<NodeId>> = vec![HashSet::new(); nodes.len()];

        // A snapshot's own batches execute in ascending `start` order: each
        // depends on the one before it, so a mid-run failure leaves a
        // contiguous backfilled prefix rather than scattered holes.
        for node_ids in nodes_by_snapshot.values() {
            for pair in node_ids.windows(2) {
                let (prev, next) = (pair[0], pair[1]);
                successors[prev].push(next);
                predecessor_sets[next].insert(prev);
            }
        }

        for snapshot in snapshots {
            let Some(child_nodes) = nodes_by_snapshot.get(&snapshot.snapshot_id) else { continue };
            for parent_id in &snapshot.parents {
                let Some(parent_nodes) = nodes_by_snapshot.get(parent_id) else { continue };
                for &child in child_nodes {
                    let child_span = (nodes[child].start, nodes[child].end);
                    for &parent in parent_nodes {
                        let parent_span = (nodes[parent].start, nodes[parent].end);
                        if overlaps(parent_span, child_span) {
                            successors[parent].push(child);
                            predecessor_sets[child].insert(parent);
                        }
                    }
                }
            }
        }

        let remaining_predecessors: Vec<usize> = predecessor_sets.iter().map(|p| p.len()).collect();
        let ready: VecDeque<NodeId> = (0..nodes.len())
            .filter(|&id| remaining_predecessors[id] == 0)
            .collect();

        BatchDag {
            nodes,
            successors,
            remaining_predecessors,
            ready,
        }
    }

    /// Whether the DAG has no work at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total number of batch nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Borrow a node's data.
    pub fn node(&self, id: NodeId) -> &BatchNode {
        &self.nodes[id]
    }

    /// Pop the next ready node, if any.
    pub fn pop_ready(&mut self) -> Option<NodeId> {
        self.ready.pop_front()
    }

    /// Record `id` as succeeded, enqueueing any successor whose last
    /// predecessor just cleared.
    pub fn mark_succeeded(&mut self, id: NodeId) {
        for &succ in &self.successors[id] {
            self.remaining_predecessors[succ] -= 1;
            if self.remaining_predecessors[succ] == 0 {
                self.ready.push_back(succ);
            }
        }
    }

    /// Record `id` as failed. Every transitive successor becomes
    /// unreachable; returns their ids so the caller can report them.
    pub fn mark_failed(&mut self, id: NodeId) -> Vec<NodeId> {
        let mut skipped = Vec::new();
        let mut queue: VecDeque<NodeId> = self.successors[id].iter().copied().collect();
        let mut visited: HashSet<NodeId> = HashSet::new();
        while let Some(n) = queue.pop_front() {
            if !visited.insert(n) {
                continue;
            }
            skipped.push(n);
            queue.extend(self.successors[n].iter().copied());
        }
        skipped
    }
}

fn overlaps(a: (i64, i64), b: (i64, i64)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

/// Merge adjacent (`prev.end == next.start`) spans in an already-sorted
/// list back into contiguous runs, undoing the per-grain enumeration of
/// `IntervalSet::missing` so `split_batch` can regroup by `batch_size`.
fn coalesce_runs(spans: Vec<(i64, i64)>) -> Vec<(i64, i64)> {
    let mut out: Vec<(i64, i64)> = Vec::with_capacity(spans.len());
    for (s, e) in spans {
        if let Some(last) = out.last_mut() {
            if last.1 == s {
                last.1 = e;
                continue;
            }
        }
        out.push((s, e));
    }
    out
}

/// Split a contiguous missing run into dispatchable batches: `batch_size`
/// grain units each, or a single grain unit per batch when unset.
fn split_batch(start: i64, end: i64, grain_ms: i64, batch_size: Option<i64>) -> Vec<(i64, i64)> {
    let step = match batch_size {
        Some(batch_size) => (grain_ms * batch_size).max(grain_ms),
        None => grain_ms,
    };
    let mut batches = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = (cursor + step).min(end);
        batches.push((cursor, next));
        cursor = next;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::{Fingerprint, Fingerprints};
    use crate::interval::IntervalSet;
    use crate::model::kind::ModelKind;
    use crate::model::snapshot::{ChangeCategory, SnapshotId, Version};

    fn id(name: &str, seed: u8) -> SnapshotId {
        SnapshotId {
            name: name.to_string(),
            fingerprints: Fingerprints {
                own_data_hash: Fingerprint([seed; 32]),
                data_hash: Fingerprint([seed; 32]),
                metadata_hash: Fingerprint([seed; 32]),
            },
        }
    }

    fn snapshot(name: &str, seed: u8, parents: Vec<SnapshotId>, kind: ModelKind) -> Snapshot {
        Snapshot {
            snapshot_id: id(name, seed),
            kind,
            version: Version(format!("v{seed}")),
            parents,
            change_category: ChangeCategory::Breaking,
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
    fn single_snapshot_one_batch_when_non_incremental() {
        let s = snapshot("a", 1, vec![], ModelKind::Full);
        let dag = BatchDag::build(&[s], 0, 100, 10, None, false);
        assert_eq!(dag.node_count(), 1);
    }

    #[test]
    fn child_depends_on_overlapping_parent_batch() {
        let parent = snapshot("p", 1, vec![], ModelKind::Full);
        let child = snapshot(
            "c",
            2,
            vec![parent.snapshot_id.clone()],
            ModelKind::IncrementalByTime { time_column: "ds".to_string(), lookback: 0 },
        );
        let mut dag = BatchDag::build(&[parent, child], 0, 100, 10, None, false);
        // 1 batch for the non-incremental parent, 10 grain-aligned batches
        // for the incremental child.
        assert_eq!(dag.node_count(), 11);
        let first_ready = dag.pop_ready().unwrap();
        assert!(dag.pop_ready().is_none());
        dag.mark_succeeded(first_ready);
        assert!(dag.pop_ready().is_some());
    }

    #[test]
    fn mark_failed_skips_transitive_successors() {
        let parent = snapshot("p", 1, vec![], ModelKind::Full);
        let child = snapshot(
            "c",
            2,
            vec![parent.snapshot_id.clone()],
            ModelKind::IncrementalByTime { time_column: "ds".to_string(), lookback: 0 },
        );
        let mut dag = BatchDag::build(&[parent, child], 0, 100, 10, None, false);
        let p = dag.pop_ready().unwrap();
        let skipped = dag.mark_failed(p);
        // All 10 of the child's grain-aligned batches overlap the parent's
        // single batch and are skipped transitively.
        assert_eq!(skipped.len(), 10);
    }

    #[test]
    fn view_and_embedded_kinds_are_never_dispatched() {
        let view = snapshot("v", 1, vec![], ModelKind::View);
        let embedded = snapshot("e", 2, vec![], ModelKind::Embedded);
        let dag = BatchDag::build(&[view, embedded], 0, 100, 10, None, false);
        assert!(dag.is_empty());
    }

    #[test]
    fn batch_size_splits_incremental_missing_span() {
        let s = snapshot(
            "a",
            1,
            vec![],
            ModelKind::IncrementalByTime { time_column: "ds".to_string(), lookback: 0 },
        );
        let dag = BatchDag::build(&[s], 0, 100, 10, Some(2), false);
        assert_eq!(dag.node_count(), 5);
    }
}
