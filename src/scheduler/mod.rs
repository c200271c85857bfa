/*!
The [Scheduler]: turns a snapshot set and a time window into a DAG of
`(snapshot_id, batch_interval)` work items and executes them with bounded
concurrency, honoring dependency order.
*/

pub mod dag;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Semaphore};
use tracing::{debug, info, warn};

use crate::console::Console;
use crate::error::Result;
use crate::evaluator::SnapshotEvaluator;
use crate::model::snapshot::{Snapshot, SnapshotId};
use crate::state_store::StateStore;

use dag::{BatchDag, NodeId};

/// A cooperative cancellation handle. Workers finish their in-flight batch,
/// do not dispatch new work, and `run` returns `Ok(false)`.
#[derive(Clone)]
pub struct CancellationToken(Arc<watch::Sender<bool>>);

impl CancellationToken {
    /// A token that starts un-cancelled.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        CancellationToken(Arc::new(tx))
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.0.subscribe()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes missing `(snapshot, interval)` work and executes it with bounded
/// concurrency, honoring the dependency DAG's ordering constraints.
pub struct Scheduler<'a> {
    snapshots: &'a [Snapshot],
    snapshots_by_id: HashMap<SnapshotId, Snapshot>,
    max_workers: usize,
    batch_size: Option<i64>,
    default_grain_ms: i64,
}

impl<'a> Scheduler<'a> {
    /// Build a scheduler over `snapshots`, bounded to `max_workers`
    /// concurrent batches. `batch_size`, if set, is the maximum number of
    /// grain units per dispatched batch for incremental models.
    pub fn new(snapshots: &'a [Snapshot], max_workers: usize, default_grain_ms: i64) -> Self {
        let snapshots_by_id = snapshots
            .iter()
            .map(|s| (s.snapshot_id.clone(), s.clone()))
            .collect();
        Scheduler {
            snapshots,
            snapshots_by_id,
            max_workers: max_workers.max(1),
            batch_size: None,
            default_grain_ms,
        }
    }

    /// Cap the number of grain units per dispatched batch.
    pub fn with_batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Compute missing work over `[start, end)` and execute it. Returns
    /// `Ok(true)` iff every node succeeded; `Ok(false)` if any node failed,
    /// was skipped due to a failed predecessor, or the run was cancelled.
    ///
    /// `evaluator`/`store` are `Arc`-held so individual batches can run as
    /// genuine `tokio::spawn` tasks rather than borrowing `self` across an await.
    pub async fn run(
        &self,
        environment_name: &str,
        start: i64,
        end: i64,
        is_dev: bool,
        evaluator: Arc<dyn SnapshotEvaluator>,
        store: Arc<dyn StateStore>,
        console: &dyn Console,
        cancellation: &CancellationToken,
    ) -> Result<bool> {
        let dag = BatchDag::build(self.snapshots, start, end, self.default_grain_ms, self.batch_size, is_dev);
        if dag.is_empty() {
            info!(environment = environment_name, "scheduler: nothing to backfill");
            return Ok(true);
        }

        let total = dag.node_count();
        console.log_status_update(&format!("scheduling {total} batches for {environment_name}"));

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let (tx, mut rx) = mpsc::unbounded_channel::<(NodeId, bool)>();
        let mut cancel_rx = cancellation.subscribe();

        let mut dag = dag;
        let mut in_flight = 0usize;
        let mut succeeded = true;
        let mut dispatched = 0usize;
        let mut cancelled = *cancel_rx.borrow();

        loop {
            if cancelled && in_flight == 0 {
                break;
            }

            while !cancelled && in_flight < self.max_workers {
                let Some(node_id) = dag.pop_ready() else { break };
                dispatched += 1;
                in_flight += 1;
                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let node = dag.node(node_id).clone();
                let snapshot = self.snapshots_by_id[&node.snapshot_id].clone();
                let snapshots_by_id = self.snapshots_by_id.clone();
                let tx = tx.clone();
                let evaluator = evaluator.clone();
                let store = store.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    debug!(
                        snapshot = %node.snapshot_id,
                        start = node.start,
                        end = node.end,
                        "dispatching batch"
                    );
                    let result = evaluator
                        .evaluate(&snapshot, node.start, node.end, end, &snapshots_by_id)
                        .await;
                    let ok = match result {
                        Ok(()) => match store.add_interval(&node.snapshot_id, node.start, node.end, is_dev).await {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(snapshot = %node.snapshot_id, error = %e, "add_interval failed after successful evaluate");
                                false
                            }
                        },
                        Err(e) => {
                            warn!(snapshot = %node.snapshot_id, error = %e, "batch evaluation failed");
                            false
                        }
                    };
                    let _ = tx.send((node_id, ok));
                });
            }

            if in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = cancel_rx.changed(), if !cancelled => {
                    warn!("scheduler: cancellation observed, no longer dispatching new batches");
                    cancelled = true;
                }
                Some((node_id, ok)) = rx.recv() => {
                    in_flight -= 1;
                    if ok {
                        dag.mark_succeeded(node_id);
                    } else {
                        succeeded = false;
                        let skipped = dag.mark_failed(node_id);
                        if !skipped.is_empty() {
                            warn!(count = skipped.len(), "scheduler: skipping downstream nodes after failure");
                        }
                    }
                }
            }
        }

        if cancelled {
            succeeded = false;
        } else if dispatched < total {
            // Dependency resolution marked the remainder unreachable.
            succeeded = false;
        }

        console.log_status_update(&format!(
            "scheduler finished for {environment_name}: {dispatched}/{total} batches dispatched"
        ));
        Ok(succeeded)
    }
}
