/*!
[PlanEvaluator]: executes a validated [Plan] as the four-phase sequence —
Push, Restate, Backfill, Promote — each idempotent on retry.
*/

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::console::{Console, NoopConsole};
use crate::error::Result;
use crate::evaluator::SnapshotEvaluator;
use crate::model::snapshot::Snapshot;
use crate::plan::Plan;
use crate::scheduler::{CancellationToken, Scheduler};
use crate::state_store::StateStore;

/// Configuration for a single [PlanEvaluator::apply] call, mirroring the
/// scheduler tuning surface in [SchedulerConfig](crate::config::SchedulerConfig).
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Bound on concurrently in-flight backfill batches.
    pub max_workers: usize,
    /// Grain used when computing missing intervals for models with no
    /// explicit grain of their own.
    pub default_grain_ms: i64,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        ApplyOptions {
            max_workers: 4,
            default_grain_ms: 24 * 60 * 60 * 1000,
        }
    }
}

/// Drives a validated [Plan] through Push, Restate, Backfill and Promote.
pub struct PlanEvaluator {
    evaluator: Arc<dyn SnapshotEvaluator>,
    store: Arc<dyn StateStore>,
    console: Box<dyn Console>,
    now_ms: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl PlanEvaluator {
    /// Build an evaluator against `evaluator` (the physical warehouse
    /// adapter) and `store` (the state backend). Defaults to a [NoopConsole].
    /// `now` supplies the current time for the promotion cutover recorded by
    /// `unpause_snapshots`; tests typically pass a fixed clock.
    pub fn new(
        evaluator: Arc<dyn SnapshotEvaluator>,
        store: Arc<dyn StateStore>,
        now: impl Fn() -> i64 + Send + Sync + 'static,
    ) -> Self {
        PlanEvaluator {
            evaluator,
            store,
            console: Box::new(NoopConsole),
            now_ms: Box::new(now),
        }
    }

    fn now(&self) -> i64 {
        (self.now_ms)()
    }

    /// Replace the progress sink.
    pub fn with_console(mut self, console: impl Console + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    /// Execute `plan`. Returns `Ok(true)` iff every phase completed
    /// successfully and promotion was applied; `Ok(false)` if the Backfill
    /// phase failed (in which case promotion was never attempted).
    pub async fn apply(&self, plan: &Plan, options: ApplyOptions, cancellation: &CancellationToken) -> Result<bool> {
        self.push(plan).await?;

        if !plan.restatements.is_empty() {
            self.restate(plan).await?;
        }

        if plan.requires_backfill() {
            let ok = self.backfill(plan, options, cancellation).await?;
            if !ok {
                self.console.log_status_update("backfill failed; promotion skipped");
                return Ok(false);
            }
        }

        self.promote(plan).await?;
        self.console.log_success(&format!("plan {} applied to {}", plan.plan_id, plan.environment.name));
        Ok(true)
    }

    /// Phase 1: create physical tables for new snapshots, then push them to
    /// the store. Physical create happens strictly before the state write,
    /// so a mid-failure never leaves a state record without a backing table.
    async fn push(&self, plan: &Plan) -> Result<()> {
        if plan.new_snapshots.is_empty() {
            return Ok(());
        }
        info!(plan = %plan.plan_id, count = plan.new_snapshots.len(), "push: creating new snapshots");
        self.console.log_status_update(&format!("creating {} new snapshot(s)", plan.new_snapshots.len()));

        let parent_ids: Vec<_> = plan
            .new_snapshots
            .iter()
            .flat_map(|s| s.parents.iter().cloned())
            .collect();
        let mut all_snapshots_by_id: HashMap<_, _> = self.store.get_snapshots(Some(&parent_ids)).await?;
        for snapshot in &plan.new_snapshots {
            all_snapshots_by_id.insert(snapshot.snapshot_id.clone(), snapshot.clone());
        }

        self.evaluator.create(&plan.new_snapshots, &all_snapshots_by_id).await?;
        self.store.push_snapshots(plan.new_snapshots.clone()).await?;
        Ok(())
    }

    /// Phase 2: invalidate intervals over `[plan.start, plan.end)` for every
    /// snapshot sharing a name with a restated model.
    async fn restate(&self, plan: &Plan) -> Result<()> {
        info!(plan = %plan.plan_id, models = ?plan.restatements, "restate: invalidating intervals");
        self.console.log_status_update(&format!("restating {} model(s)", plan.restatements.len()));

        let targets: Vec<Snapshot> = if plan.is_dev {
            plan.snapshots
                .iter()
                .filter(|s| plan.restatements.contains(&s.snapshot_id.name))
                .cloned()
                .collect()
        } else {
            let names: Vec<String> = plan.restatements.iter().cloned().collect();
            self.store.get_snapshots_by_models(&names).await?
        };
        let ids: Vec<_> = targets.iter().map(|s| s.snapshot_id.clone()).collect();
        let all_snapshots: HashMap<_, _> = targets.iter().map(|s| (s.snapshot_id.clone(), s.clone())).collect();
        self.store
            .remove_interval(&ids, plan.start, plan.end, Some(&all_snapshots))
            .await
    }

    /// Phase 3: schedule and execute missing backfill batches.
    ///
    /// Re-fetches `plan.snapshots` from the store first: the [Plan] carries
    /// the caller's freshly-built `Snapshot` values, whose `intervals` are
    /// always empty until hydrated, so scheduling straight off them would
    /// see every batch as missing instead of just the genuine gaps (a
    /// restated model's punched-out window, or a brand-new version's full
    /// span). The store is the only source of truth for coverage.
    async fn backfill(&self, plan: &Plan, options: ApplyOptions, cancellation: &CancellationToken) -> Result<bool> {
        info!(plan = %plan.plan_id, "backfill: scheduling missing intervals");
        let ids: Vec<_> = plan.snapshots.iter().map(|s| s.snapshot_id.clone()).collect();
        let hydrated = self.store.get_snapshots(Some(&ids)).await?;
        let scheduling_snapshots: Vec<Snapshot> = plan
            .snapshots
            .iter()
            .map(|s| hydrated.get(&s.snapshot_id).cloned().unwrap_or_else(|| s.clone()))
            .collect();
        let scheduler = Scheduler::new(&scheduling_snapshots, options.max_workers, options.default_grain_ms);
        scheduler
            .run(
                &plan.environment.name,
                plan.start,
                plan.end,
                plan.is_dev,
                self.evaluator.clone(),
                self.store.clone(),
                self.console.as_ref(),
                cancellation,
            )
            .await
    }

    /// Phase 4: promote the environment, migrating reused tables and
    /// unpausing newly added snapshots before repointing views.
    async fn promote(&self, plan: &Plan) -> Result<()> {
        info!(plan = %plan.plan_id, environment = %plan.environment.name, "promote: committing environment");
        self.console.start_promotion_progress(&plan.environment.name, plan.environment.snapshots.len());

        let (added, removed) = self.store.promote(plan.environment.clone(), plan.no_gaps).await?;

        if !plan.is_dev {
            let reused: Vec<Snapshot> = plan
                .snapshots
                .iter()
                .filter(|s| !plan.new_snapshots.iter().any(|n| n.snapshot_id == s.snapshot_id))
                .cloned()
                .collect();
            if !reused.is_empty() {
                self.evaluator.migrate(&reused).await?;
            }

            let added_ids: Vec<_> = added.iter().map(|i| i.snapshot_id.clone()).collect();
            if !added_ids.is_empty() {
                self.store.unpause_snapshots(&added_ids, self.now()).await?;
            }
        }

        let added_snapshots: Vec<Snapshot> = plan
            .snapshots
            .iter()
            .filter(|s| added.iter().any(|i| i.snapshot_id == s.snapshot_id))
            .cloned()
            .collect();
        self.evaluator.promote(&added_snapshots, &plan.environment, plan.is_dev).await?;
        self.console.update_promotion_progress(added_snapshots.len());

        if !removed.is_empty() {
            let removed_snapshots: Vec<Snapshot> = self
                .store
                .get_snapshots(Some(&removed.iter().map(|i| i.snapshot_id.clone()).collect::<Vec<_>>()))
                .await?
                .into_values()
                .collect();
            self.evaluator.demote(&removed_snapshots, &plan.environment).await?;
        }

        self.console.stop_promotion_progress(true);
        Ok(())
    }
}
