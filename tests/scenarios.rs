//! End-to-end scenarios exercising `PlanEvaluator::apply` against the
//! in-memory fakes: fresh apply, idempotent reapply, restatement,
//! a breaking upstream change, a dev no_gaps conflict, and a mid-backfill
//! failure that skips its downstream dependent.

use std::collections::HashMap;
use std::sync::Arc;

use sqlmesh_core::evaluator::testing::RecordingSnapshotEvaluator;
use sqlmesh_core::interval::IntervalSet;
use sqlmesh_core::model::kind::ModelKind;
use sqlmesh_core::plan::evaluator::{ApplyOptions, PlanEvaluator};
use sqlmesh_core::plan::PlanBuilder;
use sqlmesh_core::scheduler::CancellationToken;
use sqlmesh_core::snapshot_builder::build_snapshot;
use sqlmesh_core::state_store::memory::InMemoryStateStore;
use sqlmesh_core::state_store::StateStore;
use sqlmesh_core::{CoreError, Model};

fn model(name: &str, sql: &str, kind: ModelKind) -> Model {
    Model {
        name: name.to_string(),
        rendered_sql: sql.to_string(),
        kind,
        parents: vec![],
        schema: vec!["id INT".to_string()],
        owner: None,
        description: None,
        tags: vec![],
        start_date: None,
        forward_only: false,
    }
}

fn incremental(time_column: &str) -> ModelKind {
    ModelKind::IncrementalByTime {
        time_column: time_column.to_string(),
        lookback: 0,
    }
}

fn options() -> ApplyOptions {
    ApplyOptions {
        max_workers: 4,
        default_grain_ms: 1,
    }
}

#[tokio::test]
async fn fresh_production_apply_creates_backfills_and_promotes() {
    let m_a = model("m_a", "select 1", ModelKind::Full);
    let m_b = model("m_b", "select * from m_a", incremental("ds"));

    let snap_a = build_snapshot(&m_a, &[], None, &[], 0, 86_400_000);
    let snap_b = build_snapshot(&m_b, &[snap_a.clone()], None, &[], 0, 86_400_000);

    let plan = PlanBuilder::new(vec![snap_a.clone(), snap_b.clone()], "prod", 0, 3)
        .build(&HashMap::new())
        .unwrap();
    assert_eq!(plan.new_snapshots.len(), 2);
    assert!(plan.requires_backfill());

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let ok = pe.apply(&plan, options(), &CancellationToken::new()).await.unwrap();
    assert!(ok);

    assert_eq!(evaluator.created().len(), 2);
    // 1 atomic batch for the full-kind m_a, 3 daily grain batches for m_b.
    assert_eq!(evaluator.evaluated().len(), 4);
    assert_eq!(evaluator.promoted().len(), 2);

    let env = store.get_environment("prod").await.unwrap().unwrap();
    assert_eq!(env.snapshots.len(), 2);

    let snapshots = store.get_snapshots(None).await.unwrap();
    assert!(snapshots[&snap_a.snapshot_id].paused_ts.is_none());
    assert!(snapshots[&snap_b.snapshot_id].paused_ts.is_none());
}

#[tokio::test]
async fn reapply_same_plan_is_a_no_op_virtual_update() {
    let m_a = model("m_a", "select 1", ModelKind::Full);
    let m_b = model("m_b", "select * from m_a", incremental("ds"));
    let snap_a = build_snapshot(&m_a, &[], None, &[], 0, 86_400_000);
    let snap_b = build_snapshot(&m_b, &[snap_a.clone()], None, &[], 0, 86_400_000);

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let plan1 = PlanBuilder::new(vec![snap_a.clone(), snap_b.clone()], "prod", 0, 3)
        .build(&HashMap::new())
        .unwrap();
    pe.apply(&plan1, options(), &CancellationToken::new()).await.unwrap();

    let existing = store.get_snapshots(None).await.unwrap();
    let snap_a_again = build_snapshot(&m_a, &[], Some(&existing[&snap_a.snapshot_id]), &[], 100, 86_400_000);
    let snap_b_again = build_snapshot(
        &m_b,
        &[snap_a_again.clone()],
        Some(&existing[&snap_b.snapshot_id]),
        &[snap_a.snapshot_id.fingerprints.data_hash],
        100,
        86_400_000,
    );

    let plan2 = PlanBuilder::new(vec![snap_a_again, snap_b_again], "prod", 0, 3)
        .build(&existing)
        .unwrap();
    assert!(plan2.new_snapshots.is_empty());
    assert!(!plan2.requires_backfill());

    let ok = pe.apply(&plan2, options(), &CancellationToken::new()).await.unwrap();
    assert!(ok);

    // No new physical tables, no new batches dispatched.
    assert_eq!(evaluator.created().len(), 2);
    assert_eq!(evaluator.evaluated().len(), 4);

    let (added, removed) = (
        store.get_environment("prod").await.unwrap().unwrap().snapshots.len(),
        0,
    );
    assert_eq!(added, 2);
    assert_eq!(removed, 0);
}

#[tokio::test]
async fn restatement_invalidates_and_rebuilds_only_the_named_model() {
    let m_a = model("m_a", "select 1", ModelKind::Full);
    let m_b = model("m_b", "select * from m_a", incremental("ds"));
    let snap_a = build_snapshot(&m_a, &[], None, &[], 0, 86_400_000);
    let snap_b = build_snapshot(&m_b, &[snap_a.clone()], None, &[], 0, 86_400_000);

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let plan1 = PlanBuilder::new(vec![snap_a.clone(), snap_b.clone()], "prod", 0, 3)
        .build(&HashMap::new())
        .unwrap();
    pe.apply(&plan1, options(), &CancellationToken::new()).await.unwrap();

    let existing = store.get_snapshots(None).await.unwrap();
    let plan2 = PlanBuilder::new(vec![snap_a.clone(), snap_b.clone()], "prod", 1, 2)
        .restatements(["m_b".to_string()])
        .build(&existing)
        .unwrap();
    assert!(plan2.requires_backfill());

    let ok = pe.apply(&plan2, options(), &CancellationToken::new()).await.unwrap();
    assert!(ok);

    // m_a never lost coverage and was never re-evaluated for the restated window.
    assert_eq!(evaluator.evaluated().iter().filter(|(id, _, _)| *id == snap_a.snapshot_id).count(), 1);
    // m_b was re-evaluated exactly once more, for the punched-out window.
    assert_eq!(
        evaluator.evaluated().iter().filter(|(id, s, e)| *id == snap_b.snapshot_id && *s == 1 && *e == 2).count(),
        1
    );

    let snapshots = store.get_snapshots(None).await.unwrap();
    assert_eq!(snapshots[&snap_b.snapshot_id].intervals, IntervalSet::from_spans(vec![(0, 3)]));
}

#[tokio::test]
async fn breaking_parent_change_produces_indirect_breaking_child_and_swaps_both_views() {
    let m_a = model("m_a", "select 1", incremental("ds"));
    let m_b = model("m_b", "select * from m_a", incremental("ds"));
    let snap_a = build_snapshot(&m_a, &[], None, &[], 0, 86_400_000);
    let snap_b = build_snapshot(&m_b, &[snap_a.clone()], None, &[], 0, 86_400_000);

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let plan1 = PlanBuilder::new(vec![snap_a.clone(), snap_b.clone()], "prod", 0, 3)
        .build(&HashMap::new())
        .unwrap();
    pe.apply(&plan1, options(), &CancellationToken::new()).await.unwrap();

    let m_a2 = model("m_a", "select 2", incremental("ds"));
    let snap_a2 = build_snapshot(&m_a2, &[], Some(&snap_a), &[], 10, 86_400_000);
    let snap_b2 = build_snapshot(
        &m_b,
        &[snap_a2.clone()],
        Some(&snap_b),
        &[snap_a.snapshot_id.fingerprints.data_hash],
        10,
        86_400_000,
    );
    assert_ne!(snap_a2.version, snap_a.version);
    assert_eq!(snap_b2.change_category, sqlmesh_core::ChangeCategory::IndirectBreaking);
    assert_ne!(snap_b2.version, snap_b.version);

    let existing = store.get_snapshots(None).await.unwrap();
    let plan2 = PlanBuilder::new(vec![snap_a2.clone(), snap_b2.clone()], "prod", 0, 3)
        .build(&existing)
        .unwrap();
    assert_eq!(plan2.new_snapshots.len(), 2);

    let ok = pe.apply(&plan2, options(), &CancellationToken::new()).await.unwrap();
    assert!(ok);

    let env = store.get_environment("prod").await.unwrap().unwrap();
    let ids: Vec<_> = env.snapshots.iter().map(|i| i.snapshot_id.clone()).collect();
    assert!(ids.contains(&snap_a2.snapshot_id));
    assert!(ids.contains(&snap_b2.snapshot_id));
    assert!(!ids.contains(&snap_a.snapshot_id));
    assert!(!ids.contains(&snap_b.snapshot_id));

    // Prior snapshots remain in the store, just no longer referenced by the environment.
    let all = store.get_snapshots(None).await.unwrap();
    assert!(all.contains_key(&snap_a.snapshot_id));
    assert!(all.contains_key(&snap_b.snapshot_id));

    assert!(evaluator.demoted().iter().any(|(_, id)| *id == snap_a.snapshot_id));
    assert!(evaluator.demoted().iter().any(|(_, id)| *id == snap_b.snapshot_id));
}

#[tokio::test]
async fn dev_promote_with_no_gaps_rejects_an_unbackfilled_new_version() {
    let m = model("m", "select 1", incremental("ds"));
    let snap1 = build_snapshot(&m, &[], None, &[], 0, 86_400_000);

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let plan1 = PlanBuilder::new(vec![snap1.clone()], "dev_x", 0, 10)
        .is_dev(true)
        .build(&HashMap::new())
        .unwrap();
    let ok = pe.apply(&plan1, options(), &CancellationToken::new()).await.unwrap();
    assert!(ok);
    assert_eq!(evaluator.promoted().len(), 1);

    let m2 = model("m", "select 2", incremental("ds"));
    let existing = store.get_snapshots(None).await.unwrap();
    let snap2 = build_snapshot(&m2, &[], Some(&existing[&snap1.snapshot_id]), &[], 5, 86_400_000);
    assert_ne!(snap2.version, snap1.version);

    let plan2 = PlanBuilder::new(vec![snap2.clone()], "dev_x", 0, 10)
        .is_dev(true)
        .no_gaps(true)
        .skip_backfill(true)
        .build(&existing)
        .unwrap();

    let err = pe.apply(&plan2, options(), &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));

    // No additional view was promoted past the first apply.
    assert_eq!(evaluator.promoted().len(), 1);
}

#[tokio::test]
async fn mid_backfill_failure_skips_downstream_and_skips_promotion() {
    let m_a = model("m_a", "select 1", ModelKind::Full);
    let m_b = model("m_b", "select * from m_a", incremental("ds"));
    let m_c = model("m_c", "select * from m_b", incremental("ds"));
    let snap_a = build_snapshot(&m_a, &[], None, &[], 0, 86_400_000);
    let snap_b = build_snapshot(&m_b, &[snap_a.clone()], None, &[], 0, 86_400_000);
    let snap_c = build_snapshot(&m_c, &[snap_b.clone()], None, &[], 0, 86_400_000);

    let evaluator = Arc::new(RecordingSnapshotEvaluator::new());
    // m_b's second daily batch fails.
    evaluator.fail_on(snap_b.snapshot_id.clone(), 1, 2);
    let store = Arc::new(InMemoryStateStore::new(|| 1_000));
    let pe = PlanEvaluator::new(evaluator.clone(), store.clone(), || 1_000);

    let proposed = vec![snap_a.clone(), snap_b.clone(), snap_c.clone()];
    let plan = PlanBuilder::new(proposed, "prod", 0, 3).build(&HashMap::new()).unwrap();

    let ok = pe.apply(&plan, options(), &CancellationToken::new()).await.unwrap();
    assert!(!ok);

    // m_a's single batch and each model's first daily batch committed; m_b's
    // second batch failed; m_b's third batch and m_c's remaining batches were
    // never attempted, skipped as predecessor-failed. Dispatch order among
    // independently-ready nodes isn't guaranteed, so compare as a set.
    let evaluated = evaluator.evaluated();
    assert_eq!(evaluated.len(), 3);
    assert!(evaluated.contains(&(snap_a.snapshot_id.clone(), 0, 3)));
    assert!(evaluated.contains(&(snap_b.snapshot_id.clone(), 0, 1)));
    assert!(evaluated.contains(&(snap_c.snapshot_id.clone(), 0, 1)));

    // Promotion never ran.
    assert!(store.get_environment("prod").await.unwrap().is_none());

    let snapshots = store.get_snapshots(None).await.unwrap();
    assert_eq!(snapshots[&snap_a.snapshot_id].intervals, IntervalSet::from_spans(vec![(0, 3)]));
    assert_eq!(snapshots[&snap_b.snapshot_id].intervals, IntervalSet::from_spans(vec![(0, 1)]));
    assert_eq!(snapshots[&snap_c.snapshot_id].intervals, IntervalSet::from_spans(vec![(0, 1)]));

    // On retry, only the failed batch and its stranded successor are missing.
    assert_eq!(
        snapshots[&snap_b.snapshot_id].missing_intervals(0, 3, 1, false),
        vec![(1, 2), (2, 3)]
    );
}
