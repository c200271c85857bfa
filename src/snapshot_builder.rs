/*!
Turns a [Model] and its resolved parent snapshots into a new [Snapshot]:
fingerprinting, change-category classification, and version assignment (§4.1).
*/

use crate::fingerprint::{self, Fingerprint};
use crate::interval::IntervalSet;
use crate::model::kind::ModelKind;
use crate::model::snapshot::{ChangeCategory, Snapshot, SnapshotId, Version};
use crate::model::Model;

/// Classify a change relative to the prior snapshot of the same model and
/// its prior parent set. `None` for `prior` means this is the model's first
/// snapshot.
fn classify(
    model: &Model,
    own_data_hash: Fingerprint,
    parent_data_hashes: &[Fingerprint],
    prior: Option<(&Snapshot, &[Fingerprint])>,
) -> ChangeCategory {
    let Some((prior_snapshot, prior_parent_data_hashes)) = prior else {
        return ChangeCategory::Breaking;
    };

    let own_changed = own_data_hash != prior_snapshot.snapshot_id.fingerprints.own_data_hash;
    let parents_changed = parent_data_hashes != prior_parent_data_hashes;

    if !own_changed && !parents_changed {
        return ChangeCategory::NoChange;
    }

    if own_changed {
        if model.forward_only {
            return ChangeCategory::ForwardOnly;
        }
        return if model.kind.is_incremental() {
            ChangeCategory::Breaking
        } else {
            ChangeCategory::NonBreaking
        };
    }

    // Unchanged directly; the only source of a data_hash change left is a
    // parent's data_hash having moved.
    if model.kind.is_incremental() {
        ChangeCategory::IndirectBreaking
    } else {
        ChangeCategory::IndirectNonBreaking
    }
}

/// Build the new [Snapshot] for `model`, given its resolved parent
/// snapshots (in declaration order) and the most recent prior snapshot of
/// the same model, if any.
///
/// `prior_parent_data_hashes` is the parent `data_hash` set the prior
/// snapshot was built against, needed to detect an indirect change even
/// when the parent's own identity (name) hasn't changed.
pub fn build_snapshot(
    model: &Model,
    parents: &[Snapshot],
    prior: Option<&Snapshot>,
    prior_parent_data_hashes: &[Fingerprint],
    now_ms: i64,
    default_ttl_ms: i64,
) -> Snapshot {
    let parent_data_hashes: Vec<Fingerprint> = parents
        .iter()
        .map(|p| p.snapshot_id.fingerprints.data_hash)
        .collect();
    let fingerprints = fingerprint::fingerprint(model, &parent_data_hashes);

    let change_category = classify(
        model,
        fingerprints.own_data_hash,
        &parent_data_hashes,
        prior.map(|p| (p, prior_parent_data_hashes)),
    );

    let version = match (&change_category, prior) {
        (category, Some(prior)) if category.reuses_version() => prior.version.clone(),
        _ => Version(fingerprints.data_hash.short()),
    };

    let earliest_parent_start = parents.iter().filter_map(|p| p.start_date).max();
    let start_date = model.start_date.or(earliest_parent_start);

    Snapshot {
        snapshot_id: SnapshotId {
            name: model.name.clone(),
            fingerprints,
        },
        kind: model.kind.clone(),
        version,
        parents: parents.iter().map(|p| p.snapshot_id.clone()).collect(),
        change_category,
        intervals: IntervalSet::new(),
        dev_intervals: IntervalSet::new(),
        paused_ts: Some(now_ms),
        unpaused_ts: None,
        ttl_ms: default_ttl_ms,
        created_ts: now_ms,
        start_date,
    }
}
