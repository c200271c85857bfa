/*!
Content-addressed model versioning, plan evaluation, and backfill
scheduling for SQL transformation pipelines.

This crate is the orchestration core: given a set of model definitions and
their resolved SQL, it fingerprints them into immutable [Snapshot]s,
classifies changes, builds a validated [Plan], and drives that plan through
the Push/Restate/Backfill/Promote phase sequence against a pluggable
[StateStore] and [SnapshotEvaluator]. It has no opinion on SQL dialects,
connection pooling, or how a caller's CLI renders progress — those are
supplied by the host application through the traits in [evaluator] and
[console].
*/

pub mod config;
pub mod console;
pub mod error;
pub mod evaluator;
pub mod fingerprint;
pub mod interval;
pub mod migration;
pub mod model;
pub mod plan;
pub mod scheduler;
pub mod snapshot_builder;
pub mod state_store;
pub mod versions;

pub use config::SchedulerConfig;
pub use console::Console;
pub use error::{CoreError, Result};
pub use evaluator::SnapshotEvaluator;
pub use model::environment::Environment;
pub use model::kind::ModelKind;
pub use model::snapshot::{ChangeCategory, Snapshot, SnapshotId, Version};
pub use model::Model;
pub use plan::evaluator::{ApplyOptions, PlanEvaluator};
pub use plan::{Plan, PlanBuilder};
pub use scheduler::{CancellationToken, Scheduler};
pub use state_store::StateStore;
