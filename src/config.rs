/*!
[SchedulerConfig]: the crate's own tuning surface, loaded by layering
defaults, an optional TOML file, and `SQLMESH_CORE_`-prefixed environment
variables, in that order of increasing precedence.
*/

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Tuning knobs for the [Scheduler](crate::scheduler::Scheduler) and
/// [PlanEvaluator](crate::plan::evaluator::PlanEvaluator). Construct
/// directly for library use, or via [SchedulerConfig::load] to pick up a
/// file/environment override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Bound on concurrently in-flight backfill batches.
    pub max_workers: usize,
    /// Bound on concurrently in-flight `promote`/`demote` DDL calls.
    pub ddl_concurrent_tasks: usize,
    /// Default snapshot TTL, in milliseconds, for unreferenced snapshots.
    pub default_ttl_ms: i64,
    /// Default interval grain, in milliseconds, when a model declares none.
    pub default_grain_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            max_workers: 4,
            ddl_concurrent_tasks: 4,
            default_ttl_ms: 7 * 24 * 60 * 60 * 1000,
            default_grain_ms: 24 * 60 * 60 * 1000,
        }
    }
}

impl SchedulerConfig {
    /// Load configuration by layering, in increasing precedence: built-in
    /// defaults, `path` (if it exists), and `SQLMESH_CORE_*` environment
    /// variables (e.g. `SQLMESH_CORE_MAX_WORKERS=8`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let defaults = SchedulerConfig::default();
        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&defaults)
                .map_err(|e| CoreError::config(format!("building config defaults: {e}")))?,
        );
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("SQLMESH_CORE").try_parsing(true),
        );
        builder
            .build()
            .map_err(|e| CoreError::config(format!("loading scheduler config: {e}")))?
            .try_deserialize()
            .map_err(|e| CoreError::config(format!("parsing scheduler config: {e}")))
    }
}
