/*!
The tagged variant representing a model's kind, replacing the duck-typed
dispatch of the source system with an exhaustively-matched enum.
*/

use serde::{Deserialize, Serialize};

/// A model's kind, and the kind-specific parameters that affect scheduling
/// and physical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModelKind {
    /// Rebuilt wholesale on every run; has at most one interval batch.
    Full,
    /// Incremental by a time column; scheduled as one batch per grain step
    /// within the missing range.
    IncrementalByTime {
        /// The column used to filter each batch's time window.
        time_column: String,
        /// How far back of `now` a batch is allowed to look, in grain units.
        lookback: u32,
    },
    /// A SQL view with no physical backing table of its own.
    View,
    /// Defined inline and never independently scheduled.
    Embedded,
    /// A static seed loaded once; behaves like `Full` for scheduling purposes.
    Seed,
}

impl ModelKind {
    /// A small stable discriminant used as fingerprint input.
    pub fn discriminant(&self) -> u8 {
        match self {
            ModelKind::Full => 0,
            ModelKind::IncrementalByTime { .. } => 1,
            ModelKind::View => 2,
            ModelKind::Embedded => 3,
            ModelKind::Seed => 4,
        }
    }

    /// Render the kind-specific parameters that affect physical output, for
    /// folding into `data_hash`. Parameters that are purely cosmetic (e.g. a
    /// cron string used only for trigger timing) are deliberately excluded.
    pub fn data_affecting_params(&self) -> String {
        match self {
            ModelKind::IncrementalByTime {
                time_column,
                lookback,
            } => format!("{time_column}:{lookback}"),
            _ => String::new(),
        }
    }

    /// Whether this kind is scheduled incrementally (one batch per grain
    /// step) as opposed to atomically (a single batch per run).
    pub fn is_incremental(&self) -> bool {
        matches!(self, ModelKind::IncrementalByTime { .. })
    }

    /// Whether this kind has any physical backing table that the scheduler
    /// and `SnapshotEvaluator` need to materialize.
    pub fn is_materialized(&self) -> bool {
        !matches!(self, ModelKind::View | ModelKind::Embedded)
    }
}
