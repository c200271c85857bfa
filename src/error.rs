/*!
 * Defines the [CoreError] and [Result] types used throughout the crate.
*/

use thiserror::Error;

use crate::interval::Interval;
use crate::model::snapshot::SnapshotId;

/// The crate's error type. Callers dispatch on the variant rather than the message.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid plan inputs: an unknown restatement target, a parent that cannot be
    /// resolved, or any other input validated eagerly at `Plan` construction time.
    #[error("config error: {0}")]
    Config(String),
    /// A write violated an append-only or promotion invariant.
    #[error("conflict: {0}")]
    Conflict(String),
    /// A backfill batch failed while being evaluated by the `SnapshotEvaluator`.
    #[error("execution error evaluating {snapshot_id} over {interval:?}: {source}")]
    Execution {
        /// The snapshot the failing batch belonged to.
        snapshot_id: SnapshotId,
        /// The interval of the failing batch.
        interval: Interval,
        /// The underlying adapter error.
        #[source]
        source: anyhow::Error,
    },
    /// The state store is internally inconsistent, or its schema version does not
    /// match what this build of the core expects.
    #[error("state error: {0}")]
    State(String),
    /// The run was cancelled cooperatively before completion.
    #[error("cancelled")]
    Cancelled,
}

/// The crate's result type.
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Shorthand for [`CoreError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        CoreError::Config(msg.into())
    }

    /// Shorthand for [`CoreError::Conflict`].
    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    /// Shorthand for [`CoreError::State`].
    pub fn state(msg: impl Into<String>) -> Self {
        CoreError::State(msg.into())
    }
}
