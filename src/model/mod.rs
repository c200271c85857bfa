/*!
Classes that model a SQL transformation pipeline: the external [Model]
input, its [kind](kind::ModelKind), the immutable [snapshot](snapshot) it
produces, and the [environment] it can be promoted into.
*/

pub mod environment;
pub mod kind;
pub mod snapshot;

use kind::ModelKind;

/// A named SQL definition, as supplied by the caller. The SQL dialect
/// parser/renderer that produces `rendered_sql` is out of scope for this
/// crate; it is consumed here only as an already-rendered string.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    /// The model's fully-qualified name, unique within a project.
    pub name: String,
    /// The rendered (dialect-resolved) SQL body.
    pub rendered_sql: String,
    /// The model's kind and kind-specific parameters.
    pub kind: ModelKind,
    /// Upstream model names this model selects from.
    pub parents: Vec<String>,
    /// The declared output schema, as column definitions; part of `data_hash`.
    pub schema: Vec<String>,
    /// Owner, used only in `metadata_hash`.
    pub owner: Option<String>,
    /// Description, used only in `metadata_hash`.
    pub description: Option<String>,
    /// Free-form tags, used only in `metadata_hash`.
    pub tags: Vec<String>,
    /// The earliest time this model may be materialized for, if declared.
    pub start_date: Option<i64>,
    /// Whether a breaking change to this model should be treated as
    /// forward-only (new version, but existing intervals are not rebuilt).
    pub forward_only: bool,
}
