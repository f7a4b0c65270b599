//! Error taxonomy for task construction, DAG assembly, and backend I/O.
//!
//! Mirrors the shape of [`crate::task::TaskError`] enriched errors that the
//! executor raises, but these three are the ones tasks and storages raise
//! themselves, before the executor ever gets involved.

use crate::task::TaskDescription;

/// An invariant on `input_ids`/`output_ids`, or an element-type assertion,
/// was violated. Always fatal, raised at task construction or at
/// element-count assertion time.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("{task}: input_ids and output_ids overlap on {overlapping:?}")]
    OverlappingIds {
        task: TaskDescription,
        overlapping: Vec<String>,
    },

    #[error("{task}: duplicate id {id:?} in {field}")]
    DuplicateId {
        task: TaskDescription,
        field: &'static str,
        id: String,
    },

    #[error("{task}: external_input_ids must be a subset of input_ids, found {id:?}")]
    ExternalNotInput { task: TaskDescription, id: String },

    #[error("{task}: transform returned {actual} outputs, expected {expected}")]
    OutputCountMismatch {
        task: TaskDescription,
        expected: usize,
        actual: usize,
    },

    #[error("{0}: identifier {1:?} must not contain '.'")]
    ReservedCharacter(TaskDescription, String),

    #[error("{task}: sqls() keys {actual:?} do not match output_ids {expected:?}")]
    SqlKeysMismatch {
        task: TaskDescription,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// DAG assembly inconsistency: a missing producer for a declared output, or
/// a cycle. Fatal at `build`.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{group}: declared output {missing:?} is produced by no child")]
    MissingOutput { group: String, missing: String },

    #[error("building {task} failed: {source}")]
    ChildFailed {
        task: TaskDescription,
        #[source]
        source: Box<BuildError>,
    },

    #[error("DAG contains a cycle through vertex {vertex:?}")]
    Cycle { vertex: String },

    #[error("vertex {0:?} has no producer and is not declared external")]
    UnresolvedInput(String),
}

/// I/O, auth, quota, or not-found failure from a storage or RDB backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("io error on {key:?}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("authentication failed for {key:?}")]
    Auth { key: String },

    #[error("quota exceeded while writing {key:?}")]
    Quota { key: String },

    #[error("{key:?} not found")]
    NotFound { key: String },

    #[error("sql execution failed: {0}")]
    Sql(#[from] anyhow::Error),
}
