//! The single error type a run can fail with: either the DAG itself was
//! malformed, or some vertex's execution raised.

use batchflow_core::{BuildError, TaskError};

/// Top-level error `Executor::run` returns. Wraps the offending vertex's
/// own error with the vertex's human-readable label, the enrichment the
/// source achieves by reading a failing function's source text.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("DAG is not executable: {0}")]
    Build(#[from] BuildError),

    #[error("{vertex} failed: {source}")]
    VertexFailed {
        vertex: String,
        #[source]
        source: TaskError,
    },

    #[error("{vertex} panicked")]
    VertexPanicked {
        vertex: String,
        #[source]
        source: tokio::task::JoinError,
    },
}
