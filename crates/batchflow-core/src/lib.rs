//! # batchflow-core
//!
//! Foundational types for the batchflow task-graph framework: the artifact
//! identifier, the object-safe [`Task`] contract every task shape implements,
//! the DAG vertex model, and the error taxonomy raised during build and
//! execution.
//!
//! Concrete task shapes (`ObjectTask`, `SqlTask`, `Group`) live in
//! `batchflow-task`; concrete storage backends live in `batchflow-storage`.
//! This crate only defines the seams between them.

pub mod dag;
pub mod error;
pub mod exec_options;
pub mod task;

pub use dag::{build_leaf_vertices, Dag, Vertex, VertexKey};
pub use error::{BackendError, BuildError, ContractError};
pub use exec_options::{Concurrency, ExecOptions};
pub use task::{validate_contract, SentinelFn, SentinelFuture, Task, TaskDescription, TaskError, TaskId};

/// Opaque string naming a logical artifact produced by exactly one task.
pub type ArtifactId = String;
