//! # batchflow-exec
//!
//! The DAG execution engine: given a built [`batchflow_core::Dag`], runs
//! its vertices in topological waves, either sequentially, on a pool
//! bounded by a counting semaphore, or unbounded, enriching the first
//! failure with the offending vertex's identity and cancelling the rest of
//! the run.

pub mod error;
pub mod executor;

pub use error::RunError;
pub use executor::Executor;
