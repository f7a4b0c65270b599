//! # batchflow-task
//!
//! Concrete task shapes built on the `Task` contract from `batchflow-core`:
//! pure in-memory transforms (`ObjectTaskNode`), ad-hoc SQL over an
//! in-process engine (`SqlTaskNode`), composition of either into a nested
//! DAG (`Group`), and a map/reduce fan-out decorator built from those three.

pub mod group;
pub mod map_reduce;
pub mod object_task;
pub mod sql_task;

pub use group::Group;
pub use map_reduce::MapReduce;
pub use object_task::{ObjectTaskNode, ObjectTransform};
pub use sql_task::{SqlTaskNode, SqlTransform};
