//! The task contract: the one trait every processing unit in a DAG
//! implements, regardless of whether it wraps an in-memory transform, a SQL
//! statement, or a whole sub-DAG ([`crate::dag::Vertex::Task`] holds these as
//! `Arc<dyn Task>`).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::dag::Dag;
use crate::error::{BackendError, BuildError, ContractError};
use crate::exec_options::ExecOptions;
use crate::ArtifactId;

/// Identity of a task instance. Generated once at construction, never
/// derived from name or position so that two structurally identical tasks
/// (e.g. two `MapReduce` partition clones) remain distinct vertices.
pub type TaskId = Uuid;

/// Human-readable label for error enrichment and logging, built from the
/// concrete type's name rather than by introspecting call stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDescription {
    pub name: String,
    pub type_name: &'static str,
    pub input_ids: Vec<ArtifactId>,
    pub output_ids: Vec<ArtifactId>,
}

impl TaskDescription {
    pub fn new<T: ?Sized>(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
    ) -> Self {
        Self {
            name: name.into(),
            type_name: std::any::type_name::<T>(),
            input_ids,
            output_ids,
        }
    }
}

impl fmt::Display for TaskDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) [{} -> {}]",
            self.name,
            self.type_name,
            self.input_ids.join(","),
            self.output_ids.join(",")
        )
    }
}

/// Errors a task's `start`/`body`/`end` hooks may raise.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Contract(#[from] ContractError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Build(#[from] BuildError),

    /// An uncaught error from user-supplied transform or SQL-building code.
    #[error("{0}")]
    User(#[from] anyhow::Error),
}

/// Shared invariant check behind every task constructor: `input_ids ∩
/// output_ids = ∅`, no duplicates within either list, `external_input_ids
/// ⊆ input_ids`, and no identifier contains `'.'` (reserved for
/// `MapReduce` partition-clone naming).
pub fn validate_contract(description: &TaskDescription, external_input_ids: &[ArtifactId]) -> Result<(), ContractError> {
    let input_ids = &description.input_ids;
    let output_ids = &description.output_ids;

    let overlapping: Vec<String> = input_ids
        .iter()
        .filter(|i| output_ids.contains(i))
        .cloned()
        .collect();
    if !overlapping.is_empty() {
        return Err(ContractError::OverlappingIds {
            task: description.clone(),
            overlapping,
        });
    }

    check_duplicates(input_ids, "input_ids", description)?;
    check_duplicates(output_ids, "output_ids", description)?;

    for id in external_input_ids {
        if !input_ids.contains(id) {
            return Err(ContractError::ExternalNotInput {
                task: description.clone(),
                id: id.clone(),
            });
        }
    }

    for id in input_ids.iter().chain(output_ids.iter()) {
        if id.contains('.') {
            return Err(ContractError::ReservedCharacter(description.clone(), id.clone()));
        }
    }

    Ok(())
}

fn check_duplicates(
    ids: &[ArtifactId],
    field: &'static str,
    description: &TaskDescription,
) -> Result<(), ContractError> {
    let mut seen = std::collections::HashSet::new();
    for id in ids {
        if !seen.insert(id) {
            return Err(ContractError::DuplicateId {
                task: description.clone(),
                field,
                id: id.clone(),
            });
        }
    }
    Ok(())
}

/// A future boxed for storage in a [`SentinelFn`], since a plain `Fn` trait
/// object cannot name an `async fn`'s anonymous return type.
pub type SentinelFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// A bare callback vertex with no artifacts of its own: the `start`/`end`
/// hooks a [`crate::dag::Vertex::Sentinel`] carries for a `Group`'s
/// internal-object cleanup and lifecycle bookkeeping.
#[derive(Clone)]
pub struct SentinelFn {
    id: Uuid,
    name: String,
    func: Arc<dyn Fn(ExecOptions) -> SentinelFuture + Send + Sync>,
}

impl SentinelFn {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(ExecOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            func: Arc::new(move |opts| Box::pin(func(opts))),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn call(&self, opts: ExecOptions) -> Result<(), TaskError> {
        (self.func)(opts).await
    }
}

impl fmt::Debug for SentinelFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SentinelFn")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// The contract every DAG vertex that does work implements: `ObjectTaskNode`
/// and `SqlTaskNode` in `batchflow-task` for leaf work, `Group` for
/// sub-DAGs.
///
/// Object-safe so that `Arc<dyn Task>` can be stored uniformly in
/// [`crate::dag::Vertex::Task`] and in a `Group`'s child list.
#[async_trait]
pub trait Task: Send + Sync {
    /// Stable identity of this instance, used as the DAG vertex key.
    fn id(&self) -> TaskId;

    /// Debug metadata for error enrichment and logging.
    fn description(&self) -> TaskDescription;

    /// Identifiers this task reads, produced by some other vertex in the
    /// same DAG.
    fn input_ids(&self) -> Vec<ArtifactId>;

    /// Identifiers this task produces. Each must be produced by exactly one
    /// task in the DAG.
    fn output_ids(&self) -> Vec<ArtifactId> {
        Vec::new()
    }

    /// Subset of `input_ids` supplied from outside the DAG (no producer
    /// required for these).
    fn external_input_ids(&self) -> Vec<ArtifactId> {
        Vec::new()
    }

    /// Add this task (and any vertices/edges it implies) to `dag`.
    ///
    /// `handle` is an `Arc` to this same task, supplied by the caller
    /// (typically a `Group` iterating its own `Vec<Arc<dyn Task>>`) since a
    /// trait method cannot manufacture an `Arc` around `&self`. Leaf tasks
    /// require it (to add themselves as a `Vertex::Task`); `Group` ignores
    /// it, so the top-level caller of `execute` may pass `None`.
    fn build(&self, handle: Option<Arc<dyn Task>>, dag: &mut Dag) -> Result<(), BuildError>;

    /// Run once before `body`, regardless of concurrency mode. Default:
    /// no-op.
    async fn start(&self, _opts: &ExecOptions) -> Result<(), TaskError> {
        Ok(())
    }

    /// The task's actual work.
    async fn body(&self, opts: &ExecOptions) -> Result<(), TaskError>;

    /// Run once after `body` succeeds. Never run if `body` fails. Default:
    /// no-op.
    async fn end(&self, _opts: &ExecOptions) -> Result<(), TaskError> {
        Ok(())
    }

    /// Remove `id` from whichever storage this task owns it on, if `id` is
    /// one of this task's declared inputs or outputs. Used by
    /// `Group::drop_internal_objs` to clean up identifiers that never leave
    /// the group. Default: no-op, for tasks with no storage of their own.
    async fn drop_object(&self, _id: &ArtifactId, _opts: &ExecOptions) -> Result<(), TaskError> {
        Ok(())
    }

    /// `start` then `body` then `end`, short-circuiting on the first
    /// failure. `Group` overrides this entirely rather than overriding
    /// `body`, since a group's unit of work is a nested DAG run, not a
    /// single body call.
    async fn execute(&self, opts: &ExecOptions) -> Result<(), TaskError> {
        self.start(opts).await?;
        self.body(opts).await?;
        self.end(opts).await?;
        Ok(())
    }
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
