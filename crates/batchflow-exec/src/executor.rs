//! The scheduling loop: a Kahn's-algorithm readiness queue driving a
//! `tokio::sync::Semaphore`-bounded worker pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use petgraph::graph::NodeIndex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use batchflow_core::{Concurrency, Dag, ExecOptions, Task, Vertex};

use crate::error::RunError;

/// Runs `dag` to completion under `opts`, or fails with the first vertex
/// error encountered. Already-running vertices finish even after a
/// failure; no new vertex is scheduled once one is recorded.
pub struct Executor;

type VertexOutcome = (NodeIndex, Result<(), batchflow_core::TaskError>);

impl Executor {
    pub async fn run(dag: &Dag, opts: &ExecOptions) -> Result<(), RunError> {
        // Re-validates acyclicity; `Group::build` already checks this, but
        // the executor makes no assumption about how its `Dag` was built.
        dag.toposort()?;

        let permits = match opts.concurrency() {
            Concurrency::Sequential => 1,
            Concurrency::Bounded(n) => n.max(1),
            Concurrency::Unbounded => Semaphore::MAX_PERMITS,
        };
        let semaphore = Arc::new(Semaphore::new(permits));

        let mut in_degree: HashMap<NodeIndex, usize> = dag
            .node_indices()
            .map(|idx| (idx, dag.in_degree(idx)))
            .collect();

        let mut ready: VecDeque<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();

        let mut joinset: JoinSet<VertexOutcome> = JoinSet::new();
        let mut task_vertex: HashMap<tokio::task::Id, NodeIndex> = HashMap::new();
        let mut first_failure: Option<RunError> = None;
        let mut cancelled = false;

        loop {
            if !cancelled {
                // Identifier vertices carry no work; drain them inline and
                // fold their successors straight back into the queue.
                while let Some(&idx) = ready.front() {
                    if matches!(dag.vertex(idx), Vertex::Identifier(_)) {
                        ready.pop_front();
                        if let Vertex::Identifier(id) = dag.vertex(idx) {
                            info!(identifier = %id, "passing");
                        }
                        for succ in dag.successors(idx) {
                            let deg = in_degree.get_mut(&succ).expect("known vertex");
                            *deg -= 1;
                            if *deg == 0 {
                                ready.push_back(succ);
                            }
                        }
                    } else {
                        break;
                    }
                }

                if let Some(idx) = ready.pop_front() {
                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .expect("semaphore is never closed");
                    match dag.vertex(idx).clone() {
                        Vertex::Task(task) => {
                            let handle = joinset.spawn(run_task(idx, task, opts.clone(), permit));
                            task_vertex.insert(handle.id(), idx);
                        }
                        Vertex::Sentinel(sentinel) => {
                            let handle =
                                joinset.spawn(run_sentinel(idx, sentinel, opts.clone(), permit));
                            task_vertex.insert(handle.id(), idx);
                        }
                        Vertex::Identifier(_) => unreachable!("drained above"),
                    }
                    continue;
                }
            }

            match joinset.join_next_with_id().await {
                Some(Ok((task_id, (idx, Ok(()))))) => {
                    task_vertex.remove(&task_id);
                    if !cancelled {
                        for succ in dag.successors(idx) {
                            let deg = in_degree.get_mut(&succ).expect("known vertex");
                            *deg -= 1;
                            if *deg == 0 {
                                ready.push_back(succ);
                            }
                        }
                    }
                }
                Some(Ok((task_id, (idx, Err(err))))) => {
                    task_vertex.remove(&task_id);
                    if first_failure.is_none() {
                        let vertex = dag.vertex(idx).label();
                        warn!(%vertex, error = %err, "vertex failed, cancelling run");
                        first_failure = Some(RunError::VertexFailed {
                            vertex,
                            source: err,
                        });
                    }
                    cancelled = true;
                }
                Some(Err(join_err)) => {
                    let vertex = task_vertex
                        .remove(&join_err.id())
                        .map(|idx| dag.vertex(idx).label())
                        .unwrap_or_else(|| "<unknown vertex>".to_string());
                    if first_failure.is_none() {
                        first_failure = Some(RunError::VertexPanicked {
                            vertex,
                            source: join_err,
                        });
                    }
                    cancelled = true;
                }
                None => break,
            }
        }

        match first_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

async fn run_task(
    idx: NodeIndex,
    task: Arc<dyn Task>,
    opts: ExecOptions,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> VertexOutcome {
    (idx, task.execute(&opts).await)
}

async fn run_sentinel(
    idx: NodeIndex,
    sentinel: batchflow_core::SentinelFn,
    opts: ExecOptions,
    _permit: tokio::sync::OwnedSemaphorePermit,
) -> VertexOutcome {
    (idx, sentinel.call(opts).await)
}
