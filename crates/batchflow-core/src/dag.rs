//! The DAG vertex model and the graph `Task::build` assembles into.
//!
//! Three vertex kinds: a named artifact, a task, or a bare sentinel
//! callback used for group-level lifecycle hooks.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::Direction;

use crate::error::BuildError;
use crate::task::{SentinelFn, Task, TaskId};
use crate::ArtifactId;

/// A node in the task graph.
#[derive(Clone)]
pub enum Vertex {
    /// A named artifact: either produced by a `Task` vertex or supplied
    /// externally.
    Identifier(ArtifactId),
    /// A unit of work.
    Task(Arc<dyn Task>),
    /// A bare callback with no artifacts, used for `Group` start/end hooks.
    Sentinel(SentinelFn),
}

impl Vertex {
    pub fn key(&self) -> VertexKey {
        match self {
            Vertex::Identifier(id) => VertexKey::Identifier(id.clone()),
            Vertex::Task(task) => VertexKey::Task(task.id()),
            Vertex::Sentinel(s) => VertexKey::Sentinel(s.id()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Vertex::Identifier(id) => id.clone(),
            Vertex::Task(task) => task.description().to_string(),
            Vertex::Sentinel(s) => format!("sentinel:{}", s.name()),
        }
    }
}

/// Identity key used to deduplicate vertices added more than once (e.g. two
/// tasks both declaring the same input identifier).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VertexKey {
    Identifier(ArtifactId),
    Task(TaskId),
    Sentinel(uuid::Uuid),
}

/// The assembled task graph: vertices plus producer/consumer edges.
///
/// `StableDiGraph` over a plain `DiGraph` because the executor (in
/// `batchflow-exec`) removes satisfied vertices from a working copy as it
/// schedules them, and `StableGraph` keeps indices valid across `remove_node`.
#[derive(Default)]
pub struct Dag {
    graph: StableDiGraph<Vertex, ()>,
    index: HashMap<VertexKey, NodeIndex>,
}

impl Dag {
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Returns the existing vertex for `id`, or creates one.
    pub fn add_identifier(&mut self, id: &ArtifactId) -> NodeIndex {
        let key = VertexKey::Identifier(id.clone());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(Vertex::Identifier(id.clone()));
        self.index.insert(key, idx);
        idx
    }

    /// Returns the existing vertex for `task`, or creates one. Building the
    /// same task instance twice (e.g. it is an input producer for two
    /// different consumers) is not an error; it yields one vertex.
    pub fn add_task(&mut self, task: Arc<dyn Task>) -> NodeIndex {
        let key = VertexKey::Task(task.id());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(Vertex::Task(task));
        self.index.insert(key, idx);
        idx
    }

    pub fn add_sentinel(&mut self, sentinel: SentinelFn) -> NodeIndex {
        let key = VertexKey::Sentinel(sentinel.id());
        if let Some(&idx) = self.index.get(&key) {
            return idx;
        }
        let idx = self.graph.add_node(Vertex::Sentinel(sentinel));
        self.index.insert(key, idx);
        idx
    }

    pub fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) {
        if !self.graph.contains_edge(from, to) {
            self.graph.add_edge(from, to, ());
        }
    }

    pub fn contains_identifier(&self, id: &ArtifactId) -> bool {
        self.index.contains_key(&VertexKey::Identifier(id.clone()))
    }

    pub fn vertex(&self, idx: NodeIndex) -> &Vertex {
        &self.graph[idx]
    }

    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    pub fn predecessors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    pub fn successors(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Outgoing)
    }

    pub fn in_degree(&self, idx: NodeIndex) -> usize {
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .count()
    }

    pub fn remove(&mut self, idx: NodeIndex) {
        if let Some(v) = self.graph.node_weight(idx) {
            self.index.remove(&v.key());
        }
        self.graph.remove_node(idx);
    }

    /// A topological order of all vertices, or the vertex a cycle runs
    /// through.
    pub fn toposort(&self) -> Result<Vec<NodeIndex>, BuildError> {
        toposort(&self.graph, None).map_err(|cycle| BuildError::Cycle {
            vertex: self.graph[cycle.node_id()].label(),
        })
    }

    /// Every identifier vertex with no incoming edge and not declared
    /// external by some task is an unresolved input. Called once after the
    /// whole DAG is built.
    pub fn unresolved_inputs(&self, external_ids: &[ArtifactId]) -> Vec<ArtifactId> {
        self.graph
            .node_indices()
            .filter_map(|idx| match &self.graph[idx] {
                Vertex::Identifier(id) => {
                    let has_producer = self.in_degree(idx) > 0;
                    let is_external = external_ids.iter().any(|e| e == id);
                    (!has_producer && !is_external).then(|| id.clone())
                }
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }
}

/// Shared logic behind every leaf task's `Task::build`: add the task as a
/// vertex, wire each `input_id` in and each `output_id` out.
pub fn build_leaf_vertices(handle: Arc<dyn Task>, dag: &mut Dag) -> Result<(), BuildError> {
    let input_ids = handle.input_ids();
    let output_ids = handle.output_ids();
    let task_idx = dag.add_task(handle);

    for id in &input_ids {
        let id_idx = dag.add_identifier(id);
        dag.add_edge(id_idx, task_idx);
    }
    for id in &output_ids {
        let id_idx = dag.add_identifier(id);
        dag.add_edge(task_idx, id_idx);
    }
    Ok(())
}
