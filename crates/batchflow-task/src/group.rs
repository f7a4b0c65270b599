//! `Group`: composition of child tasks and/or sub-groups into a single
//! task whose own body is a nested DAG run.

use std::sync::Arc;

use async_trait::async_trait;
use batchflow_exec::Executor;
use tracing::warn;
use uuid::Uuid;

use batchflow_core::{
    validate_contract, ArtifactId, BuildError, ContractError, Dag, ExecOptions, SentinelFn, Task,
    TaskDescription, TaskError, TaskId,
};

/// A composite task. Its `execute` bypasses the generic `start`/`body`/
/// `end` wrapper: it assembles a DAG from its children plus two
/// synthesised sentinel vertices (`group.start`/`group.end`) and runs it
/// with [`Executor`], so the group's own lifecycle hooks are scheduled at
/// the right point in the child topology rather than wrapped uniformly
/// around a single body call.
pub struct Group {
    id: TaskId,
    name: String,
    input_ids: Vec<ArtifactId>,
    output_ids: Vec<ArtifactId>,
    external_input_ids: Vec<ArtifactId>,
    children: Vec<Arc<dyn Task>>,
    on_start: Option<SentinelFn>,
    on_end: Option<SentinelFn>,
}

impl Group {
    pub fn new(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
        external_input_ids: Vec<ArtifactId>,
        children: Vec<Arc<dyn Task>>,
    ) -> Result<Self, ContractError> {
        Self::with_hooks(
            name,
            input_ids,
            output_ids,
            external_input_ids,
            children,
            None,
            None,
        )
    }

    /// Same as [`Group::new`], but with explicit start/end sentinels —
    /// the construction-time equivalent of overriding a group subclass's
    /// `start`/`end`, used by `MapReduce` to wire its cleanup hook.
    pub fn with_hooks(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
        external_input_ids: Vec<ArtifactId>,
        children: Vec<Arc<dyn Task>>,
        on_start: Option<SentinelFn>,
        on_end: Option<SentinelFn>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let description =
            TaskDescription::new::<Self>(name.clone(), input_ids.clone(), output_ids.clone());
        validate_contract(&description, &external_input_ids)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            input_ids,
            output_ids,
            external_input_ids,
            children,
            on_start,
            on_end,
        })
    }

    /// Identifiers consumed by some child but not declared as this
    /// group's own input: produced and consumed entirely within it.
    pub fn internal_inputs(&self) -> Vec<ArtifactId> {
        let mut seen = Vec::new();
        for child in &self.children {
            for id in child.input_ids() {
                if !self.input_ids.contains(&id) && !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    /// Symmetric to [`Group::internal_inputs`] for outputs.
    pub fn internal_outputs(&self) -> Vec<ArtifactId> {
        let mut seen = Vec::new();
        for child in &self.children {
            for id in child.output_ids() {
                if !self.output_ids.contains(&id) && !seen.contains(&id) {
                    seen.push(id);
                }
            }
        }
        seen
    }

    /// Drops every identifier this group produced and consumed entirely
    /// within itself, asking whichever child declares it an input to drop
    /// it. Per-identifier failures are logged, not propagated: a group's
    /// `end` hook cleaning up is best-effort housekeeping, not part of its
    /// contract.
    pub async fn drop_internal_objs(&self, opts: &ExecOptions) {
        drop_owned(&self.children, &self.internal_inputs(), opts).await;
    }

    fn build_dag(&self) -> Result<Dag, BuildError> {
        let mut dag = Dag::new();
        self.contribute(&mut dag)?;
        Ok(dag)
    }

    fn contribute(&self, dag: &mut Dag) -> Result<(), BuildError> {
        for child in &self.children {
            child
                .build(Some(child.clone()), dag)
                .map_err(|source| BuildError::ChildFailed {
                    task: child.description(),
                    source: Box::new(source),
                })?;
        }

        let start = self
            .on_start
            .clone()
            .unwrap_or_else(|| noop_sentinel(&format!("{}.start", self.name)));
        let end = self
            .on_end
            .clone()
            .unwrap_or_else(|| noop_sentinel(&format!("{}.end", self.name)));

        let start_idx = dag.add_sentinel(start);
        let end_idx = dag.add_sentinel(end);

        for id in &self.input_ids {
            let id_idx = dag.add_identifier(id);
            dag.add_edge(start_idx, id_idx);
        }

        for id in &self.output_ids {
            if !dag.contains_identifier(id) {
                return Err(BuildError::MissingOutput {
                    group: self.name.clone(),
                    missing: id.clone(),
                });
            }
            let id_idx = dag.add_identifier(id);
            dag.add_edge(id_idx, end_idx);
        }

        Ok(())
    }
}

fn noop_sentinel(name: &str) -> SentinelFn {
    SentinelFn::new(name.to_string(), |_opts| async { Ok::<(), TaskError>(()) })
}

/// Drops each of `ids` via whichever of `children` declares it an input,
/// ignoring per-identifier failures. Shared by [`Group::drop_internal_objs`]
/// and by `MapReduce`, which assembles its cleanup hook before the `Group`
/// wrapping it exists.
pub(crate) async fn drop_owned(children: &[Arc<dyn Task>], ids: &[ArtifactId], opts: &ExecOptions) {
    for id in ids {
        for child in children {
            if child.input_ids().iter().any(|i| i == id) {
                if let Err(e) = child.drop_object(id, opts).await {
                    warn!(identifier = %id, error = %e, "failed to drop internal object");
                }
            }
        }
    }
}

#[async_trait]
impl Task for Group {
    fn id(&self) -> TaskId {
        self.id
    }

    fn description(&self) -> TaskDescription {
        TaskDescription::new::<Self>(self.name.clone(), self.input_ids.clone(), self.output_ids.clone())
    }

    fn input_ids(&self) -> Vec<ArtifactId> {
        self.input_ids.clone()
    }

    fn output_ids(&self) -> Vec<ArtifactId> {
        self.output_ids.clone()
    }

    fn external_input_ids(&self) -> Vec<ArtifactId> {
        self.external_input_ids.clone()
    }

    fn build(&self, _handle: Option<Arc<dyn Task>>, dag: &mut Dag) -> Result<(), BuildError> {
        self.contribute(dag)
    }

    async fn body(&self, _opts: &ExecOptions) -> Result<(), TaskError> {
        unreachable!("Group overrides execute instead of body")
    }

    async fn execute(&self, opts: &ExecOptions) -> Result<(), TaskError> {
        let dag = self.build_dag()?;
        Executor::run(&dag, opts)
            .await
            .map_err(|run_err| TaskError::User(run_err.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_core::{build_leaf_vertices, TaskId as CoreTaskId};

    struct NoopTask {
        id: CoreTaskId,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
    }

    impl NoopTask {
        fn new(input_ids: Vec<&str>, output_ids: Vec<&str>) -> Self {
            Self {
                id: Uuid::new_v4(),
                input_ids: input_ids.into_iter().map(String::from).collect(),
                output_ids: output_ids.into_iter().map(String::from).collect(),
            }
        }
    }

    #[async_trait]
    impl Task for NoopTask {
        fn id(&self) -> TaskId {
            self.id
        }

        fn description(&self) -> TaskDescription {
            TaskDescription::new::<Self>("noop".to_string(), self.input_ids.clone(), self.output_ids.clone())
        }

        fn input_ids(&self) -> Vec<ArtifactId> {
            self.input_ids.clone()
        }

        fn output_ids(&self) -> Vec<ArtifactId> {
            self.output_ids.clone()
        }

        fn build(&self, handle: Option<Arc<dyn Task>>, dag: &mut Dag) -> Result<(), BuildError> {
            build_leaf_vertices(handle.expect("handle required"), dag)
        }

        async fn body(&self, _opts: &ExecOptions) -> Result<(), TaskError> {
            Ok(())
        }
    }

    #[test]
    fn group_rejects_missing_output() {
        let child: Arc<dyn Task> = Arc::new(NoopTask::new(vec![], vec!["d"]));
        let group = Group::new("g", vec![], vec!["c".to_string()], vec![], vec![child]).unwrap();
        let err = group.build_dag().unwrap_err();
        assert!(matches!(err, BuildError::MissingOutput { missing, .. } if missing == "c"));
    }

    #[tokio::test]
    async fn group_runs_linear_children() {
        let t1: Arc<dyn Task> = Arc::new(NoopTask::new(vec!["a"], vec!["b"]));
        let group = Group::new("g", vec!["a".to_string()], vec!["b".to_string()], vec![], vec![t1])
            .unwrap();
        group.execute(&ExecOptions::sequential()).await.unwrap();
    }

    #[tokio::test]
    async fn drop_internal_objs_removes_unexported_intermediate() {
        use crate::object_task::{ObjectTaskNode, ObjectTransform};
        use batchflow_storage::{JsonObjectStorage, LocalFileSystem, ObjectStorage};
        use serde::{Deserialize, Serialize};

        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
        struct N(i64);

        struct AddOne;

        #[async_trait]
        impl ObjectTransform for AddOne {
            type Input = N;
            type Output = N;

            async fn transform(&self, inputs: Vec<N>, _opts: &ExecOptions) -> anyhow::Result<Vec<N>> {
                Ok(inputs.into_iter().map(|n| N(n.0 + 1)).collect())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());
        let storage: Arc<JsonObjectStorage<LocalFileSystem, N>> =
            Arc::new(JsonObjectStorage::new(fs.clone()));
        storage.upload("a", N(0)).await.unwrap();

        let t1: Arc<dyn Task> = Arc::new(
            ObjectTaskNode::new(
                "t1",
                vec!["a".to_string()],
                vec!["mid".to_string()],
                vec!["a".to_string()],
                AddOne,
                storage.clone(),
                storage.clone(),
            )
            .unwrap(),
        );
        let t2: Arc<dyn Task> = Arc::new(
            ObjectTaskNode::new(
                "t2",
                vec!["mid".to_string()],
                vec!["b".to_string()],
                vec![],
                AddOne,
                storage.clone(),
                storage.clone(),
            )
            .unwrap(),
        );

        let group = Group::new(
            "g",
            vec!["a".to_string()],
            vec!["b".to_string()],
            vec!["a".to_string()],
            vec![t1, t2],
        )
        .unwrap();

        assert_eq!(group.internal_inputs(), vec!["mid".to_string()]);

        group.execute(&ExecOptions::sequential()).await.unwrap();
        assert!(storage.check_exists("mid").await.unwrap());

        group.drop_internal_objs(&ExecOptions::sequential()).await;

        assert!(!storage.check_exists("mid").await.unwrap());
        assert!(storage.check_exists("a").await.unwrap());
        assert!(storage.check_exists("b").await.unwrap());
    }
}
