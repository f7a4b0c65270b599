//! `ObjectTask`: pure extract-transform-load over typed object storages.
//!
//! A task's element types are `ObjectTransform`'s associated types, checked
//! at compile time rather than introspected at runtime.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use batchflow_core::{
    validate_contract, ArtifactId, BuildError, Dag, ExecOptions, Task, TaskDescription, TaskError,
    TaskId,
};
use batchflow_storage::ObjectStorage;

/// A pure function from a task's declared input element type to its
/// declared output element type.
#[async_trait]
pub trait ObjectTransform: Send + Sync {
    type Input: Send + Sync;
    type Output: Send + Sync;

    /// Transform `inputs` (one value per `input_id`, in declaration order)
    /// into exactly one output per `output_id`, in declaration order.
    async fn transform(
        &self,
        inputs: Vec<Self::Input>,
        opts: &ExecOptions,
    ) -> anyhow::Result<Vec<Self::Output>>;
}

/// A leaf task wrapping an [`ObjectTransform`] plus the storages it reads
/// from and writes to.
pub struct ObjectTaskNode<T, S, D> {
    id: TaskId,
    name: String,
    input_ids: Vec<ArtifactId>,
    output_ids: Vec<ArtifactId>,
    external_input_ids: Vec<ArtifactId>,
    transform: T,
    input_storage: Arc<S>,
    output_storage: Arc<D>,
}

impl<T, S, D> ObjectTaskNode<T, S, D>
where
    T: ObjectTransform,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
        external_input_ids: Vec<ArtifactId>,
        transform: T,
        input_storage: Arc<S>,
        output_storage: Arc<D>,
    ) -> Result<Self, batchflow_core::ContractError> {
        let name = name.into();
        let description = TaskDescription::new::<Self>(name.clone(), input_ids.clone(), output_ids.clone());
        validate_contract(&description, &external_input_ids)?;
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            input_ids,
            output_ids,
            external_input_ids,
            transform,
            input_storage,
            output_storage,
        })
    }
}

#[async_trait]
impl<T, S, D> Task for ObjectTaskNode<T, S, D>
where
    T: ObjectTransform + 'static,
    S: ObjectStorage<T::Input> + 'static,
    D: ObjectStorage<T::Output> + 'static,
{
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

    fn build(&self, handle: Option<Arc<dyn Task>>, dag: &mut Dag) -> Result<(), BuildError> {
        batchflow_core::build_leaf_vertices(
            handle.expect("ObjectTaskNode::build requires a handle"),
            dag,
        )
    }

    async fn body(&self, opts: &ExecOptions) -> Result<(), TaskError> {
        let mut inputs = Vec::with_capacity(self.input_ids.len());
        for id in &self.input_ids {
            inputs.push(self.input_storage.download(id).await?);
        }

        let outputs = self
            .transform
            .transform(inputs, opts)
            .await
            .map_err(TaskError::User)?;

        if outputs.len() != self.output_ids.len() {
            return Err(batchflow_core::ContractError::OutputCountMismatch {
                task: self.description(),
                expected: self.output_ids.len(),
                actual: outputs.len(),
            }
            .into());
        }

        for (id, value) in self.output_ids.iter().zip(outputs) {
            self.output_storage.upload(id, value).await?;
        }
        Ok(())
    }

    async fn drop_object(&self, id: &ArtifactId, _opts: &ExecOptions) -> Result<(), TaskError> {
        if self.input_ids.iter().any(|i| i == id) {
            self.input_storage.drop(id).await?;
        }
        if self.output_ids.iter().any(|o| o == id) {
            self.output_storage.drop(id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchflow_storage::{JsonObjectStorage, LocalFileSystem};
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

    struct WrongArity;

    #[async_trait]
    impl ObjectTransform for WrongArity {
        type Input = N;
        type Output = N;

        async fn transform(&self, _inputs: Vec<N>, _opts: &ExecOptions) -> anyhow::Result<Vec<N>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn runs_transform_and_uploads_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());
        let input_storage: Arc<JsonObjectStorage<LocalFileSystem, N>> =
            Arc::new(JsonObjectStorage::new(fs.clone()));
        let output_storage: Arc<JsonObjectStorage<LocalFileSystem, N>> =
            Arc::new(JsonObjectStorage::new(fs.clone()));
        input_storage.upload("a", N(41)).await.unwrap();

        let task = ObjectTaskNode::new(
            "add_one",
            vec!["a".to_string()],
            vec!["b".to_string()],
            vec!["a".to_string()],
            AddOne,
            input_storage,
            output_storage.clone(),
        )
        .unwrap();

        task.body(&ExecOptions::sequential()).await.unwrap();
        assert_eq!(output_storage.download("b").await.unwrap(), N(42));
    }

    #[tokio::test]
    async fn output_count_mismatch_is_a_contract_error() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());
        let input_storage: Arc<JsonObjectStorage<LocalFileSystem, N>> =
            Arc::new(JsonObjectStorage::new(fs.clone()));
        let output_storage: Arc<JsonObjectStorage<LocalFileSystem, N>> =
            Arc::new(JsonObjectStorage::new(fs.clone()));
        input_storage.upload("a", N(1)).await.unwrap();

        let task = ObjectTaskNode::new(
            "wrong_arity",
            vec!["a".to_string()],
            vec!["b".to_string()],
            vec![],
            WrongArity,
            input_storage,
            output_storage,
        )
        .unwrap();

        let err = task.body(&ExecOptions::sequential()).await.unwrap_err();
        assert!(matches!(
            err,
            TaskError::Contract(batchflow_core::ContractError::OutputCountMismatch { .. })
        ));
    }
}
