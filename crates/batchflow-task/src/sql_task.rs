//! `SqlTask`: execute a set of named `SELECT`s against an in-process RDB,
//! optionally moving tabular data in from and out to a file system first.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use batchflow_core::{
    validate_contract, ArtifactId, BuildError, ContractError, Dag, ExecOptions, Task,
    TaskDescription, TaskError, TaskId,
};
use batchflow_storage::{decode_table, encode_table, FileSystem, Rdb};

/// Produces the mapping from each of a `SqlTaskNode`'s `output_ids` to the
/// `SELECT` that materialises it.
#[async_trait]
pub trait SqlTransform: Send + Sync {
    async fn sqls(&self, opts: &ExecOptions) -> anyhow::Result<HashMap<String, String>>;
}

/// A leaf task whose body is a map of output identifier to `SELECT` text,
/// evaluated against a fresh `R` opened for the duration of one execution
/// (one connection per task invocation, per the concurrency model).
pub struct SqlTaskNode<R, X> {
    id: TaskId,
    name: String,
    input_ids: Vec<ArtifactId>,
    output_ids: Vec<ArtifactId>,
    external_input_ids: Vec<ArtifactId>,
    transform: X,
    input_fs: Option<Arc<dyn FileSystem>>,
    output_fs: Option<Arc<dyn FileSystem>>,
    _rdb: PhantomData<fn() -> R>,
}

impl<R, X> SqlTaskNode<R, X>
where
    R: Rdb + Default + 'static,
    X: SqlTransform,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        input_ids: Vec<ArtifactId>,
        output_ids: Vec<ArtifactId>,
        external_input_ids: Vec<ArtifactId>,
        transform: X,
        input_fs: Option<Arc<dyn FileSystem>>,
        output_fs: Option<Arc<dyn FileSystem>>,
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
            transform,
            input_fs,
            output_fs,
            _rdb: PhantomData,
        })
    }

    async fn run_with_rdb(&self, rdb: &R, opts: &ExecOptions) -> Result<(), TaskError> {
        if let Some(fs) = &self.input_fs {
            for id in &self.input_ids {
                if !fs.check_exists(id).await? {
                    return Err(batchflow_core::BackendError::NotFound { key: id.clone() }.into());
                }
                let bytes = fs.download(id).await?;
                let table = decode_table(id, bytes)?;
                rdb.register(id, table).await?;
            }
        }

        let sqls = self.transform.sqls(opts).await.map_err(TaskError::User)?;

        let mut actual: Vec<String> = sqls.keys().cloned().collect();
        actual.sort();
        let mut expected = self.output_ids.clone();
        expected.sort();
        if actual != expected {
            return Err(ContractError::SqlKeysMismatch {
                task: self.description(),
                expected: self.output_ids.clone(),
                actual: sqls.keys().cloned().collect(),
            }
            .into());
        }

        for id in &self.output_ids {
            let select = &sqls[id];
            match &self.output_fs {
                Some(fs) => {
                    let batches = rdb.sql(&format!("SELECT * FROM ({select})")).await?;
                    let bytes = encode_table(id, &batches)?;
                    fs.upload(id, bytes).await?;
                }
                None => {
                    rdb.execute(&format!("CREATE TABLE {id} AS ({select})")).await?;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl<R, X> Task for SqlTaskNode<R, X>
where
    R: Rdb + Default + 'static,
    X: SqlTransform + 'static,
{
    fn id(&self) -> TaskId {
        self.id
    }

    fn description(&self) -> TaskDescription {
        TaskDescription::new::<Self>(
            self.name.clone(),
            self.input_ids.clone(),
            self.output_ids.clone(),
        )
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
            handle.expect("SqlTaskNode::build requires a handle"),
            dag,
        )
    }

    async fn body(&self, opts: &ExecOptions) -> Result<(), TaskError> {
        let rdb = R::default();
        let result = self.run_with_rdb(&rdb, opts).await;
        if let Err(e) = rdb.close().await {
            warn!(task = %self.name, error = %e, "failed to close RDB cursor");
        } else {
            debug!(task = %self.name, "closed RDB cursor");
        }
        result
    }

    async fn drop_object(&self, id: &ArtifactId, _opts: &ExecOptions) -> Result<(), TaskError> {
        if self.input_ids.iter().any(|i| i == id) {
            if let Some(fs) = &self.input_fs {
                fs.drop_file(id).await?;
            }
        }
        if self.output_ids.iter().any(|o| o == id) {
            if let Some(fs) = &self.output_fs {
                fs.drop_file(id).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use batchflow_storage::{DataFusionRdb, LocalFileSystem};

    fn one_col_batch(values: Vec<i64>) -> batchflow_storage::Table {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Int64, false)]));
        vec![RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()]
    }

    struct DoubleIt;

    #[async_trait]
    impl SqlTransform for DoubleIt {
        async fn sqls(&self, _opts: &ExecOptions) -> anyhow::Result<HashMap<String, String>> {
            Ok(HashMap::from([(
                "doubled".to_string(),
                "SELECT v * 2 AS v FROM source".to_string(),
            )]))
        }
    }

    #[tokio::test]
    async fn round_trips_through_file_system() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());

        let bytes = batchflow_storage::encode_table("source", &one_col_batch(vec![1, 2, 3])).unwrap();
        fs.upload("source", bytes).await.unwrap();

        let task: SqlTaskNode<DataFusionRdb, DoubleIt> = SqlTaskNode::new(
            "double",
            vec!["source".to_string()],
            vec!["doubled".to_string()],
            vec!["source".to_string()],
            DoubleIt,
            Some(fs.clone()),
            Some(fs.clone()),
        )
        .unwrap();

        task.body(&ExecOptions::sequential()).await.unwrap();

        let bytes = fs.download("doubled").await.unwrap();
        let table = batchflow_storage::decode_table("doubled", bytes).unwrap();
        let total_rows: usize = table.iter().map(|b| b.num_rows()).sum();
        assert_eq!(total_rows, 3);
    }

    #[tokio::test]
    async fn sql_keys_must_match_output_ids() {
        struct WrongKeys;

        #[async_trait]
        impl SqlTransform for WrongKeys {
            async fn sqls(&self, _opts: &ExecOptions) -> anyhow::Result<HashMap<String, String>> {
                Ok(HashMap::from([("unexpected".to_string(), "SELECT 1".to_string())]))
            }
        }

        let task: SqlTaskNode<DataFusionRdb, WrongKeys> = SqlTaskNode::new(
            "bad",
            vec![],
            vec!["expected".to_string()],
            vec![],
            WrongKeys,
            None,
            None,
        )
        .unwrap();

        let err = task.body(&ExecOptions::sequential()).await.unwrap_err();
        assert!(matches!(err, TaskError::Contract(ContractError::SqlKeysMismatch { .. })));
    }
}
