//! Relational backend contract: ad-hoc SQL plus registration of in-memory
//! tables, the way `SqlTaskNode` moves tabular artifacts through a
//! transient in-process engine.
//!
//! `DataFusionRdb` is the shipped implementation, built on
//! `datafusion::SessionContext` — an in-process query engine with no
//! external server to manage.

use std::collections::HashMap;
use std::sync::Arc;

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use datafusion::datasource::MemTable;
use datafusion::execution::context::SessionContext;
use tracing::debug;

use batchflow_core::BackendError;

use crate::Batch;

/// Tabular engine contract. Per the concurrency model, each `SqlTaskNode`
/// invocation opens its own `Rdb` instance rather than sharing one across
/// concurrent tasks.
#[async_trait]
pub trait Rdb: Send + Sync {
    /// Expose `batches` to subsequent SQL under `name`.
    async fn register(&self, name: &str, batches: Vec<Batch>) -> Result<(), BackendError>;

    /// Run a query, returning its result as Arrow record batches.
    async fn sql(&self, query: &str) -> Result<Vec<Batch>, BackendError>;

    /// Run a statement for its side effect (e.g. `CREATE TABLE ... AS`),
    /// discarding any result set.
    async fn execute(&self, statement: &str) -> Result<(), BackendError>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), BackendError>;

    /// Persist current state to a configured durable file system. Only
    /// meaningful for persistent variants; the default is a no-op.
    async fn commit(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Row-oriented view of a query result, the `.df()` counterpart to
/// [`Rdb::sql`]'s columnar `.arrow()` result. Built from Arrow's own
/// `Display`-friendly scalar formatting, not a dataframe library dependency.
pub fn batches_to_rows(batches: &[Batch]) -> Vec<HashMap<String, String>> {
    let mut rows = Vec::new();
    for batch in batches {
        let schema = batch.schema();
        for row_idx in 0..batch.num_rows() {
            let mut row = HashMap::with_capacity(schema.fields().len());
            for (col_idx, field) in schema.fields().iter().enumerate() {
                let cell = batch.column(col_idx).slice(row_idx, 1);
                row.insert(field.name().clone(), format!("{cell:?}"));
            }
            rows.push(row);
        }
    }
    rows
}

/// A `Rdb` backed by an in-process DataFusion `SessionContext`. One
/// instance is meant to live for the duration of a single task execution.
pub struct DataFusionRdb {
    ctx: SessionContext,
}

impl DataFusionRdb {
    pub fn new() -> Self {
        Self {
            ctx: SessionContext::new(),
        }
    }

    fn schema_of(batches: &[Batch]) -> Option<SchemaRef> {
        batches.first().map(|b| b.schema())
    }
}

impl Default for DataFusionRdb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Rdb for DataFusionRdb {
    async fn register(&self, name: &str, batches: Vec<Batch>) -> Result<(), BackendError> {
        let schema = Self::schema_of(&batches)
            .unwrap_or_else(|| Arc::new(arrow_schema::Schema::empty()));
        let table = MemTable::try_new(schema, vec![batches]).map_err(|e| {
            BackendError::Sql(anyhow::anyhow!("registering {name:?}: {e}"))
        })?;
        self.ctx
            .register_table(name, Arc::new(table))
            .map_err(|e| BackendError::Sql(anyhow::anyhow!("registering {name:?}: {e}")))?;
        Ok(())
    }

    async fn sql(&self, query: &str) -> Result<Vec<Batch>, BackendError> {
        debug!(query, "running SQL query");
        let df = self
            .ctx
            .sql(query)
            .await
            .map_err(|e| BackendError::Sql(anyhow::anyhow!(e)))?;
        df.collect()
            .await
            .map_err(|e| BackendError::Sql(anyhow::anyhow!(e)))
    }

    async fn execute(&self, statement: &str) -> Result<(), BackendError> {
        debug!(statement, "running SQL statement");
        let df = self
            .ctx
            .sql(statement)
            .await
            .map_err(|e| BackendError::Sql(anyhow::anyhow!(e)))?;
        df.collect()
            .await
            .map_err(|e| BackendError::Sql(anyhow::anyhow!(e)))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};

    fn one_col_batch(name: &str, values: Vec<i64>) -> Batch {
        let schema = Arc::new(Schema::new(vec![Field::new(name, DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    #[tokio::test]
    async fn register_then_select() {
        let rdb = DataFusionRdb::new();
        rdb.register("t", vec![one_col_batch("a", vec![1, 2, 3])])
            .await
            .unwrap();
        let out = rdb.sql("SELECT sum(a) AS total FROM t").await.unwrap();
        assert_eq!(out[0].column(0).as_ref().len(), 1);
    }

    #[tokio::test]
    async fn create_table_as() {
        let rdb = DataFusionRdb::new();
        rdb.register("src", vec![one_col_batch("a", vec![1, 2])])
            .await
            .unwrap();
        rdb.execute("CREATE TABLE dst AS SELECT * FROM src")
            .await
            .unwrap();
        let out = rdb.sql("SELECT * FROM dst").await.unwrap();
        assert_eq!(out[0].num_rows(), 2);
    }
}
