//! Typed object storage adapters: map a logical identifier onto a physical
//! key on a [`crate::FileSystem`] or a row inside a [`crate::Rdb`].
//!
//! Element types are asserted statically through the `T` generic parameter
//! rather than checked against a runtime type tag.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use datafusion::parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use datafusion::parquet::arrow::arrow_writer::ArrowWriter;
use serde::de::DeserializeOwned;
use serde::Serialize;

use batchflow_core::BackendError;

use crate::filesystem::FileSystem;
use crate::rdb::Rdb;
use crate::Batch;

/// A logical table: one or more Arrow batches sharing a schema, in order.
pub type Table = Vec<Batch>;

/// Upload/download/check_exists/drop of a typed logical object, keyed by
/// identifier, with the element type asserted statically via `T`.
#[async_trait]
pub trait ObjectStorage<T: Send>: Send + Sync {
    async fn upload(&self, id: &str, value: T) -> Result<(), BackendError>;
    async fn download(&self, id: &str) -> Result<T, BackendError>;
    async fn check_exists(&self, id: &str) -> Result<bool, BackendError>;
    async fn drop(&self, id: &str) -> Result<(), BackendError>;
}

/// JSON-over-`FileSystem`: one `<id>.json` file per identifier.
pub struct JsonObjectStorage<S, T> {
    fs: Arc<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<S, T> JsonObjectStorage<S, T> {
    pub fn new(fs: Arc<S>) -> Self {
        Self {
            fs,
            _marker: PhantomData,
        }
    }

    fn key(id: &str) -> String {
        format!("{id}.json")
    }
}

#[async_trait]
impl<S, T> ObjectStorage<T> for JsonObjectStorage<S, T>
where
    S: FileSystem,
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn upload(&self, id: &str, value: T) -> Result<(), BackendError> {
        let bytes = serde_json::to_vec(&value)
            .map_err(|e| BackendError::Sql(anyhow::anyhow!("encoding {id:?} as json: {e}")))?;
        self.fs.upload(&Self::key(id), bytes).await
    }

    async fn download(&self, id: &str) -> Result<T, BackendError> {
        let bytes = self.fs.download(&Self::key(id)).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| BackendError::Sql(anyhow::anyhow!("decoding {id:?} from json: {e}")))
    }

    async fn check_exists(&self, id: &str) -> Result<bool, BackendError> {
        self.fs.check_exists(&Self::key(id)).await
    }

    async fn drop(&self, id: &str) -> Result<(), BackendError> {
        self.fs.drop_file(&Self::key(id)).await
    }
}

/// Columnar-table-over-`FileSystem`: one `<id>.parquet` file per
/// identifier, written and read with the `datafusion::parquet` Arrow
/// writer/reader.
pub struct TableFileStorage<S> {
    fs: Arc<S>,
}

impl<S> TableFileStorage<S> {
    pub fn new(fs: Arc<S>) -> Self {
        Self { fs }
    }

    fn key(id: &str) -> String {
        format!("{id}.parquet")
    }
}

/// Encodes a [`Table`] as Parquet bytes, the physical format every
/// `FileSystem`-backed table artifact uses, whether written via
/// `TableFileStorage` or via a `SqlTaskNode`'s output file system.
pub fn encode_table(id: &str, value: &Table) -> Result<Vec<u8>, BackendError> {
    let schema = value.first().map(|b| b.schema()).ok_or_else(|| BackendError::Io {
        key: id.to_string(),
        source: std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "cannot persist a table with zero batches",
        ),
    })?;

    let mut buf = Vec::new();
    {
        let mut writer = ArrowWriter::try_new(&mut buf, schema, None)
            .map_err(|e| BackendError::Sql(anyhow::anyhow!("opening parquet writer for {id:?}: {e}")))?;
        for batch in value {
            writer
                .write(batch)
                .map_err(|e| BackendError::Sql(anyhow::anyhow!("writing {id:?}: {e}")))?;
        }
        writer
            .close()
            .map_err(|e| BackendError::Sql(anyhow::anyhow!("closing writer for {id:?}: {e}")))?;
    }
    Ok(buf)
}

/// Decodes Parquet bytes produced by [`encode_table`] back into a [`Table`].
pub fn decode_table(id: &str, bytes: Vec<u8>) -> Result<Table, BackendError> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(bytes::Bytes::from(bytes))
        .map_err(|e| BackendError::Sql(anyhow::anyhow!("opening parquet reader for {id:?}: {e}")))?
        .build()
        .map_err(|e| BackendError::Sql(anyhow::anyhow!("reading {id:?}: {e}")))?;
    reader
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BackendError::Sql(anyhow::anyhow!("reading {id:?}: {e}")))
}

#[async_trait]
impl<S> ObjectStorage<Table> for TableFileStorage<S>
where
    S: FileSystem,
{
    async fn upload(&self, id: &str, value: Table) -> Result<(), BackendError> {
        let bytes = encode_table(id, &value)?;
        self.fs.upload(&Self::key(id), bytes).await
    }

    async fn download(&self, id: &str) -> Result<Table, BackendError> {
        let bytes = self.fs.download(&Self::key(id)).await?;
        decode_table(id, bytes)
    }

    async fn check_exists(&self, id: &str) -> Result<bool, BackendError> {
        self.fs.check_exists(&Self::key(id)).await
    }

    async fn drop(&self, id: &str) -> Result<(), BackendError> {
        self.fs.drop_file(&Self::key(id)).await
    }
}

/// Columnar-table-over-`FileSystem`, keyed by the bare identifier with no
/// suffix. Used where a pipeline stage writes a table through a
/// `FileSystem` directly (as `SqlTaskNode`'s `output_fs` does) and a later
/// stage must read it back through the typed `ObjectStorage` interface
/// instead: both see the same physical key.
pub struct RawTableStorage<S> {
    fs: Arc<S>,
}

impl<S> RawTableStorage<S> {
    pub fn new(fs: Arc<S>) -> Self {
        Self { fs }
    }
}

#[async_trait]
impl<S> ObjectStorage<Table> for RawTableStorage<S>
where
    S: FileSystem,
{
    async fn upload(&self, id: &str, value: Table) -> Result<(), BackendError> {
        let bytes = encode_table(id, &value)?;
        self.fs.upload(id, bytes).await
    }

    async fn download(&self, id: &str) -> Result<Table, BackendError> {
        let bytes = self.fs.download(id).await?;
        decode_table(id, bytes)
    }

    async fn check_exists(&self, id: &str) -> Result<bool, BackendError> {
        self.fs.check_exists(id).await
    }

    async fn drop(&self, id: &str) -> Result<(), BackendError> {
        self.fs.drop_file(id).await
    }
}

/// Columnar-table-over-`Rdb`: the identifier names a table registered
/// directly on the connection, used where a `SqlTaskNode` leaves its
/// output inside the engine instead of materialising it to a file system.
pub struct TableRdbStorage<R> {
    rdb: Arc<R>,
}

impl<R> TableRdbStorage<R> {
    pub fn new(rdb: Arc<R>) -> Self {
        Self { rdb }
    }
}

#[async_trait]
impl<R> ObjectStorage<Table> for TableRdbStorage<R>
where
    R: Rdb,
{
    async fn upload(&self, id: &str, value: Table) -> Result<(), BackendError> {
        self.rdb.register(id, value).await
    }

    async fn download(&self, id: &str) -> Result<Table, BackendError> {
        self.rdb.sql(&format!("SELECT * FROM {id}")).await
    }

    async fn check_exists(&self, id: &str) -> Result<bool, BackendError> {
        match self.rdb.sql(&format!("SELECT * FROM {id} LIMIT 0")).await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    async fn drop(&self, id: &str) -> Result<(), BackendError> {
        match self.rdb.execute(&format!("DROP TABLE IF EXISTS {id}")).await {
            Ok(()) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::LocalFileSystem;
    use crate::rdb::DataFusionRdb;
    use arrow_array::{Int64Array, RecordBatch};
    use arrow_schema::{DataType, Field, Schema};
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Meta {
        rows: usize,
    }

    fn one_col_batch(values: Vec<i64>) -> Batch {
        let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int64, false)]));
        RecordBatch::try_new(schema, vec![Arc::new(Int64Array::from(values))]).unwrap()
    }

    #[tokio::test]
    async fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());
        let storage: JsonObjectStorage<LocalFileSystem, Meta> = JsonObjectStorage::new(fs);
        storage.upload("meta", Meta { rows: 3 }).await.unwrap();
        assert!(storage.check_exists("meta").await.unwrap());
        assert_eq!(storage.download("meta").await.unwrap(), Meta { rows: 3 });
    }

    #[tokio::test]
    async fn table_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let fs = Arc::new(LocalFileSystem::new(dir.path()).await.unwrap());
        let storage = TableFileStorage::new(fs);
        let table = vec![one_col_batch(vec![1, 2, 3])];
        storage.upload("t", table).await.unwrap();
        let back = storage.download("t").await.unwrap();
        assert_eq!(back[0].num_rows(), 3);
    }

    #[tokio::test]
    async fn table_rdb_round_trip() {
        let rdb = Arc::new(DataFusionRdb::new());
        let storage = TableRdbStorage::new(rdb);
        storage.upload("t", vec![one_col_batch(vec![7])]).await.unwrap();
        assert!(storage.check_exists("t").await.unwrap());
        let back = storage.download("t").await.unwrap();
        assert_eq!(back[0].num_rows(), 1);
        storage.drop("t").await.unwrap();
    }
}
