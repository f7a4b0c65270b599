//! # batchflow-storage
//!
//! Backend contracts consumed by tasks (`FileSystem` for byte blobs, `Rdb`
//! for ad-hoc SQL over in-memory tables) plus the typed object storage
//! adapters that map a logical identifier onto a physical key on one of
//! those backends.
//!
//! Concrete connectors behind a small set of traits defined once here.

pub mod filesystem;
pub mod object_storage;
pub mod rdb;

pub use filesystem::{FileSystem, LocalFileSystem};
pub use object_storage::{
    decode_table, encode_table, JsonObjectStorage, ObjectStorage, RawTableStorage, Table,
    TableFileStorage, TableRdbStorage,
};
pub use rdb::{DataFusionRdb, Rdb};

/// The tabular payload type every storage and `Rdb` implementation moves:
/// a single Arrow record batch.
pub type Batch = arrow_array::RecordBatch;
