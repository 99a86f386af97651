//! Column-oriented persistence backends for the mkvs node database.
//!
//! The node database stores four kinds of records (encoded nodes, root
//! markers, finalized-round lists and cached write-logs); each kind lives
//! in its own column so backends can tune or sweep them independently.
//! [`Database`] is the object-safe surface the store is written against,
//! with a RocksDB implementation for persistent deployments and a
//! B-tree-map implementation for tests and ephemeral stores.

mod error;
mod memory;
#[cfg(feature = "rocksdb_storage")]
mod rocksdb_storage;
mod storage;

pub use error::Error;
pub use memory::MemoryStorage;
#[cfg(feature = "rocksdb_storage")]
pub use rocksdb_storage::RocksDbStorage;
pub use storage::{Column, Database, WriteBatch, WriteOp};
