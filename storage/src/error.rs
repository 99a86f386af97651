//! Storage errors.

/// Storage and underlying backend errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic backend failure.
    #[error("storage error: {0}")]
    StorageError(String),

    /// The requested column family is missing from the database.
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),

    /// RocksDB error.
    #[cfg(feature = "rocksdb_storage")]
    #[error("rocksDB error: {0}")]
    RocksDBError(#[from] rocksdb::Error),
}

impl Error {
    /// True for failures a bounded retry may clear (lock contention,
    /// timeouts). Decode and corruption failures are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "rocksdb_storage")]
            Error::RocksDBError(e) => matches!(
                e.kind(),
                rocksdb::ErrorKind::Busy
                    | rocksdb::ErrorKind::TimedOut
                    | rocksdb::ErrorKind::TryAgain
            ),
            _ => false,
        }
    }
}
