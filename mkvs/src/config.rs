//! Store configuration.

use std::path::{Path, PathBuf};

/// Choice of persistence engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// LSM-style on-disk engine (RocksDB).
    RocksDb,
    /// In-memory engine for tests and ephemeral stores.
    Memory,
}

impl BackendKind {
    /// Default database file name for the backend.
    pub fn default_db_filename(&self) -> &'static str {
        match self {
            BackendKind::RocksDb => "mkvs_nodedb.rocksdb.db",
            BackendKind::Memory => "",
        }
    }
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Persistence engine to use.
    pub backend: BackendKind,
    /// Directory the database file lives in; ignored by the memory
    /// backend.
    pub db_dir: PathBuf,
    /// Bound on concurrently tracked apply-fingerprint locks.
    pub apply_lock_lru_slots: usize,
    /// Bound on cached open trees.
    pub root_cache_slots: usize,
    /// Disables destination-root verification on apply. Test only.
    pub insecure_skip_checks: bool,
    /// Per-request cap on apply write-log entries.
    pub max_apply_write_log_entries: usize,
    /// Per-batch cap on apply/merge operations.
    pub max_apply_ops: usize,
    /// Per-response cap on nodes recorded into a sync proof.
    pub sync_max_nodes: usize,
    /// Per-response cap on keys returned by a sync operation.
    pub sync_max_keys: u16,
    /// Per-response cap on total proof bytes.
    pub sync_max_bytes: usize,
    /// Bound on retries of transient storage failures.
    pub max_io_retries: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::RocksDb,
            db_dir: PathBuf::from("."),
            apply_lock_lru_slots: 128,
            root_cache_slots: 64,
            insecure_skip_checks: false,
            max_apply_write_log_entries: 100_000,
            max_apply_ops: 16,
            sync_max_nodes: 4096,
            sync_max_keys: 1024,
            sync_max_bytes: 4 << 20,
            max_io_retries: 3,
        }
    }
}

impl StoreConfig {
    /// In-memory configuration rooted nowhere; used by tests.
    pub fn memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// On-disk configuration with the backend's default file name under
    /// `dir`.
    pub fn rocksdb(dir: impl AsRef<Path>) -> Self {
        Self {
            backend: BackendKind::RocksDb,
            db_dir: dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    /// Full path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.db_dir.join(self.backend.default_db_filename())
    }
}
