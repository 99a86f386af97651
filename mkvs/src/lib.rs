//! Versioned, authenticated key-value store for runtime and consensus
//! state.
//!
//! The store keeps Merklized key-value trees per namespace, advances them
//! round by round through atomic write-log applies, serves authenticated
//! remote reads with compact Merkle proofs, and manages the finalize /
//! prune lifecycle over a pluggable node database.

mod apply;
mod cache;
mod checkpoint;
mod config;
mod error;
mod nodedb;
mod receipt;
mod sync;

use std::{collections::HashSet, sync::Arc};

use ed25519_dalek::SigningKey;
use mkvs_storage::{Database, MemoryStorage};
use parking_lot::Mutex;
use tracing::error;

pub use apply::{ApplyOp, MergeOp};
pub use cache::DbSource;
pub use checkpoint::CheckpointStream;
pub use config::{BackendKind, StoreConfig};
pub use error::Error;
pub use mkvs_tree::{
    GetPrefixesRequest, GetRequest, Hash, IterateRequest, LogEntry, Namespace, Proof,
    ProofResponse, ProofVerifier, Root, RootType, Tree, WriteLog, EMPTY_HASH,
};
pub use nodedb::NodeDb;
pub use receipt::{Receipt, RECEIPT_SIGNATURE_CONTEXT};
pub use sync::ReadSync;
pub use tokio_util::sync::CancellationToken;

use cache::{ApplyLocks, RootCache};

/// The storage service: node database, root cache and apply coordination
/// behind the programmatic surface consumed by the execution and
/// consensus collaborators.
pub struct Store {
    cfg: StoreConfig,
    db: Arc<NodeDb>,
    root_cache: RootCache,
    apply_locks: ApplyLocks,
    signer: SigningKey,
    poisoned: Mutex<HashSet<Namespace>>,
}

impl Store {
    /// Creates a store over an already-constructed backend.
    pub fn new(backend: Arc<dyn Database>, signer: SigningKey, cfg: StoreConfig) -> Self {
        let db = Arc::new(NodeDb::new(backend, cfg.max_io_retries));
        Self {
            root_cache: RootCache::new(cfg.root_cache_slots),
            apply_locks: ApplyLocks::new(cfg.apply_lock_lru_slots),
            db,
            signer,
            cfg,
            poisoned: Mutex::new(HashSet::new()),
        }
    }

    /// Opens a store, constructing the backend selected by the
    /// configuration.
    pub fn open(cfg: StoreConfig, signer: SigningKey) -> Result<Self, Error> {
        let backend: Arc<dyn Database> = match cfg.backend {
            BackendKind::RocksDb => Arc::new(
                mkvs_storage::RocksDbStorage::open(cfg.db_path())
                    .map_err(|e| Error::Internal(format!("cannot open node database: {e}")))?,
            ),
            BackendKind::Memory => Arc::new(MemoryStorage::new()),
        };
        Ok(Self::new(backend, signer, cfg))
    }

    /// The node database handle.
    pub fn node_db(&self) -> &Arc<NodeDb> {
        &self.db
    }

    /// Public key receipts from this store are signed with.
    pub fn public_key(&self) -> ed25519_dalek::VerifyingKey {
        self.signer.verifying_key()
    }

    /// True when the store knows `root`.
    pub fn has_root(&self, root: &Root) -> Result<bool, Error> {
        self.db.has_root(root)
    }

    /// Finalizes `roots` at `(namespace, round)`. Idempotent for an
    /// identical root set.
    pub fn finalize(
        &self,
        namespace: Namespace,
        round: u64,
        roots: &[(RootType, Hash)],
    ) -> Result<(), Error> {
        self.ensure_writable(&namespace)?;
        self.db.finalize(&namespace, round, roots)?;
        tracing::debug!(
            namespace = %hex::encode(namespace),
            round,
            roots = roots.len(),
            "finalized round",
        );
        Ok(())
    }

    /// Drops every version of `namespace` strictly below `round`,
    /// returning the number of nodes removed.
    pub fn prune(&self, namespace: Namespace, round: u64) -> Result<u64, Error> {
        self.ensure_writable(&namespace)?;
        let removed = self.db.prune(&namespace, round)?;
        tracing::debug!(
            namespace = %hex::encode(namespace),
            round,
            removed,
            "pruned namespace",
        );
        Ok(removed)
    }

    /// Opens a read-only tree handle at `root`.
    pub fn open_tree(
        &self,
        token: &CancellationToken,
        root: &Root,
    ) -> Result<Tree<DbSource>, Error> {
        if !self.db.has_root(root)? {
            return Err(Error::RootNotFound(hex::encode(root.hash)));
        }
        Ok(Tree::open(
            DbSource::new(self.db.clone(), token.clone()),
            root.hash,
        ))
    }

    pub(crate) fn sign_receipt(
        &self,
        namespace: Namespace,
        round: u64,
        roots: Vec<Hash>,
    ) -> Receipt {
        Receipt::sign(&self.signer, namespace, round, roots)
    }

    /// Fails with `Internal` once corruption disabled writes to the
    /// namespace.
    pub(crate) fn ensure_writable(&self, namespace: &Namespace) -> Result<(), Error> {
        if self.poisoned.lock().contains(namespace) {
            return Err(Error::Internal(format!(
                "namespace {} is disabled after corruption was detected",
                hex::encode(namespace),
            )));
        }
        Ok(())
    }

    /// Latches the corruption state of a namespace when a malformed node
    /// surfaced while reading a supposedly finalized root.
    ///
    /// A malformed node under a speculative (unfinalized) root is the
    /// caller's data problem and must not disable the namespace.
    pub(crate) fn note_corruption(&self, root: &Root, e: &Error) {
        if !matches!(e, Error::MalformedNode(_)) {
            return;
        }
        let finalized = self
            .db
            .finalized_at(&root.namespace, root.version)
            .ok()
            .flatten()
            .map_or(false, |roots| {
                roots
                    .iter()
                    .any(|(t, h)| *t == root.root_type && *h == root.hash)
            });
        if !finalized {
            return;
        }
        error!(
            namespace = %hex::encode(root.namespace),
            root = %hex::encode(root.hash),
            round = root.version,
            error = %e,
            "corrupted node under a finalized root, disabling writes to namespace",
        );
        self.poisoned.lock().insert(root.namespace);
    }
}
