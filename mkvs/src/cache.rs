//! The root cache and apply coordination.
//!
//! Two bounded maps sit in front of the node database: an LRU of recently
//! opened trees keyed by [`Root`], and an LRU of per-fingerprint locks
//! that serializes applies targeting the same destination so duplicate
//! work coalesces. Both maps are touched only inside short critical
//! sections; the fingerprint lock itself is held across the whole apply,
//! outside those sections.

use std::{num::NonZeroUsize, sync::Arc};

use byteorder::{BigEndian, ByteOrder};
use lru::LruCache;
use mkvs_tree::{Hash, Namespace, Node, NodeSource, Root, Tree};
use parking_lot::Mutex;
use sha2::{Digest, Sha512_256};
use tokio_util::sync::CancellationToken;

use crate::{error::Error, nodedb::NodeDb};

/// Node source backed by the node database.
///
/// The cancellation token is checked on every fetch, which makes database
/// reads the tree's cancellation points.
pub struct DbSource {
    db: Arc<NodeDb>,
    token: CancellationToken,
}

impl DbSource {
    pub(crate) fn new(db: Arc<NodeDb>, token: CancellationToken) -> Self {
        Self { db, token }
    }

    pub(crate) fn set_token(&mut self, token: CancellationToken) {
        self.token = token;
    }
}

impl NodeSource for DbSource {
    fn fetch(&self, hash: &Hash) -> Result<Node, mkvs_tree::Error> {
        if self.token.is_cancelled() {
            return Err(mkvs_tree::Error::Canceled);
        }
        self.db.get_node(hash)
    }
}

/// Bounded cache of recently opened trees.
pub(crate) struct RootCache {
    trees: Mutex<LruCache<Root, Tree<DbSource>>>,
}

impl RootCache {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            trees: Mutex::new(LruCache::new(
                NonZeroUsize::new(slots.max(1)).expect("slots is at least one"),
            )),
        }
    }

    /// Takes the cached tree for `root`, or opens it lazily from the node
    /// database. Fails with `RootNotFound` for unknown roots.
    pub(crate) fn take_or_open(
        &self,
        db: &Arc<NodeDb>,
        root: &Root,
        token: CancellationToken,
    ) -> Result<Tree<DbSource>, Error> {
        if let Some(mut tree) = self.trees.lock().pop(root) {
            tree.source_mut().set_token(token);
            return Ok(tree);
        }
        if !db.has_root(root)? {
            return Err(Error::RootNotFound(hex::encode(root.hash)));
        }
        Ok(Tree::open(DbSource::new(db.clone(), token), root.hash))
    }

    /// Returns a clean tree to the cache under its new root.
    pub(crate) fn put(&self, root: Root, tree: Tree<DbSource>) {
        if tree.is_dirty() {
            return;
        }
        self.trees.lock().put(root, tree);
    }
}

/// Bounded table of per-fingerprint apply locks.
pub(crate) struct ApplyLocks {
    locks: Mutex<LruCache<Hash, Arc<Mutex<()>>>>,
}

impl ApplyLocks {
    pub(crate) fn new(slots: usize) -> Self {
        Self {
            locks: Mutex::new(LruCache::new(
                NonZeroUsize::new(slots.max(1)).expect("slots is at least one"),
            )),
        }
    }

    /// Returns the lock for `fingerprint`, installing it if absent.
    ///
    /// Only the map lookup happens under the table lock; the caller locks
    /// the returned handle outside of it. Idle locks are evicted before
    /// busy ones; if every slot is busy the oldest entry is dropped anyway
    /// and duplicate suppression falls back to the published-root check.
    pub(crate) fn lock_for(&self, fingerprint: Hash) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        if let Some(existing) = locks.get(&fingerprint) {
            return existing.clone();
        }

        let cap = locks.cap().get();
        let mut busy = Vec::new();
        while locks.len() + busy.len() >= cap {
            match locks.pop_lru() {
                // A strong count above one means an apply still holds it.
                Some((key, lock)) if Arc::strong_count(&lock) > 1 => busy.push((key, lock)),
                Some(_) => break,
                None => break,
            }
        }
        for (key, lock) in busy {
            locks.put(key, lock);
        }

        let lock = Arc::new(Mutex::new(()));
        locks.put(fingerprint, lock.clone());
        lock
    }
}

/// Fingerprint identifying an apply by its source and destination.
pub(crate) fn apply_fingerprint(
    namespace: &Namespace,
    src_round: u64,
    src_root: &Hash,
    dst_round: u64,
    dst_root: &Hash,
) -> Hash {
    let mut src = [0u8; 8];
    BigEndian::write_u64(&mut src, src_round);
    let mut dst = [0u8; 8];
    BigEndian::write_u64(&mut dst, dst_round);

    let mut hasher = Sha512_256::new();
    hasher.update(namespace);
    hasher.update(src);
    hasher.update(src_root);
    hasher.update(dst);
    hasher.update(dst_root);
    hasher.finalize().into()
}
