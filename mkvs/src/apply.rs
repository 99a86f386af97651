//! Apply and merge: advancing roots by write-log replay.

use std::collections::BTreeMap;

use mkvs_tree::{Hash, LogEntry, Namespace, Root, RootType, WriteLog};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{cache::apply_fingerprint, error::Error, receipt::Receipt, Store};

/// A single apply operation: replay `write_log` against the tree at
/// `(src_round, src_root)` and publish the result as
/// `(dst_round, dst_root)`.
#[derive(Debug, Clone)]
pub struct ApplyOp {
    /// Flavor of the roots involved.
    pub root_type: RootType,
    /// Round of the source root.
    pub src_round: u64,
    /// Source root hash; the empty hash applies against the empty tree.
    pub src_root: Hash,
    /// Round the result is published at.
    pub dst_round: u64,
    /// The root hash the caller expects the replay to produce.
    pub dst_root: Hash,
    /// The edits to replay.
    pub write_log: WriteLog,
}

impl ApplyOp {
    /// A `State`-typed apply, the common case.
    pub fn state(
        src_round: u64,
        src_root: Hash,
        dst_round: u64,
        dst_root: Hash,
        write_log: WriteLog,
    ) -> Self {
        Self {
            root_type: RootType::State,
            src_round,
            src_root,
            dst_round,
            dst_root,
            write_log,
        }
    }
}

/// A single merge operation: apply the union of the write-logs leading
/// from `base` to each of `others` back onto `base`.
#[derive(Debug, Clone)]
pub struct MergeOp {
    /// The common ancestor root hash.
    pub base: Hash,
    /// The diverged root hashes to merge, in arrival order.
    pub others: Vec<Hash>,
}

impl Store {
    /// Applies a write-log, producing a signed receipt for the new root.
    pub fn apply(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        op: ApplyOp,
    ) -> Result<Receipt, Error> {
        let round = op.dst_round;
        let root = self.apply_op(token, namespace, op)?;
        Ok(self.sign_receipt(namespace, round, vec![root]))
    }

    /// Applies a batch of operations targeting one destination round and
    /// signs a single receipt covering every produced root.
    pub fn apply_batch(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        dst_round: u64,
        ops: Vec<ApplyOp>,
    ) -> Result<Vec<Receipt>, Error> {
        if ops.len() > self.cfg.max_apply_ops {
            return Err(Error::LimitReached("too many operations in apply batch"));
        }
        let mut roots = Vec::with_capacity(ops.len());
        for op in ops {
            if op.dst_round != dst_round {
                return Err(Error::Internal(
                    "apply batch mixes destination rounds".into(),
                ));
            }
            roots.push(self.apply_op(token, namespace, op)?);
        }
        Ok(vec![self.sign_receipt(namespace, dst_round, roots)])
    }

    fn apply_op(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        op: ApplyOp,
    ) -> Result<Hash, Error> {
        self.ensure_writable(&namespace)?;
        if op.write_log.len() > self.cfg.max_apply_write_log_entries {
            return Err(Error::LimitReached("write-log has too many entries"));
        }

        let fingerprint = apply_fingerprint(
            &namespace,
            op.src_round,
            &op.src_root,
            op.dst_round,
            &op.dst_root,
        );
        let lock = self.apply_locks.lock_for(fingerprint);
        let _guard = lock.lock();

        let dst = Root {
            namespace,
            version: op.dst_round,
            root_type: op.root_type,
            hash: op.dst_root,
        };
        // A lost race with an identical apply: observe the first result.
        if !self.cfg.insecure_skip_checks && self.db.has_root(&dst)? {
            debug!(
                root = %hex::encode(op.dst_root),
                round = op.dst_round,
                "apply coalesced with an already published root",
            );
            return Ok(op.dst_root);
        }

        let src = Root {
            namespace,
            version: op.src_round,
            root_type: op.root_type,
            hash: op.src_root,
        };
        let mut tree = self
            .root_cache
            .take_or_open(&self.db, &src, token.clone())?;

        let result = (|| {
            tree.apply_write_log(&op.write_log).map_err(Error::from)?;
            let (computed, batch) = tree.commit(op.dst_round).map_err(Error::from)?;
            if !self.cfg.insecure_skip_checks && computed != op.dst_root {
                return Err(Error::HashMismatch {
                    expected: hex::encode(op.dst_root),
                    computed: hex::encode(computed),
                });
            }
            // Canceled applies publish nothing: the batch is simply
            // dropped and a retry with the same fingerprint starts over.
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            let new_root = Root {
                namespace,
                version: op.dst_round,
                root_type: op.root_type,
                hash: computed,
            };
            self.db
                .apply_batch(&new_root, batch, Some((op.src_root, &op.write_log)))?;
            Ok(new_root)
        })();

        match result {
            Ok(new_root) => {
                debug!(
                    root = %hex::encode(new_root.hash),
                    round = new_root.version,
                    entries = op.write_log.len(),
                    "applied write-log",
                );
                self.root_cache.put(new_root, tree);
                Ok(new_root.hash)
            }
            Err(e) => {
                self.note_corruption(&src, &e);
                Err(e)
            }
        }
    }

    /// Merges diverged roots back onto their common ancestor, producing a
    /// signed receipt for the merged root.
    pub fn merge(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        round: u64,
        op: MergeOp,
    ) -> Result<Receipt, Error> {
        let root = self.merge_op(token, namespace, round, op)?;
        Ok(self.sign_receipt(namespace, round, vec![root]))
    }

    /// Merges a batch of operations at one round and signs a single
    /// receipt covering every produced root.
    pub fn merge_batch(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        round: u64,
        ops: Vec<MergeOp>,
    ) -> Result<Vec<Receipt>, Error> {
        if ops.len() > self.cfg.max_apply_ops {
            return Err(Error::LimitReached("too many operations in merge batch"));
        }
        let mut roots = Vec::with_capacity(ops.len());
        for op in ops {
            roots.push(self.merge_op(token, namespace, round, op)?);
        }
        Ok(vec![self.sign_receipt(namespace, round, roots)])
    }

    fn merge_op(
        &self,
        token: &CancellationToken,
        namespace: Namespace,
        round: u64,
        op: MergeOp,
    ) -> Result<Hash, Error> {
        self.ensure_writable(&namespace)?;

        let base = Root {
            namespace,
            version: round,
            root_type: RootType::State,
            hash: op.base,
        };

        // Deterministic application order: sorted by root hash, ties (the
        // stable sort) broken by arrival order.
        let mut others = op.others;
        others.sort();
        others.dedup();

        let mut union: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for other_hash in &others {
            let other = Root {
                hash: *other_hash,
                ..base
            };
            let log = match self.get_diff(token, &base, &other) {
                Ok(log) => log,
                Err(e) => {
                    self.note_corruption(&base, &e);
                    self.note_corruption(&other, &e);
                    return Err(e);
                }
            };
            for entry in log {
                if let Some(existing) = union.get(&entry.key) {
                    if *existing != entry.value {
                        return Err(Error::Internal(format!(
                            "merge conflict on key {}",
                            hex::encode(&entry.key),
                        )));
                    }
                } else {
                    union.insert(entry.key, entry.value);
                }
            }
        }

        let merged_log: WriteLog = union
            .into_iter()
            .map(|(key, value)| LogEntry { key, value })
            .collect();

        let mut tree = self
            .root_cache
            .take_or_open(&self.db, &base, token.clone())?;
        let result = (|| {
            tree.apply_write_log(&merged_log).map_err(Error::from)?;
            let (computed, batch) = tree.commit(round).map_err(Error::from)?;
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            let new_root = Root {
                namespace,
                version: round,
                root_type: RootType::State,
                hash: computed,
            };
            self.db
                .apply_batch(&new_root, batch, Some((op.base, &merged_log)))?;
            Ok(new_root)
        })();

        match result {
            Ok(new_root) => {
                debug!(
                    root = %hex::encode(new_root.hash),
                    round,
                    merged = others.len(),
                    "merged roots",
                );
                self.root_cache.put(new_root, tree);
                Ok(new_root.hash)
            }
            Err(e) => {
                self.note_corruption(&base, &e);
                Err(e)
            }
        }
    }
}
