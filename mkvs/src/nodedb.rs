//! The node database: logical record layout over the storage backend.
//!
//! Records, one column each:
//!
//! - `nodes`: `hash -> full node encoding`
//! - `roots`: `namespace || round || type || hash -> ()` (presence marker)
//! - `finalized`: `namespace || round -> [type || hash, ...]`
//! - `writelogs`: `namespace || dst_round || from || to -> write-log`

use std::{sync::Arc, thread, time::Duration};

use byteorder::{BigEndian, ByteOrder};
use mkvs_storage::{Column, Database, WriteBatch};
use mkvs_tree::{
    decode_full, writelog, Hash, Namespace, Node, NodeBatch, Root, RootType, WriteLog, HASH_LENGTH,
};
use tracing::warn;

use crate::error::Error;

/// The node database.
pub struct NodeDb {
    db: Arc<dyn Database>,
    max_io_retries: u32,
}

fn root_key(root: &Root) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 8 + 1 + HASH_LENGTH);
    key.extend_from_slice(&root.namespace);
    let mut round = [0u8; 8];
    BigEndian::write_u64(&mut round, root.version);
    key.extend_from_slice(&round);
    key.push(root.root_type as u8);
    key.extend_from_slice(&root.hash);
    key
}

fn round_prefix(namespace: &Namespace, round: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 8);
    key.extend_from_slice(namespace);
    let mut round_bytes = [0u8; 8];
    BigEndian::write_u64(&mut round_bytes, round);
    key.extend_from_slice(&round_bytes);
    key
}

fn write_log_key(namespace: &Namespace, dst_round: u64, from: &Hash, to: &Hash) -> Vec<u8> {
    let mut key = round_prefix(namespace, dst_round);
    key.extend_from_slice(from);
    key.extend_from_slice(to);
    key
}

fn root_type_from_byte(byte: u8) -> Result<RootType, Error> {
    match byte {
        x if x == RootType::State as u8 => Ok(RootType::State),
        x if x == RootType::Io as u8 => Ok(RootType::Io),
        other => Err(Error::Internal(format!("unknown root type byte {other}"))),
    }
}

/// Decodes a `roots` column key back into a [`Root`].
fn decode_root_key(key: &[u8]) -> Result<Root, Error> {
    if key.len() != 32 + 8 + 1 + HASH_LENGTH {
        return Err(Error::Internal("malformed root marker key".into()));
    }
    let mut namespace: Namespace = [0; 32];
    namespace.copy_from_slice(&key[..32]);
    let version = BigEndian::read_u64(&key[32..40]);
    let root_type = root_type_from_byte(key[40])?;
    let mut hash: Hash = [0; HASH_LENGTH];
    hash.copy_from_slice(&key[41..]);
    Ok(Root {
        namespace,
        version,
        root_type,
        hash,
    })
}

fn encode_finalized(roots: &[(RootType, Hash)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(roots.len() * (1 + HASH_LENGTH));
    for (root_type, hash) in roots {
        out.push(*root_type as u8);
        out.extend_from_slice(hash);
    }
    out
}

fn decode_finalized(bytes: &[u8]) -> Result<Vec<(RootType, Hash)>, Error> {
    if bytes.len() % (1 + HASH_LENGTH) != 0 {
        return Err(Error::Internal("malformed finalized record".into()));
    }
    let mut out = Vec::new();
    for chunk in bytes.chunks(1 + HASH_LENGTH) {
        let root_type = root_type_from_byte(chunk[0])?;
        let mut hash: Hash = [0; HASH_LENGTH];
        hash.copy_from_slice(&chunk[1..]);
        out.push((root_type, hash));
    }
    Ok(out)
}

impl NodeDb {
    /// Creates a node database over the given backend.
    pub fn new(db: Arc<dyn Database>, max_io_retries: u32) -> Self {
        Self { db, max_io_retries }
    }

    /// Runs a storage operation, retrying transient failures with bounded
    /// exponential backoff.
    fn with_retries<T>(
        &self,
        what: &'static str,
        mut op: impl FnMut() -> Result<T, mkvs_storage::Error>,
    ) -> Result<T, mkvs_storage::Error> {
        let mut attempt = 0u32;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_io_retries => {
                    warn!(what, attempt, error = %e, "transient storage error, retrying");
                    thread::sleep(Duration::from_millis(10u64 << attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetches and decodes the node stored under `hash`.
    pub fn get_node(&self, hash: &Hash) -> Result<Node, mkvs_tree::Error> {
        let bytes = self
            .with_retries("get_node", || self.db.get(Column::Nodes, hash))?
            .ok_or_else(|| mkvs_tree::Error::NodeNotFound(hex::encode(hash)))?;
        decode_full(&bytes)
    }

    /// True when the root marker is present (the empty root always is).
    pub fn has_root(&self, root: &Root) -> Result<bool, Error> {
        if root.is_empty() {
            return Ok(true);
        }
        Ok(self
            .with_retries("has_root", || self.db.get(Column::Roots, &root_key(root)))
            .map_err(Error::from)?
            .is_some())
    }

    /// Atomically persists a committed tree: its node batch, the root
    /// marker and, when given, the write-log that produced it.
    pub fn apply_batch(
        &self,
        root: &Root,
        nodes: NodeBatch,
        write_log: Option<(Hash, &WriteLog)>,
    ) -> Result<(), Error> {
        let mut batch = WriteBatch::new();
        for (hash, encoded) in nodes {
            batch.put(Column::Nodes, hash.to_vec(), encoded);
        }
        if !root.is_empty() {
            batch.put(Column::Roots, root_key(root), Vec::new());
        }
        if let Some((from, log)) = write_log {
            let encoded = writelog::encode_write_log(log)
                .map_err(|e| Error::Internal(format!("cannot encode write-log: {e}")))?;
            batch.put(
                Column::WriteLogs,
                write_log_key(&root.namespace, root.version, &from, &root.hash),
                encoded,
            );
        }
        self.db.write(batch).map_err(Error::from)
    }

    /// Looks up a cached write-log between two roots.
    pub fn get_cached_write_log(&self, from: &Root, to: &Root) -> Result<Option<WriteLog>, Error> {
        let key = write_log_key(&to.namespace, to.version, &from.hash, &to.hash);
        let Some(bytes) = self
            .with_retries("get_write_log", || self.db.get(Column::WriteLogs, &key))
            .map_err(Error::from)?
        else {
            return Ok(None);
        };
        writelog::decode_write_log(&bytes)
            .map(Some)
            .map_err(|e| Error::MalformedNode(format!("cached write-log: {e}")))
    }

    /// Caches a computed write-log between two roots.
    pub fn put_cached_write_log(&self, from: &Root, to: &Root, log: &WriteLog) -> Result<(), Error> {
        let key = write_log_key(&to.namespace, to.version, &from.hash, &to.hash);
        let encoded = writelog::encode_write_log(log)
            .map_err(|e| Error::Internal(format!("cannot encode write-log: {e}")))?;
        self.db
            .put(Column::WriteLogs, &key, &encoded)
            .map_err(Error::from)
    }

    /// The finalized root set at `(namespace, round)`, if any.
    pub fn finalized_at(
        &self,
        namespace: &Namespace,
        round: u64,
    ) -> Result<Option<Vec<(RootType, Hash)>>, Error> {
        let key = round_prefix(namespace, round);
        match self.db.get(Column::Finalized, &key).map_err(Error::from)? {
            Some(bytes) => Ok(Some(decode_finalized(&bytes)?)),
            None => Ok(None),
        }
    }

    /// The most recent finalized round for `namespace`.
    pub fn latest_finalized_round(&self, namespace: &Namespace) -> Result<Option<u64>, Error> {
        let mut latest = None;
        for (key, _) in self.db.iter_prefix(Column::Finalized, namespace)? {
            if key.len() == 32 + 8 {
                latest = Some(BigEndian::read_u64(&key[32..40]));
            }
        }
        Ok(latest)
    }

    /// Finalizes `roots` at `(namespace, round)`.
    ///
    /// Idempotent for an identical root set; a conflicting set fails with
    /// [`Error::AlreadyFinalized`]. Root markers at the same round that are
    /// not part of the finalized set are discarded; their nodes fall to the
    /// next prune.
    pub fn finalize(
        &self,
        namespace: &Namespace,
        round: u64,
        roots: &[(RootType, Hash)],
    ) -> Result<(), Error> {
        let mut sorted: Vec<(RootType, Hash)> = roots.to_vec();
        sorted.sort();
        sorted.dedup();
        for pair in sorted.windows(2) {
            if pair[0].0 == pair[1].0 {
                return Err(Error::AlreadyFinalized(round));
            }
        }

        if let Some(existing) = self.finalized_at(namespace, round)? {
            let mut existing_sorted = existing;
            existing_sorted.sort();
            if existing_sorted == sorted {
                return Ok(());
            }
            return Err(Error::AlreadyFinalized(round));
        }

        for (root_type, hash) in &sorted {
            let root = Root {
                namespace: *namespace,
                version: round,
                root_type: *root_type,
                hash: *hash,
            };
            if !self.has_root(&root)? {
                return Err(Error::RootNotFound(hex::encode(hash)));
            }
        }

        let mut batch = WriteBatch::new();
        // Discard speculative roots that lost at this round.
        for (key, _) in self
            .db
            .iter_prefix(Column::Roots, &round_prefix(namespace, round))?
        {
            let marker = decode_root_key(&key)?;
            if !sorted
                .iter()
                .any(|(t, h)| *t == marker.root_type && *h == marker.hash)
            {
                batch.delete(Column::Roots, key);
            }
        }
        batch.put(
            Column::Finalized,
            round_prefix(namespace, round),
            encode_finalized(&sorted),
        );
        self.db.write(batch).map_err(Error::from)
    }

    /// Drops every version of `namespace` strictly below `round` and
    /// garbage-collects nodes unreachable from the surviving roots of any
    /// namespace. Returns the number of nodes removed.
    pub fn prune(&self, namespace: &Namespace, round: u64) -> Result<u64, Error> {
        match self.latest_finalized_round(namespace)? {
            // The latest finalized round must survive the prune.
            Some(latest) if round <= latest => {}
            _ => return Err(Error::VersionNotFound(round)),
        }

        // Mark: every node reachable from a surviving root. Roots of other
        // namespaces survive unconditionally; speculative (unfinalized)
        // roots survive as well.
        let mut reachable = std::collections::HashSet::new();
        let mut batch = WriteBatch::new();
        for (key, _) in self.db.iter_prefix(Column::Roots, &[])? {
            let marker = decode_root_key(&key)?;
            let survives = marker.namespace != *namespace || marker.version >= round;
            if survives {
                self.mark_reachable(&marker.hash, &mut reachable)?;
            } else {
                batch.delete(Column::Roots, key);
            }
        }

        // Sweep unreferenced nodes.
        let mut removed = 0u64;
        for (key, _) in self.db.iter_prefix(Column::Nodes, &[])? {
            if key.len() == HASH_LENGTH {
                let mut hash: Hash = [0; HASH_LENGTH];
                hash.copy_from_slice(&key);
                if !reachable.contains(&hash) {
                    batch.delete(Column::Nodes, key);
                    removed += 1;
                }
            }
        }

        // Drop pruned bookkeeping: finalized lists and cached write-logs of
        // the dropped rounds.
        for column in [Column::Finalized, Column::WriteLogs] {
            for (key, _) in self.db.iter_prefix(column, namespace)? {
                if key.len() >= 40 && BigEndian::read_u64(&key[32..40]) < round {
                    batch.delete(column, key);
                }
            }
        }

        self.db.write(batch).map_err(Error::from)?;
        Ok(removed)
    }

    fn mark_reachable(
        &self,
        hash: &Hash,
        reachable: &mut std::collections::HashSet<Hash>,
    ) -> Result<(), Error> {
        if *hash == mkvs_tree::EMPTY_HASH || !reachable.insert(*hash) {
            return Ok(());
        }
        let node = match self.get_node(hash) {
            Ok(node) => node,
            // Shared subtrees may already be gone for roots that survive
            // only as markers of other namespaces; treat missing nodes as
            // leaves of the reachability walk.
            Err(mkvs_tree::Error::NodeNotFound(_)) => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if let Node::Internal(n) = node {
            // The co-located leaf is stored standalone as well.
            if let Some(leaf) = n.leaf.clean_hash() {
                reachable.insert(leaf);
            }
            if let mkvs_tree::Pointer::Reference { hash } = n.left {
                self.mark_reachable(&hash, reachable)?;
            }
            if let mkvs_tree::Pointer::Reference { hash } = n.right {
                self.mark_reachable(&hash, reachable)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mkvs_storage::MemoryStorage;
    use mkvs_tree::{NullSource, Tree};

    use super::*;

    const NS: Namespace = [7u8; 32];

    fn node_db() -> NodeDb {
        NodeDb::new(Arc::new(MemoryStorage::new()), 0)
    }

    fn commit_pairs(db: &NodeDb, round: u64, pairs: &[(&[u8], &[u8])]) -> Root {
        let mut tree = Tree::empty(NullSource);
        for (key, value) in pairs {
            tree.insert(key, value).unwrap();
        }
        let (hash, batch) = tree.commit(round).unwrap();
        let root = Root {
            namespace: NS,
            version: round,
            root_type: RootType::State,
            hash,
        };
        db.apply_batch(&root, batch, None).unwrap();
        root
    }

    #[test]
    fn node_roundtrip_through_the_database() {
        let db = node_db();
        let root = commit_pairs(&db, 1, &[(b"k", b"v")]);
        assert!(db.has_root(&root).unwrap());

        let node = db.get_node(&root.hash).unwrap();
        assert!(matches!(node, Node::Leaf(_)));

        assert!(matches!(
            db.get_node(&[0xAA; 32]),
            Err(mkvs_tree::Error::NodeNotFound(_)),
        ));
    }

    #[test]
    fn finalize_discards_speculative_roots_at_the_round() {
        let db = node_db();
        let winner = commit_pairs(&db, 1, &[(b"a", b"1")]);
        let loser = commit_pairs(&db, 1, &[(b"b", b"2")]);

        db.finalize(&NS, 1, &[(RootType::State, winner.hash)])
            .unwrap();
        assert!(db.has_root(&winner).unwrap());
        assert!(!db.has_root(&loser).unwrap());
        assert_eq!(
            db.finalized_at(&NS, 1).unwrap(),
            Some(vec![(RootType::State, winner.hash)]),
        );
        assert_eq!(db.latest_finalized_round(&NS).unwrap(), Some(1));
    }

    #[test]
    fn write_log_cache_roundtrip() {
        let db = node_db();
        let from = commit_pairs(&db, 1, &[(b"a", b"1")]);
        let to = commit_pairs(&db, 2, &[(b"a", b"1"), (b"b", b"2")]);

        assert_eq!(db.get_cached_write_log(&from, &to).unwrap(), None);
        let log: WriteLog = vec![mkvs_tree::LogEntry::new(&b"b"[..], &b"2"[..])];
        db.put_cached_write_log(&from, &to, &log).unwrap();
        assert_eq!(db.get_cached_write_log(&from, &to).unwrap(), Some(log));
    }
}
