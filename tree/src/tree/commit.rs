//! Hash computation and batch extraction for dirty subtrees.

use std::mem;

use ed::Encode;

use crate::{
    error::Error,
    tree::{
        hash::{self, Hash},
        Node, NodeSource, Pointer, Tree,
    },
};

/// Freshly hashed nodes in `(hash, full encoding)` form, ready to be
/// persisted in a single write batch.
pub type NodeBatch = Vec<(Hash, Vec<u8>)>;

impl<S: NodeSource> Tree<S> {
    /// Recomputes hashes over every dirty node, stamping them with
    /// `version`, and returns the new root hash together with the batch of
    /// nodes to persist.
    ///
    /// After a successful commit the in-memory tree is clean; if the
    /// returned batch then fails to persist, the handle must be discarded.
    pub fn commit(&mut self, version: u64) -> Result<(Hash, NodeBatch), Error> {
        let mut batch = NodeBatch::new();
        let root_hash = commit_ptr(&mut self.root, version, &mut batch)?;
        Ok((root_hash, batch))
    }
}

fn commit_ptr(ptr: &mut Pointer, version: u64, batch: &mut NodeBatch) -> Result<Hash, Error> {
    if ptr.is_clean() {
        return Ok(ptr.hash());
    }
    let Pointer::Modified { mut node } = mem::replace(ptr, Pointer::Null) else {
        unreachable!("dirty pointers are always resolved");
    };

    let node_hash = match node.as_mut() {
        Node::Leaf(leaf) => {
            leaf.version = version;
            hash::hash_leaf(leaf)
        }
        Node::Internal(n) => {
            n.version = version;
            let leaf_hash = commit_ptr(&mut n.leaf, version, batch)?;
            let left_hash = commit_ptr(&mut n.left, version, batch)?;
            let right_hash = commit_ptr(&mut n.right, version, batch)?;
            hash::hash_internal(n, &leaf_hash, &left_hash, &right_hash)
        }
    };

    let encoded = node.encode()?;
    batch.push((node_hash, encoded));
    *ptr = Pointer::Loaded {
        hash: node_hash,
        node,
    };
    Ok(node_hash)
}
