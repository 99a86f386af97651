// MIT LICENSE
//
// Copyright (c) 2021 Dash Core Group
//
// Permission is hereby granted, free of charge, to any
// person obtaining a copy of this software and associated
// documentation files (the "Software"), to deal in the
// Software without restriction, including without
// limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of
// the Software, and to permit persons to whom the Software
// is furnished to do so, subject to the following
// conditions:
//
// The above copyright notice and this permission notice
// shall be included in all copies or substantial portions
// of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF
// ANY KIND, EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED
// TO THE WARRANTIES OF MERCHANTABILITY, FITNESS FOR A
// PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT
// SHALL THE AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY
// CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN ACTION
// OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR
// IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! The compressed binary radix tree.

mod commit;
pub(crate) mod encoding;
pub mod hash;
mod iter;
pub mod key;
mod lookup;
mod ops;

use std::collections::BTreeMap;

pub use commit::NodeBatch;
pub use encoding::{decode_compact, decode_full, encode_compact};
pub use iter::TreeIterator;

use crate::{
    error::Error,
    proofs::{Proof, ProofBuilder, TraversalLimits},
    tree::{
        hash::{Hash, EMPTY_HASH},
        key::Depth,
    },
    writelog::{LogEntry, WriteLog},
};

/// Longest key the tree accepts.
///
/// Depths are 16-bit bit counts; longer keys would overflow them.
pub const MAX_KEY_BYTES: usize = (u16::MAX / 8) as usize;

/// Opaque identifier separating independent logical ledgers within one
/// store.
pub type Namespace = [u8; 32];

/// The semantic flavor of a tree root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RootType {
    /// Runtime or consensus state.
    State = 1,
    /// Per-round input/output artifacts.
    Io = 2,
}

/// A concrete tree state: `(namespace, version, type, hash)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Root {
    /// Namespace the tree belongs to.
    pub namespace: Namespace,
    /// Round (version) at which the root was produced.
    pub version: u64,
    /// Semantic flavor of the tree.
    pub root_type: RootType,
    /// Merkle root hash.
    pub hash: Hash,
}

impl Root {
    /// The empty root for a `(namespace, version, type)` triple.
    pub fn empty(namespace: Namespace, version: u64, root_type: RootType) -> Self {
        Self {
            namespace,
            version,
            root_type,
            hash: EMPTY_HASH,
        }
    }

    /// True when this root designates the empty tree.
    pub fn is_empty(&self) -> bool {
        self.hash == EMPTY_HASH
    }
}

/// A full key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    /// Round at which the leaf was last written.
    pub version: u64,
    /// The full key.
    pub key: Vec<u8>,
    /// The value; may be empty, which is distinct from absent.
    pub value: Vec<u8>,
}

/// A compressed interior node.
///
/// Represents a path of `label_bit_length` bits (left-aligned in `label`,
/// trailing bits masked to zero), an optional co-located leaf whose key
/// ends exactly at this node, and two children reached by consuming one
/// further branch bit (0 = left).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalNode {
    /// Round at which the node was last modified.
    pub version: u64,
    /// Compressed path bits, left-aligned.
    pub label: Vec<u8>,
    /// Number of meaningful bits in `label`.
    pub label_bit_length: Depth,
    /// Co-located leaf; always [`Pointer::Null`] or resolved in memory.
    pub leaf: Pointer,
    /// Subtree of keys whose branch bit is 0.
    pub left: Pointer,
    /// Subtree of keys whose branch bit is 1.
    pub right: Pointer,
}

/// A tree node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Interior node.
    Internal(InternalNode),
    /// Leaf node.
    Leaf(LeafNode),
}

/// Reference to a child node.
///
/// The only way one node refers to another. A pointer either knows just
/// the persisted hash or additionally holds the node in memory; mutating
/// through a pointer turns it [`Pointer::Modified`], which propagates up
/// to the root and is undone by the next commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pointer {
    /// No child.
    Null,
    /// Persisted child known only by hash; fetched from the node source on
    /// demand.
    Reference {
        /// Content hash of the referenced node.
        hash: Hash,
    },
    /// Child mutated since the last hash computation. The hash is stale
    /// and is recomputed by the next commit.
    Modified {
        /// The in-memory node.
        node: Box<Node>,
    },
    /// Child held in memory with an up-to-date hash.
    Loaded {
        /// Content hash of the node.
        hash: Hash,
        /// The in-memory node.
        node: Box<Node>,
    },
}

impl Pointer {
    /// Wraps a freshly created node.
    pub(crate) fn from_node(node: Node) -> Self {
        Pointer::Modified {
            node: Box::new(node),
        }
    }

    /// True for [`Pointer::Null`].
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Pointer::Null)
    }

    /// True when the pointer matches its persisted form.
    #[inline]
    pub fn is_clean(&self) -> bool {
        !matches!(self, Pointer::Modified { .. })
    }

    /// Returns the hash of the referenced node. Absent children hash to
    /// [`EMPTY_HASH`]. Panics for [`Pointer::Modified`] since the hash has
    /// not been recomputed yet.
    #[inline]
    pub fn hash(&self) -> Hash {
        match self {
            Pointer::Null => EMPTY_HASH,
            Pointer::Reference { hash } => *hash,
            Pointer::Loaded { hash, .. } => *hash,
            Pointer::Modified { .. } => panic!("cannot get hash of modified pointer"),
        }
    }

    /// Returns the hash when it is up to date.
    #[inline]
    pub fn clean_hash(&self) -> Option<Hash> {
        match self {
            Pointer::Null => Some(EMPTY_HASH),
            Pointer::Reference { hash } => Some(*hash),
            Pointer::Loaded { hash, .. } => Some(*hash),
            Pointer::Modified { .. } => None,
        }
    }

    /// Returns the in-memory node, if present.
    #[inline]
    pub fn node(&self) -> Option<&Node> {
        match self {
            Pointer::Modified { node } => Some(node),
            Pointer::Loaded { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Returns the in-memory node mutably, if present.
    ///
    /// This does not mark the pointer modified; mutating callers follow up
    /// with [`Pointer::mark_modified`].
    #[inline]
    pub(crate) fn node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Pointer::Modified { node } => Some(node),
            Pointer::Loaded { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Converts a resolved pointer into [`Pointer::Modified`], discarding
    /// the stale hash.
    pub(crate) fn mark_modified(&mut self) {
        let current = std::mem::replace(self, Pointer::Null);
        *self = match current {
            Pointer::Loaded { node, .. } => Pointer::Modified { node },
            other => other,
        };
    }

    /// Splits a resolved pointer into its node and, when clean, its hash.
    pub(crate) fn into_parts(self) -> (Box<Node>, Option<Hash>) {
        match self {
            Pointer::Modified { node } => (node, None),
            Pointer::Loaded { hash, node } => (node, Some(hash)),
            _ => panic!("cannot split an unresolved pointer"),
        }
    }

    /// Inverse of [`Pointer::into_parts`].
    pub(crate) fn reassemble(node: Box<Node>, clean_hash: Option<Hash>) -> Self {
        match clean_hash {
            Some(hash) => Pointer::Loaded { hash, node },
            None => Pointer::Modified { node },
        }
    }

    /// Loads the referenced node from `source` if it is not in memory yet.
    pub(crate) fn resolve<S: NodeSource>(&mut self, source: &S) -> Result<(), Error> {
        if let Pointer::Reference { hash } = self {
            let hash = *hash;
            let node = source.fetch(&hash)?;
            *self = Pointer::Loaded {
                hash,
                node: Box::new(node),
            };
        }
        Ok(())
    }
}

/// Produces nodes by content hash.
///
/// Implementations back a tree with the node database, a remote syncer or
/// nothing at all; any call may block, which makes it the tree's only
/// suspension point.
pub trait NodeSource {
    /// Fetch and decode the node stored under `hash`.
    fn fetch(&self, hash: &Hash) -> Result<Node, Error>;
}

/// Source for fully in-memory trees; every fetch fails.
///
/// Used by proof verification, where reaching an absent subtree means the
/// proof does not cover the answer.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSource;

impl NodeSource for NullSource {
    fn fetch(&self, hash: &Hash) -> Result<Node, Error> {
        Err(Error::NodeNotFound(hex::encode(hash)))
    }
}

/// Shared state threaded through a traversal: the node source plus the
/// optional proof recorder.
pub(crate) struct Ctx<'a, S: NodeSource> {
    source: &'a S,
    recorder: Option<&'a mut ProofBuilder>,
}

impl<'a, S: NodeSource> Ctx<'a, S> {
    pub(crate) fn resolve(&mut self, ptr: &mut Pointer) -> Result<(), Error> {
        ptr.resolve(self.source)?;
        if let Some(recorder) = self.recorder.as_mut() {
            recorder.record(ptr)?;
        }
        Ok(())
    }
}

/// A single tree handle rooted at a [`Pointer`].
///
/// Handles are single-owner: they resolve nodes through their source and
/// cache them in place, so they must not be shared between threads. A
/// handle that returned an error from a mutation is in an unspecified
/// state and must be discarded.
pub struct Tree<S: NodeSource> {
    pub(crate) root: Pointer,
    pub(crate) source: S,
    pending_log: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    recorder: Option<ProofBuilder>,
}

impl<S: NodeSource> Tree<S> {
    /// Creates an empty tree.
    pub fn empty(source: S) -> Self {
        Self {
            root: Pointer::Null,
            source,
            pending_log: BTreeMap::new(),
            recorder: None,
        }
    }

    /// Opens the tree rooted at `root_hash`; nodes load lazily from
    /// `source`.
    pub fn open(source: S, root_hash: Hash) -> Self {
        let root = if root_hash == EMPTY_HASH {
            Pointer::Null
        } else {
            Pointer::Reference { hash: root_hash }
        };
        Self {
            root,
            source,
            pending_log: BTreeMap::new(),
            recorder: None,
        }
    }

    /// Wraps an already-reconstructed root pointer, as produced by proof
    /// verification.
    pub fn from_root_pointer(source: S, root: Pointer) -> Self {
        Self {
            root,
            source,
            pending_log: BTreeMap::new(),
            recorder: None,
        }
    }

    /// The current root hash, or `None` while uncommitted mutations are
    /// pending.
    pub fn root_hash(&self) -> Option<Hash> {
        self.root.clean_hash()
    }

    /// True when mutations since the last commit are pending.
    pub fn is_dirty(&self) -> bool {
        !self.root.is_clean()
    }

    /// Access the node source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Access the node source mutably.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Replays a write-log against the tree; empty values delete.
    pub fn apply_write_log(&mut self, log: &WriteLog) -> Result<(), Error> {
        for entry in log {
            if entry.is_delete() {
                self.remove(&entry.key)?;
            } else {
                self.insert(&entry.key, &entry.value)?;
            }
        }
        Ok(())
    }

    /// The value-level diff accumulated by mutations since the last
    /// [`Tree::take_write_log`], in key order.
    pub fn pending_write_log(&self) -> WriteLog {
        self.pending_log
            .iter()
            .map(|(key, value)| LogEntry {
                key: key.clone(),
                value: value.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Takes and clears the accumulated write-log.
    pub fn take_write_log(&mut self) -> WriteLog {
        let log = self.pending_write_log();
        self.pending_log.clear();
        log
    }

    /// Starts recording the traversal into a proof over the current root.
    ///
    /// Only committed (clean) trees can be recorded.
    pub fn start_recording(&mut self, limits: TraversalLimits) -> Result<(), Error> {
        if self.is_dirty() {
            return Err(Error::ProofCreation("cannot record a dirty tree"));
        }
        self.recorder = Some(ProofBuilder::new(limits));
        Ok(())
    }

    /// Stops recording and builds the proof of everything visited since
    /// [`Tree::start_recording`].
    pub fn end_recording(&mut self) -> Result<Proof, Error> {
        let builder = self
            .recorder
            .take()
            .ok_or(Error::ProofCreation("recording was not started"))?;
        builder.build(&self.root)
    }

    pub(crate) fn ctx(&mut self) -> (Ctx<'_, S>, &mut Pointer) {
        (
            Ctx {
                source: &self.source,
                recorder: self.recorder.as_mut(),
            },
            &mut self.root,
        )
    }

    pub(crate) fn log_insert(&mut self, key: &[u8], value: &[u8]) {
        self.pending_log.insert(key.to_vec(), Some(value.to_vec()));
    }

    pub(crate) fn log_remove(&mut self, key: &[u8]) {
        self.pending_log.insert(key.to_vec(), None);
    }

    pub(crate) fn check_key(key: &[u8]) -> Result<(), Error> {
        if key.len() > MAX_KEY_BYTES {
            return Err(Error::MalformedKey("key exceeds maximum length"));
        }
        Ok(())
    }
}
