//! Merkle proofs over recorded traversals.
//!
//! While a sync operation runs, the tree records every node it resolves.
//! The proof serializes the visited part of the tree in descent (pre-)
//! order: each entry is either an inline compact node, the bare hash of an
//! unvisited subtree, or the empty marker for an absent child. A verifier
//! replays the entries, recomputes every hash bottom-up and compares the
//! result against the root it trusts.

mod verify;

use std::collections::HashSet;
use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ed::{Decode, Encode};

pub use verify::ProofVerifier;

use crate::{
    error::Error,
    tree::{
        encoding,
        hash::{Hash, HASH_LENGTH},
        Node, Pointer,
    },
};

/// Proof entry marker: an inline compact node follows.
const PROOF_ENTRY_FULL: u8 = 0x01;
/// Proof entry marker: only the subtree hash follows.
const PROOF_ENTRY_HASH: u8 = 0x02;

/// A Merkle proof for a recorded traversal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proof {
    /// The root hash the proof claims to authenticate. Untrusted until
    /// verification recomputes it.
    pub untrusted_root: Hash,
    /// Proof entries in descent order. An empty entry denotes an absent
    /// child.
    pub entries: Vec<Vec<u8>>,
}

impl Encode for Proof {
    fn encode_into<W: Write>(&self, dest: &mut W) -> ed::Result<()> {
        dest.write_all(&self.untrusted_root)?;
        dest.write_u32::<BigEndian>(self.entries.len() as u32)?;
        for entry in &self.entries {
            dest.write_u32::<BigEndian>(entry.len() as u32)?;
            dest.write_all(entry)?;
        }
        Ok(())
    }

    fn encoding_length(&self) -> ed::Result<usize> {
        Ok(HASH_LENGTH + 4 + self.entries.iter().map(|e| 4 + e.len()).sum::<usize>())
    }
}

impl Decode for Proof {
    fn decode<R: Read>(mut input: R) -> ed::Result<Self> {
        let mut untrusted_root: Hash = [0; HASH_LENGTH];
        input.read_exact(&mut untrusted_root)?;
        let count = input.read_u32::<BigEndian>()? as usize;
        let mut entries = Vec::new();
        for _ in 0..count {
            let len = input.read_u32::<BigEndian>()? as usize;
            let mut entry = Vec::with_capacity(len.min(64 * 1024));
            (&mut input).take(len as u64).read_to_end(&mut entry)?;
            if entry.len() != len {
                return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
            }
            entries.push(entry);
        }
        Ok(Proof {
            untrusted_root,
            entries,
        })
    }
}

/// Limits on a recorded traversal; exceeding any of them aborts the
/// operation with [`Error::LimitReached`] so the caller can return a
/// partial response.
#[derive(Debug, Clone, Copy)]
pub struct TraversalLimits {
    /// Maximum number of distinct nodes recorded.
    pub max_nodes: usize,
    /// Maximum total bytes of recorded node encodings.
    pub max_bytes: usize,
}

impl Default for TraversalLimits {
    fn default() -> Self {
        Self {
            max_nodes: usize::MAX,
            max_bytes: usize::MAX,
        }
    }
}

/// Records the set of nodes a traversal resolves and assembles the proof.
pub struct ProofBuilder {
    visited: HashSet<Hash>,
    bytes: usize,
    limits: TraversalLimits,
}

impl ProofBuilder {
    /// Creates a builder with the given limits.
    pub fn new(limits: TraversalLimits) -> Self {
        Self {
            visited: HashSet::new(),
            bytes: 0,
            limits,
        }
    }

    /// Number of distinct nodes recorded so far.
    pub fn len(&self) -> usize {
        self.visited.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.visited.is_empty()
    }

    /// Records the node behind a resolved pointer.
    pub(crate) fn record(&mut self, ptr: &Pointer) -> Result<(), Error> {
        let (Some(hash), Some(node)) = (ptr.clean_hash(), ptr.node()) else {
            return Ok(());
        };
        if !self.visited.insert(hash) {
            return Ok(());
        }
        self.bytes += node.encoding_length()?;
        if self.visited.len() > self.limits.max_nodes || self.bytes > self.limits.max_bytes {
            return Err(Error::LimitReached);
        }
        Ok(())
    }

    /// Builds the proof of everything recorded, walking the visited part
    /// of the tree from `root` in descent order.
    pub fn build(&self, root: &Pointer) -> Result<Proof, Error> {
        let mut entries = Vec::new();
        self.push_ptr(root, &mut entries)?;
        Ok(Proof {
            untrusted_root: root.hash(),
            entries,
        })
    }

    fn push_ptr(&self, ptr: &Pointer, entries: &mut Vec<Vec<u8>>) -> Result<(), Error> {
        match ptr {
            Pointer::Null => {
                entries.push(Vec::new());
                Ok(())
            }
            Pointer::Modified { .. } => Err(Error::ProofCreation("tree has dirty nodes")),
            Pointer::Reference { hash } => {
                entries.push(hash_entry(hash));
                Ok(())
            }
            Pointer::Loaded { hash, node } => {
                if !self.visited.contains(hash) {
                    entries.push(hash_entry(hash));
                    return Ok(());
                }
                let mut entry = vec![PROOF_ENTRY_FULL];
                entry.extend(encoding::encode_compact(node)?);
                entries.push(entry);
                if let Node::Internal(n) = node.as_ref() {
                    self.push_ptr(&n.left, entries)?;
                    self.push_ptr(&n.right, entries)?;
                }
                Ok(())
            }
        }
    }
}

fn hash_entry(hash: &Hash) -> Vec<u8> {
    let mut entry = vec![PROOF_ENTRY_HASH];
    entry.extend_from_slice(hash);
    entry
}
