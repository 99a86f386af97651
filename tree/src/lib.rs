//! Merklized key-value store core.
//!
//! A compressed binary radix tree whose interior and leaf nodes are
//! content-addressed by SHA-512/256 digest. The tree produces new roots and
//! value-level write-logs from mutations, serves authenticated reads
//! through recorded traversals that yield compact Merkle proofs, and diffs
//! arbitrary root pairs into replayable write-logs.

pub mod diff;
mod error;
pub mod proofs;
pub mod sync;
pub mod test_utils;
pub mod tree;
pub mod writelog;

pub use error::Error;
pub use proofs::{Proof, ProofBuilder, ProofVerifier, TraversalLimits};
pub use sync::{GetPrefixesRequest, GetRequest, IterateRequest, ProofResponse};
pub use tree::{
    decode_compact, decode_full, encode_compact,
    hash::{Hash, EMPTY_HASH, HASH_LENGTH},
    InternalNode, LeafNode, Namespace, Node, NodeBatch, NodeSource, NullSource, Pointer, Root,
    RootType, Tree, TreeIterator, MAX_KEY_BYTES,
};
pub use writelog::{LogEntry, WriteLog};
