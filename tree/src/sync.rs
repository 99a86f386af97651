//! Sync protocol types.
//!
//! Remote readers issue `Get`, `GetPrefixes` and `Iterate` requests
//! against a specific root; the server answers with a proof over the
//! traversal it performed, from which the caller re-derives the answer
//! after verification.

use crate::{proofs::Proof, tree::Root};

/// Request for the value stored under a single key.
#[derive(Debug, Clone)]
pub struct GetRequest {
    /// The root to read from.
    pub tree: Root,
    /// The key to look up.
    pub key: Vec<u8>,
}

/// Request for all entries under a set of key prefixes.
#[derive(Debug, Clone)]
pub struct GetPrefixesRequest {
    /// The root to read from.
    pub tree: Root,
    /// The prefixes to fetch.
    pub prefixes: Vec<Vec<u8>>,
    /// Maximum number of entries to return.
    pub limit: u16,
}

/// Request for an ordered window of entries starting at a key.
#[derive(Debug, Clone)]
pub struct IterateRequest {
    /// The root to read from.
    pub tree: Root,
    /// The key to anchor the window at (inclusive).
    pub key: Vec<u8>,
    /// Number of entries to prefetch.
    pub prefetch: u16,
}

/// Response carrying the proof of a recorded traversal.
///
/// The answer itself (value, entry set or window) is derivable by local
/// traversal of the partial tree the proof reconstructs.
#[derive(Debug, Clone)]
pub struct ProofResponse {
    /// Proof over every node the traversal visited.
    pub proof: Proof,
    /// True when a response limit truncated the traversal; the caller can
    /// resume with a follow-up request anchored at the last key returned.
    pub partial: bool,
}
