//! Proof verification.

use crate::{
    error::Error,
    proofs::{Proof, PROOF_ENTRY_FULL, PROOF_ENTRY_HASH},
    tree::{
        encoding,
        hash::{self, Hash, HASH_LENGTH},
        Node, NullSource, Pointer, Tree,
    },
};

/// Reconstructs and authenticates partial trees from proofs.
///
/// A verifier needs nothing but the root hash it already trusts; the
/// reconstructed tree answers lookups purely from proof contents, failing
/// on any subtree the proof does not cover.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProofVerifier;

impl ProofVerifier {
    /// Verifies `proof` against `expected_root`, returning the partial
    /// tree it authenticates.
    pub fn verify(&self, proof: &Proof, expected_root: Hash) -> Result<Tree<NullSource>, Error> {
        if proof.untrusted_root != expected_root {
            return Err(Error::ProofVerifyFailed(format!(
                "proof is for root {}, expected {}",
                hex::encode(proof.untrusted_root),
                hex::encode(expected_root),
            )));
        }

        let mut pos = 0;
        let root = self.decode_ptr(proof, &mut pos)?;
        if pos != proof.entries.len() {
            return Err(Error::ProofVerifyFailed("unused proof entries".into()));
        }

        let computed = root.hash();
        if computed != expected_root {
            return Err(Error::ProofVerifyFailed(format!(
                "recomputed root {} does not match {}",
                hex::encode(computed),
                hex::encode(expected_root),
            )));
        }
        Ok(Tree::from_root_pointer(NullSource, root))
    }

    fn decode_ptr(&self, proof: &Proof, pos: &mut usize) -> Result<Pointer, Error> {
        let entry = proof
            .entries
            .get(*pos)
            .ok_or_else(|| Error::ProofVerifyFailed("truncated proof".into()))?;
        *pos += 1;

        if entry.is_empty() {
            return Ok(Pointer::Null);
        }
        match entry[0] {
            PROOF_ENTRY_HASH => {
                if entry.len() != 1 + HASH_LENGTH {
                    return Err(Error::ProofVerifyFailed("malformed hash entry".into()));
                }
                let mut hash: Hash = [0; HASH_LENGTH];
                hash.copy_from_slice(&entry[1..]);
                Ok(Pointer::Reference { hash })
            }
            PROOF_ENTRY_FULL => {
                let mut input = &entry[1..];
                let node = encoding::decode_compact(&mut input)?;
                if !input.is_empty() {
                    return Err(Error::ProofVerifyFailed(
                        "trailing bytes in proof entry".into(),
                    ));
                }
                match node {
                    Node::Leaf(leaf) => {
                        let leaf_hash = hash::hash_leaf(&leaf);
                        Ok(Pointer::Loaded {
                            hash: leaf_hash,
                            node: Box::new(Node::Leaf(leaf)),
                        })
                    }
                    Node::Internal(mut n) => {
                        // Children follow the parent in descent order.
                        n.left = self.decode_ptr(proof, pos)?;
                        n.right = self.decode_ptr(proof, pos)?;
                        let node_hash = hash::hash_internal(
                            &n,
                            &n.leaf.hash(),
                            &n.left.hash(),
                            &n.right.hash(),
                        );
                        Ok(Pointer::Loaded {
                            hash: node_hash,
                            node: Box::new(Node::Internal(n)),
                        })
                    }
                }
            }
            other => Err(Error::ProofVerifyFailed(format!(
                "unexpected proof entry marker {other:#04x}"
            ))),
        }
    }
}
