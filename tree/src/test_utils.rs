//! Various helpers useful for tests.

use std::collections::HashMap;

use crate::{
    tree::{
        decode_full,
        hash::Hash,
        key::{self, Depth},
        Node, NodeBatch, NodeSource, Pointer, Tree,
    },
    Error,
};

/// Node source over a plain in-memory map of encoded nodes.
#[derive(Debug, Default, Clone)]
pub struct MapSource {
    nodes: HashMap<Hash, Vec<u8>>,
}

impl MapSource {
    /// Creates an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a committed node batch.
    pub fn apply(&mut self, batch: &NodeBatch) {
        for (hash, encoded) in batch {
            self.nodes.insert(*hash, encoded.clone());
        }
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when no nodes are stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl NodeSource for MapSource {
    fn fetch(&self, hash: &Hash) -> Result<Node, Error> {
        let bytes = self
            .nodes
            .get(hash)
            .ok_or_else(|| Error::NodeNotFound(hex::encode(hash)))?;
        decode_full(bytes)
    }
}

/// Inserts `count` generated `key N -> value N` pairs and returns them
/// sorted by key.
pub fn populate<S: NodeSource>(tree: &mut Tree<S>, count: usize) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = (0..count)
        .map(|i| {
            (
                format!("key {i}").into_bytes(),
                format!("value {i}").into_bytes(),
            )
        })
        .collect();
    for (key, value) in &pairs {
        tree.insert(key, value).expect("insert must succeed");
    }
    pairs.sort();
    pairs
}

/// Walks the in-memory part of the tree asserting the structural
/// invariants: internal-node occupancy, label/path consistency and leaf
/// placement.
pub fn assert_tree_invariants<S: NodeSource>(tree: &Tree<S>) {
    check(&tree.root, &[], 0);
}

fn check(ptr: &Pointer, path: &[u8], bits: Depth) {
    let Some(node) = ptr.node() else {
        return;
    };
    match node {
        Node::Leaf(leaf) => {
            assert!(
                key::bit_length(&leaf.key) >= bits,
                "leaf key shorter than its path",
            );
            assert_eq!(
                key::bit_range(&leaf.key, 0, bits),
                path,
                "leaf key does not extend its path",
            );
        }
        Node::Internal(n) => {
            let occupied = usize::from(!n.leaf.is_null())
                + usize::from(!n.left.is_null())
                + usize::from(!n.right.is_null());
            assert!(
                occupied >= 2,
                "internal node with a single occupied slot must have been collapsed",
            );

            let node_path = key::merge(path, bits, &n.label, n.label_bit_length);
            let node_bits = bits + n.label_bit_length;
            if let Some(Node::Leaf(leaf)) = n.leaf.node() {
                assert_eq!(
                    key::bit_length(&leaf.key),
                    node_bits,
                    "co-located leaf key must end exactly at its node",
                );
                assert_eq!(key::bit_range(&leaf.key, 0, node_bits), node_path);
            } else {
                assert!(
                    n.leaf.is_null(),
                    "co-located slot must hold a leaf or nothing",
                );
            }

            let left_path = key::append_bit(&node_path, node_bits, false);
            check(&n.left, &left_path, node_bits + 1);
            let right_path = key::append_bit(&node_path, node_bits, true);
            check(&n.right, &right_path, node_bits + 1);
        }
    }
}
