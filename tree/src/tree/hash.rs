//! Node hashing.
//!
//! Digests are SHA-512/256. The preimage of a node hash is a dedicated
//! little-endian layout, separate from the wire codec: the wire form may
//! embed whole child nodes, while the preimage always folds children in by
//! their 32-byte digests.

use byteorder::{ByteOrder, LittleEndian};
use sha2::{Digest, Sha512_256};

use super::{InternalNode, LeafNode};

/// The length of a [`Hash`] in bytes.
pub const HASH_LENGTH: usize = 32;

/// A cryptographic hash digest.
pub type Hash = [u8; HASH_LENGTH];

/// Digest of the empty byte string; stands in for absent subtrees and is
/// the root hash of the empty tree.
pub const EMPTY_HASH: Hash = [
    0xc6, 0x72, 0xb8, 0xd1, 0xef, 0x56, 0xed, 0x28, 0xab, 0x87, 0xc3, 0x62, 0x2c, 0x51, 0x14,
    0x06, 0x9b, 0xdd, 0x3a, 0xd7, 0xb8, 0xf9, 0x73, 0x74, 0x98, 0xd0, 0xc0, 0x1e, 0xce, 0xf0,
    0x96, 0x7a,
];

/// Domain prefix of the leaf-node preimage.
const LEAF_PREFIX: u8 = 0x00;
/// Domain prefix of the internal-node preimage.
const INTERNAL_PREFIX: u8 = 0x01;

/// Hashes an arbitrary byte string.
pub fn hash_bytes(data: &[u8]) -> Hash {
    let mut hasher = Sha512_256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hashes a leaf node.
///
/// Preimage: `0x00 || version (u64 LE) || key || value`.
pub fn hash_leaf(leaf: &LeafNode) -> Hash {
    let mut version = [0u8; 8];
    LittleEndian::write_u64(&mut version, leaf.version);

    let mut hasher = Sha512_256::new();
    hasher.update([LEAF_PREFIX]);
    hasher.update(version);
    hasher.update(&leaf.key);
    hasher.update(&leaf.value);
    hasher.finalize().into()
}

/// Hashes an internal node given the digests of its three slots.
///
/// Preimage: `0x01 || version (u64 LE) || label_bit_length (u16 LE) ||
/// label || leaf_hash || left_hash || right_hash`, with [`EMPTY_HASH`]
/// standing in for absent slots.
pub fn hash_internal(node: &InternalNode, leaf: &Hash, left: &Hash, right: &Hash) -> Hash {
    let mut version = [0u8; 8];
    LittleEndian::write_u64(&mut version, node.version);
    let mut bit_length = [0u8; 2];
    LittleEndian::write_u16(&mut bit_length, node.label_bit_length);

    let mut hasher = Sha512_256::new();
    hasher.update([INTERNAL_PREFIX]);
    hasher.update(version);
    hasher.update(bit_length);
    hasher.update(&node.label);
    hasher.update(leaf);
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::Pointer;

    #[test]
    fn empty_hash_is_digest_of_empty_string() {
        assert_eq!(hash_bytes(b""), EMPTY_HASH);
    }

    #[test]
    fn hash_leaf_node() {
        let leaf = LeafNode {
            version: 0xDEADBEEF,
            key: b"a golden key".to_vec(),
            value: b"value".to_vec(),
        };
        assert_eq!(
            hex::encode(hash_leaf(&leaf)),
            "1bf37ec60c5494775e7029ec2a888c42d14f9710852c86ffe0afab8e3c43b782",
        );
    }

    #[test]
    fn hash_internal_node() {
        let node = InternalNode {
            version: 0xDEADBEEF,
            label: b"abc".to_vec(),
            label_bit_length: 23,
            leaf: Pointer::Null,
            left: Pointer::Null,
            right: Pointer::Null,
        };
        let leaf = hash_bytes(b"everyone stop here");
        let left = hash_bytes(b"everyone move to the left");
        let right = hash_bytes(b"everyone move to the right");
        assert_eq!(
            hex::encode(hash_internal(&node, &leaf, &left, &right)),
            "e760353e9796f41b3bb2cfa2cf45f7e00ca687b6b84dc658e0ecadc906d5d21e",
        );
    }
}
