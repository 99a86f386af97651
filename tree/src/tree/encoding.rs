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

//! Node wire codec.
//!
//! Every node has a *full* and a *compact* form, both deterministic and
//! strict to decode. The full form of an internal node carries its child
//! hashes; the compact form omits them for contexts (proofs) where the
//! children travel alongside. The co-located leaf is embedded in both
//! forms so a receiver reconstructs it without another round-trip.

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ed::{Decode, Encode};

use crate::{
    error::Error,
    tree::{
        hash::{self, Hash, EMPTY_HASH, HASH_LENGTH},
        key, InternalNode, LeafNode, Node, Pointer, MAX_KEY_BYTES,
    },
};

/// Kind byte of an absent node (the empty co-located leaf slot).
const KIND_EMPTY: u8 = 0x00;
/// Kind byte of an internal node.
const KIND_INTERNAL: u8 = 0x01;
/// Kind byte of a leaf node.
const KIND_LEAF: u8 = 0x02;

fn malformed(what: &str) -> ed::Error {
    io::Error::new(io::ErrorKind::InvalidData, what.to_string()).into()
}

fn read_vec<R: Read>(input: &mut R, len: usize) -> ed::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(len.min(64 * 1024));
    input.take(len as u64).read_to_end(&mut out)?;
    if out.len() != len {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(out)
}

fn encode_leaf_into<W: Write>(leaf: &LeafNode, dest: &mut W) -> ed::Result<()> {
    dest.write_all(&[KIND_LEAF])?;
    dest.write_u64::<BigEndian>(leaf.version)?;
    dest.write_u32::<BigEndian>(leaf.key.len() as u32)?;
    dest.write_all(&leaf.key)?;
    dest.write_u32::<BigEndian>(leaf.value.len() as u32)?;
    dest.write_all(&leaf.value)?;
    Ok(())
}

fn leaf_encoding_length(leaf: &LeafNode) -> usize {
    1 + 8 + 4 + leaf.key.len() + 4 + leaf.value.len()
}

/// Decodes a leaf whose kind byte has already been consumed.
fn decode_leaf_body<R: Read>(input: &mut R) -> ed::Result<LeafNode> {
    let version = input.read_u64::<BigEndian>()?;
    let key_len = input.read_u32::<BigEndian>()? as usize;
    if key_len > MAX_KEY_BYTES {
        return Err(malformed("leaf key length out of range"));
    }
    let key = read_vec(input, key_len)?;
    let value_len = input.read_u32::<BigEndian>()? as usize;
    let value = read_vec(input, value_len)?;
    Ok(LeafNode {
        version,
        key,
        value,
    })
}

/// Decodes the internal-node fields shared by the full and compact forms,
/// up to and including the embedded co-located leaf.
fn decode_internal_prefix<R: Read>(input: &mut R) -> ed::Result<InternalNode> {
    let version = input.read_u64::<BigEndian>()?;
    let label_bit_length = input.read_u16::<BigEndian>()?;
    let label = read_vec(input, key::to_bytes(label_bit_length))?;
    {
        let mut canonical = label.clone();
        key::mask_tail(&mut canonical, label_bit_length);
        if canonical != label {
            return Err(malformed("internal node label has unmasked trailing bits"));
        }
    }

    let mut kind = [0u8; 1];
    input.read_exact(&mut kind)?;
    let leaf = match kind[0] {
        KIND_EMPTY => Pointer::Null,
        KIND_LEAF => {
            let leaf = decode_leaf_body(input)?;
            Pointer::Loaded {
                hash: hash::hash_leaf(&leaf),
                node: Box::new(Node::Leaf(leaf)),
            }
        }
        other => return Err(ed::Error::UnexpectedByte(other)),
    };

    Ok(InternalNode {
        version,
        label,
        label_bit_length,
        leaf,
        left: Pointer::Null,
        right: Pointer::Null,
    })
}

fn read_child_hash<R: Read>(input: &mut R) -> ed::Result<Pointer> {
    let mut hash: Hash = [0; HASH_LENGTH];
    input.read_exact(&mut hash)?;
    if hash == EMPTY_HASH {
        Ok(Pointer::Null)
    } else {
        Ok(Pointer::Reference { hash })
    }
}

impl Encode for Node {
    /// Full encoding. Child hashes are read from the pointers, so only
    /// committed (hashed) nodes may be encoded.
    fn encode_into<W: Write>(&self, dest: &mut W) -> ed::Result<()> {
        match self {
            Node::Leaf(leaf) => encode_leaf_into(leaf, dest),
            Node::Internal(n) => {
                encode_internal_prefix_into(n, dest)?;
                dest.write_all(&n.left.hash())?;
                dest.write_all(&n.right.hash())?;
                Ok(())
            }
        }
    }

    fn encoding_length(&self) -> ed::Result<usize> {
        Ok(match self {
            Node::Leaf(leaf) => leaf_encoding_length(leaf),
            Node::Internal(n) => internal_prefix_length(n) + 2 * HASH_LENGTH,
        })
    }
}

impl Decode for Node {
    /// Full decoding; children come back as unresolved references.
    fn decode<R: Read>(mut input: R) -> ed::Result<Self> {
        let mut kind = [0u8; 1];
        input.read_exact(&mut kind)?;
        match kind[0] {
            KIND_LEAF => Ok(Node::Leaf(decode_leaf_body(&mut input)?)),
            KIND_INTERNAL => {
                let mut node = decode_internal_prefix(&mut input)?;
                node.left = read_child_hash(&mut input)?;
                node.right = read_child_hash(&mut input)?;
                Ok(Node::Internal(node))
            }
            other => Err(ed::Error::UnexpectedByte(other)),
        }
    }
}

fn encode_internal_prefix_into<W: Write>(n: &InternalNode, dest: &mut W) -> ed::Result<()> {
    dest.write_all(&[KIND_INTERNAL])?;
    dest.write_u64::<BigEndian>(n.version)?;
    dest.write_u16::<BigEndian>(n.label_bit_length)?;
    dest.write_all(&n.label[..key::to_bytes(n.label_bit_length)])?;
    match n.leaf.node() {
        Some(Node::Leaf(leaf)) => encode_leaf_into(leaf, dest),
        Some(Node::Internal(_)) => Err(malformed("co-located slot holds an internal node")),
        None => {
            dest.write_all(&[KIND_EMPTY])?;
            Ok(())
        }
    }
}

fn internal_prefix_length(n: &InternalNode) -> usize {
    let leaf_len = match n.leaf.node() {
        Some(Node::Leaf(leaf)) => leaf_encoding_length(leaf),
        _ => 1,
    };
    1 + 8 + 2 + key::to_bytes(n.label_bit_length) + leaf_len
}

/// Strict full decoding: trailing bytes fail.
pub fn decode_full(bytes: &[u8]) -> Result<Node, Error> {
    let mut input = bytes;
    let node = Node::decode(&mut input)?;
    if !input.is_empty() {
        return Err(Error::MalformedNode("trailing bytes after node".into()));
    }
    Ok(node)
}

/// Compact encoding: identical to the full form except that an internal
/// node's child hashes are omitted.
pub fn encode_compact(node: &Node) -> Result<Vec<u8>, Error> {
    let mut out = Vec::new();
    match node {
        Node::Leaf(leaf) => encode_leaf_into(leaf, &mut out)?,
        Node::Internal(n) => encode_internal_prefix_into(n, &mut out)?,
    }
    Ok(out)
}

/// Decodes a compact node from the front of `input`, advancing it.
///
/// An internal node comes back with both children [`Pointer::Null`]; the
/// caller supplies them from whatever carried the compact form.
pub fn decode_compact(input: &mut &[u8]) -> Result<Node, Error> {
    let mut kind = [0u8; 1];
    input.read_exact(&mut kind).map_err(ed::Error::from)?;
    match kind[0] {
        KIND_LEAF => Ok(Node::Leaf(decode_leaf_body(input)?)),
        KIND_INTERNAL => Ok(Node::Internal(decode_internal_prefix(input)?)),
        other => Err(ed::Error::UnexpectedByte(other).into()),
    }
}
