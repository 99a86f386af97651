//! Tree mutations.

use std::mem;

use crate::{
    error::Error,
    tree::{
        key::{self, Depth},
        Ctx, InternalNode, LeafNode, Node, NodeSource, Pointer, Tree,
    },
};

impl<S: NodeSource> Tree<S> {
    /// Inserts or replaces the value stored under `key`, returning the
    /// previous value if any.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Self::check_key(key)?;
        let (mut ctx, root) = self.ctx();
        let old = insert_at(&mut ctx, root, 0, key, value)?;
        self.log_insert(key, value);
        Ok(old)
    }

    /// Removes the value stored under `key`, returning it if it was
    /// present.
    pub fn remove(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Self::check_key(key)?;
        let (mut ctx, root) = self.ctx();
        let old = remove_at(&mut ctx, root, 0, key)?;
        if old.is_some() {
            self.log_remove(key);
        }
        Ok(old)
    }
}

fn insert_at<S: NodeSource>(
    ctx: &mut Ctx<'_, S>,
    ptr: &mut Pointer,
    bit_depth: Depth,
    search_key: &[u8],
    value: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    ctx.resolve(ptr)?;
    let key_bits = key::bit_length(search_key);

    let current = mem::replace(ptr, Pointer::Null);
    let (next, old) = match current {
        Pointer::Null => (
            Pointer::from_node(Node::Leaf(LeafNode {
                version: 0,
                key: search_key.to_vec(),
                value: value.to_vec(),
            })),
            None,
        ),
        other => {
            let (mut node, clean_hash) = other.into_parts();
            match node.as_mut() {
                Node::Leaf(leaf) if leaf.key == search_key => {
                    let old = mem::replace(&mut leaf.value, value.to_vec());
                    (Pointer::Modified { node }, Some(old))
                }
                Node::Leaf(leaf) => {
                    // The keys diverge: split into an internal node whose
                    // label is their common path below this point.
                    let leaf_bits = key::bit_length(&leaf.key);
                    let split_at =
                        key::common_prefix_len(&leaf.key, leaf_bits, search_key, key_bits);
                    debug_assert!(split_at >= bit_depth);
                    let existing_bit = if leaf_bits == split_at {
                        None
                    } else {
                        Some(key::get_bit(&leaf.key, split_at))
                    };

                    let mut internal = InternalNode {
                        version: 0,
                        label: key::bit_range(search_key, bit_depth, split_at),
                        label_bit_length: split_at - bit_depth,
                        leaf: Pointer::Null,
                        left: Pointer::Null,
                        right: Pointer::Null,
                    };
                    let existing = Pointer::reassemble(node, clean_hash);
                    match existing_bit {
                        None => internal.leaf = existing,
                        Some(false) => internal.left = existing,
                        Some(true) => internal.right = existing,
                    }

                    let new_leaf = Pointer::from_node(Node::Leaf(LeafNode {
                        version: 0,
                        key: search_key.to_vec(),
                        value: value.to_vec(),
                    }));
                    if key_bits == split_at {
                        internal.leaf = new_leaf;
                    } else if key::get_bit(search_key, split_at) {
                        internal.right = new_leaf;
                    } else {
                        internal.left = new_leaf;
                    }

                    (Pointer::from_node(Node::Internal(internal)), None)
                }
                Node::Internal(n) => {
                    let label_remainder = key::bit_range(search_key, bit_depth, key_bits);
                    let cpl = key::common_prefix_len(
                        &n.label,
                        n.label_bit_length,
                        &label_remainder,
                        key_bits - bit_depth,
                    );

                    if cpl == n.label_bit_length {
                        // Whole label matches; the key either ends at this
                        // node or descends past the branch bit.
                        let node_total = bit_depth + n.label_bit_length;
                        let old = if key_bits == node_total {
                            ctx.resolve(&mut n.leaf)?;
                            let old = if let Some(Node::Leaf(leaf)) = n.leaf.node_mut() {
                                debug_assert_eq!(leaf.key, search_key);
                                Some(mem::replace(&mut leaf.value, value.to_vec()))
                            } else {
                                None
                            };
                            if old.is_some() {
                                n.leaf.mark_modified();
                            } else {
                                n.leaf = Pointer::from_node(Node::Leaf(LeafNode {
                                    version: 0,
                                    key: search_key.to_vec(),
                                    value: value.to_vec(),
                                }));
                            }
                            old
                        } else if key::get_bit(search_key, node_total) {
                            insert_at(ctx, &mut n.right, node_total + 1, search_key, value)?
                        } else {
                            insert_at(ctx, &mut n.left, node_total + 1, search_key, value)?
                        };
                        (Pointer::Modified { node }, old)
                    } else {
                        // The key diverges inside the label: split the edge
                        // at the first differing bit. The existing node
                        // keeps the label past the branch bit.
                        let (parent_label, rest) = key::split(&n.label, cpl, n.label_bit_length);
                        let existing_branch = key::get_bit(&rest, 0);
                        let (_, child_label) = key::split(&rest, 1, n.label_bit_length - cpl);
                        n.label = child_label;
                        n.label_bit_length -= cpl + 1;

                        let mut internal = InternalNode {
                            version: 0,
                            label: parent_label,
                            label_bit_length: cpl,
                            leaf: Pointer::Null,
                            left: Pointer::Null,
                            right: Pointer::Null,
                        };
                        let existing = Pointer::Modified { node };
                        if existing_branch {
                            internal.right = existing;
                        } else {
                            internal.left = existing;
                        }

                        let new_leaf = Pointer::from_node(Node::Leaf(LeafNode {
                            version: 0,
                            key: search_key.to_vec(),
                            value: value.to_vec(),
                        }));
                        let split_total = bit_depth + cpl;
                        if key_bits == split_total {
                            internal.leaf = new_leaf;
                        } else if key::get_bit(search_key, split_total) {
                            internal.right = new_leaf;
                        } else {
                            internal.left = new_leaf;
                        }

                        (Pointer::from_node(Node::Internal(internal)), None)
                    }
                }
            }
        }
    };
    *ptr = next;
    Ok(old)
}

fn remove_at<S: NodeSource>(
    ctx: &mut Ctx<'_, S>,
    ptr: &mut Pointer,
    bit_depth: Depth,
    search_key: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    ctx.resolve(ptr)?;
    let key_bits = key::bit_length(search_key);

    let current = mem::replace(ptr, Pointer::Null);
    let (next, old) = match current {
        Pointer::Null => (Pointer::Null, None),
        other => {
            let (mut node, clean_hash) = other.into_parts();
            match node.as_mut() {
                Node::Leaf(leaf) => {
                    if leaf.key == search_key {
                        let old = mem::take(&mut leaf.value);
                        (Pointer::Null, Some(old))
                    } else {
                        (Pointer::reassemble(node, clean_hash), None)
                    }
                }
                Node::Internal(n) => {
                    let node_total = bit_depth + n.label_bit_length;
                    let label_matches = node_total <= key_bits
                        && key::bit_range(search_key, bit_depth, node_total) == n.label;
                    if !label_matches {
                        (Pointer::reassemble(node, clean_hash), None)
                    } else {
                        let old = if key_bits == node_total {
                            ctx.resolve(&mut n.leaf)?;
                            let old = match n.leaf.node_mut() {
                                Some(Node::Leaf(leaf)) if leaf.key == search_key => {
                                    Some(mem::take(&mut leaf.value))
                                }
                                _ => None,
                            };
                            if old.is_some() {
                                n.leaf = Pointer::Null;
                            }
                            old
                        } else if key::get_bit(search_key, node_total) {
                            remove_at(ctx, &mut n.right, node_total + 1, search_key)?
                        } else {
                            remove_at(ctx, &mut n.left, node_total + 1, search_key)?
                        };

                        match old {
                            None => (Pointer::reassemble(node, clean_hash), None),
                            Some(old) => (collapse(ctx, node)?, Some(old)),
                        }
                    }
                }
            }
        }
    };
    *ptr = next;
    Ok(old)
}

/// Re-establishes the compression invariant on an internal node after a
/// removal below it: an internal node must keep a co-located leaf or at
/// least two occupied slots.
fn collapse<S: NodeSource>(ctx: &mut Ctx<'_, S>, node: Box<Node>) -> Result<Pointer, Error> {
    let Node::Internal(mut n) = *node else {
        unreachable!("collapse is only called on internal nodes");
    };

    let has_leaf = !n.leaf.is_null();
    let has_left = !n.left.is_null();
    let has_right = !n.right.is_null();

    match (has_leaf, has_left, has_right) {
        // The node vanished entirely.
        (false, false, false) => Ok(Pointer::Null),
        // Only the co-located leaf remains: lift it to the parent. The
        // leaf stores its full key, so no label bookkeeping is needed.
        (true, false, false) => Ok(mem::replace(&mut n.leaf, Pointer::Null)),
        // A single child remains: a leaf child lifts directly, an internal
        // child absorbs this node's label plus the branch bit.
        (false, true, false) | (false, false, true) => {
            let branch = has_right;
            let slot = if branch { &mut n.right } else { &mut n.left };
            let mut child = mem::replace(slot, Pointer::Null);
            ctx.resolve(&mut child)?;
            if matches!(child.node(), Some(Node::Leaf(_))) {
                return Ok(child);
            }
            let merged = if let Some(Node::Internal(c)) = child.node_mut() {
                let joint = key::append_bit(&n.label, n.label_bit_length, branch);
                c.label = key::merge(&joint, n.label_bit_length + 1, &c.label, c.label_bit_length);
                c.label_bit_length += n.label_bit_length + 1;
                true
            } else {
                false
            };
            if !merged {
                return Err(Error::MalformedNode(
                    "internal node child resolved to nothing".into(),
                ));
            }
            child.mark_modified();
            Ok(child)
        }
        // Still well formed.
        _ => Ok(Pointer::from_node(Node::Internal(n))),
    }
}
