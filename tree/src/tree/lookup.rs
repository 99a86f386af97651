//! Read-side traversals: point lookups, lower-bounded ordered walks and
//! prefix fetches.

use std::cmp::Ordering;

use crate::{
    error::Error,
    tree::{
        key::{self, Depth},
        Ctx, Node, NodeSource, Pointer, Tree,
    },
};

/// The bit path from the root to the node currently being visited.
#[derive(Default)]
pub(crate) struct KeyPath {
    bytes: Vec<u8>,
    bits: Depth,
}

impl KeyPath {
    fn push(&mut self, label: &[u8], label_bits: Depth) {
        self.bytes = key::merge(&self.bytes, self.bits, label, label_bits);
        self.bits += label_bits;
    }

    fn pop(&mut self, label_bits: Depth) {
        self.bits -= label_bits;
        self.bytes.truncate(key::to_bytes(self.bits));
        key::mask_tail(&mut self.bytes, self.bits);
    }

    fn push_bit(&mut self, bit: bool) {
        self.bytes = key::append_bit(&self.bytes, self.bits, bit);
        self.bits += 1;
    }
}

impl<S: NodeSource> Tree<S> {
    /// Looks up the value stored under `key`.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, Error> {
        Self::check_key(key)?;
        let (mut ctx, root) = self.ctx();
        get_at(&mut ctx, root, 0, key)
    }

    /// Visits every `(key, value)` pair with `key >= from`, in key order,
    /// until the visitor returns `false`.
    pub fn walk_from<F>(&mut self, from: &[u8], visit: &mut F) -> Result<(), Error>
    where
        F: FnMut(&[u8], &[u8]) -> Result<bool, Error>,
    {
        let (mut ctx, root) = self.ctx();
        walk_from(&mut ctx, root, &mut KeyPath::default(), from, visit)?;
        Ok(())
    }

    /// Fetches up to `limit` entries whose keys start with one of
    /// `prefixes`, in key order.
    pub fn get_prefixes(
        &mut self,
        prefixes: &[Vec<u8>],
        limit: u16,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>, Error> {
        let mut sorted: Vec<&Vec<u8>> = prefixes.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut out: Vec<(Vec<u8>, Vec<u8>)> = Vec::new();
        for prefix in sorted {
            if out.len() >= limit as usize {
                break;
            }
            let (mut ctx, root) = self.ctx();
            walk_from(
                &mut ctx,
                root,
                &mut KeyPath::default(),
                prefix,
                &mut |key, value| {
                    if !key.starts_with(prefix) {
                        return Ok(false);
                    }
                    // Prefixes may overlap; keep the output strictly sorted.
                    if out.last().map_or(true, |(last, _)| last.as_slice() < key) {
                        out.push((key.to_vec(), value.to_vec()));
                    }
                    Ok(out.len() < limit as usize)
                },
            )?;
        }
        Ok(out)
    }
}

fn get_at<S: NodeSource>(
    ctx: &mut Ctx<'_, S>,
    ptr: &mut Pointer,
    bit_depth: Depth,
    search_key: &[u8],
) -> Result<Option<Vec<u8>>, Error> {
    ctx.resolve(ptr)?;
    let Some(node) = ptr.node_mut() else {
        return Ok(None);
    };
    match node {
        Node::Leaf(leaf) => Ok((leaf.key == search_key).then(|| leaf.value.clone())),
        Node::Internal(n) => {
            let key_bits = key::bit_length(search_key);
            let node_total = bit_depth + n.label_bit_length;
            if node_total > key_bits
                || key::bit_range(search_key, bit_depth, node_total) != n.label
            {
                return Ok(None);
            }
            if key_bits == node_total {
                ctx.resolve(&mut n.leaf)?;
                match n.leaf.node() {
                    Some(Node::Leaf(leaf)) if leaf.key == search_key => {
                        Ok(Some(leaf.value.clone()))
                    }
                    _ => Ok(None),
                }
            } else if key::get_bit(search_key, node_total) {
                get_at(ctx, &mut n.right, node_total + 1, search_key)
            } else {
                get_at(ctx, &mut n.left, node_total + 1, search_key)
            }
        }
    }
}

/// In-order traversal of the subtree at `ptr`, skipping keys below `from`.
/// Returns `false` once the visitor stops the walk.
pub(crate) fn walk_from<S: NodeSource, F>(
    ctx: &mut Ctx<'_, S>,
    ptr: &mut Pointer,
    path: &mut KeyPath,
    from: &[u8],
    visit: &mut F,
) -> Result<bool, Error>
where
    F: FnMut(&[u8], &[u8]) -> Result<bool, Error>,
{
    ctx.resolve(ptr)?;
    let Some(node) = ptr.node_mut() else {
        return Ok(true);
    };
    match node {
        Node::Leaf(leaf) => {
            if leaf.key.as_slice() >= from {
                return visit(&leaf.key, &leaf.value);
            }
            Ok(true)
        }
        Node::Internal(n) => {
            path.push(&n.label, n.label_bit_length);
            // Subtrees wholly before `from` are pruned by comparing the
            // accumulated bit path against it.
            let cont = if key::cmp_bit_prefix(&path.bytes, path.bits, from) == Ordering::Less {
                true
            } else {
                // In-order: the co-located leaf has the shortest key in
                // this subtree, then the zero branch, then the one branch.
                let mut cont = true;
                ctx.resolve(&mut n.leaf)?;
                if let Some(Node::Leaf(leaf)) = n.leaf.node() {
                    if leaf.key.as_slice() >= from {
                        cont = visit(&leaf.key, &leaf.value)?;
                    }
                }
                if cont {
                    path.push_bit(false);
                    cont = walk_from(ctx, &mut n.left, path, from, visit)?;
                    path.pop(1);
                }
                if cont {
                    path.push_bit(true);
                    cont = walk_from(ctx, &mut n.right, path, from, visit)?;
                    path.pop(1);
                }
                cont
            };
            path.pop(n.label_bit_length);
            Ok(cont)
        }
    }
}
