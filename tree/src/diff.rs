//! Write-log reconstruction between two roots.
//!
//! Two trees are descended in parallel; subtrees sharing a hash are
//! skipped wholesale. Where the trees keep the same shape (equal labels)
//! the descent stays structural, otherwise both subtrees are enumerated
//! and merge-joined, which only happens around the edit sites themselves.

use crate::{
    error::Error,
    tree::{Ctx, Node, NodeSource, Pointer, Tree},
    writelog::{LogEntry, WriteLog},
};

/// Computes the write-log that transforms the contents of `a` into the
/// contents of `b`, in key order.
pub fn diff<A: NodeSource, B: NodeSource>(
    a: &mut Tree<A>,
    b: &mut Tree<B>,
) -> Result<WriteLog, Error> {
    let mut log = WriteLog::new();
    let (mut ctx_a, root_a) = a.ctx();
    let (mut ctx_b, root_b) = b.ctx();
    diff_at(&mut ctx_a, root_a, &mut ctx_b, root_b, &mut log)?;
    Ok(log)
}

fn diff_at<A: NodeSource, B: NodeSource>(
    ctx_a: &mut Ctx<'_, A>,
    a: &mut Pointer,
    ctx_b: &mut Ctx<'_, B>,
    b: &mut Pointer,
    log: &mut WriteLog,
) -> Result<(), Error> {
    // Shared subtrees contribute nothing.
    if let (Some(ha), Some(hb)) = (a.clean_hash(), b.clean_hash()) {
        if ha == hb {
            return Ok(());
        }
    }
    ctx_a.resolve(a)?;
    ctx_b.resolve(b)?;

    match (a.node().is_some(), b.node().is_some()) {
        (false, false) => return Ok(()),
        (false, true) => {
            let mut added = Vec::new();
            collect(ctx_b, b, &mut added)?;
            log.extend(added.into_iter().map(|(k, v)| LogEntry::new(k, v)));
            return Ok(());
        }
        (true, false) => {
            let mut removed = Vec::new();
            collect(ctx_a, a, &mut removed)?;
            log.extend(removed.into_iter().map(|(k, _)| LogEntry::delete(k)));
            return Ok(());
        }
        (true, true) => {}
    }

    let aligned = matches!(
        (a.node(), b.node()),
        (Some(Node::Internal(na)), Some(Node::Internal(nb)))
            if na.label_bit_length == nb.label_bit_length && na.label == nb.label
    );

    if aligned {
        let (Some(Node::Internal(na)), Some(Node::Internal(nb))) = (a.node_mut(), b.node_mut())
        else {
            unreachable!("alignment was just checked");
        };
        ctx_a.resolve(&mut na.leaf)?;
        ctx_b.resolve(&mut nb.leaf)?;
        match (leaf_of(&na.leaf), leaf_of(&nb.leaf)) {
            (None, None) => {}
            (Some((k, _)), None) => log.push(LogEntry::delete(k)),
            (None, Some((k, v))) => log.push(LogEntry::new(k, v)),
            (Some((_, va)), Some((k, vb))) => {
                // Both keys end exactly at this node, so they are equal.
                if va != vb {
                    log.push(LogEntry::new(k, vb));
                }
            }
        }
        diff_at(ctx_a, &mut na.left, ctx_b, &mut nb.left, log)?;
        diff_at(ctx_a, &mut na.right, ctx_b, &mut nb.right, log)?;
    } else {
        let mut ea = Vec::new();
        collect(ctx_a, a, &mut ea)?;
        let mut eb = Vec::new();
        collect(ctx_b, b, &mut eb)?;
        merge_join(ea, eb, log);
    }
    Ok(())
}

fn leaf_of(ptr: &Pointer) -> Option<(Vec<u8>, Vec<u8>)> {
    match ptr.node() {
        Some(Node::Leaf(leaf)) => Some((leaf.key.clone(), leaf.value.clone())),
        _ => None,
    }
}

/// Enumerates every `(key, value)` pair of a subtree in key order.
fn collect<S: NodeSource>(
    ctx: &mut Ctx<'_, S>,
    ptr: &mut Pointer,
    out: &mut Vec<(Vec<u8>, Vec<u8>)>,
) -> Result<(), Error> {
    ctx.resolve(ptr)?;
    let Some(node) = ptr.node_mut() else {
        return Ok(());
    };
    match node {
        Node::Leaf(leaf) => {
            out.push((leaf.key.clone(), leaf.value.clone()));
            Ok(())
        }
        Node::Internal(n) => {
            ctx.resolve(&mut n.leaf)?;
            if let Some(Node::Leaf(leaf)) = n.leaf.node() {
                out.push((leaf.key.clone(), leaf.value.clone()));
            }
            collect(ctx, &mut n.left, out)?;
            collect(ctx, &mut n.right, out)
        }
    }
}

fn merge_join(
    mut ea: Vec<(Vec<u8>, Vec<u8>)>,
    mut eb: Vec<(Vec<u8>, Vec<u8>)>,
    log: &mut WriteLog,
) {
    let mut x = 0;
    let mut y = 0;
    while x < ea.len() || y < eb.len() {
        if y >= eb.len() || (x < ea.len() && ea[x].0 < eb[y].0) {
            let (k, _) = std::mem::take(&mut ea[x]);
            log.push(LogEntry::delete(k));
            x += 1;
        } else if x >= ea.len() || eb[y].0 < ea[x].0 {
            let (k, v) = std::mem::take(&mut eb[y]);
            log.push(LogEntry::new(k, v));
            y += 1;
        } else {
            let (_, va) = std::mem::take(&mut ea[x]);
            let (k, vb) = std::mem::take(&mut eb[y]);
            if va != vb {
                log.push(LogEntry::new(k, vb));
            }
            x += 1;
            y += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::diff;
    use crate::{
        test_utils::populate,
        tree::{NullSource, Tree},
        writelog::LogEntry,
    };

    fn tree_of(pairs: &[(&[u8], &[u8])]) -> Tree<NullSource> {
        let mut tree = Tree::empty(NullSource);
        for (key, value) in pairs {
            tree.insert(key, value).unwrap();
        }
        tree.commit(1).unwrap();
        tree
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let mut a = tree_of(&[(b"a", b"1"), (b"b", b"2")]);
        let mut b = tree_of(&[(b"a", b"1"), (b"b", b"2")]);
        assert_eq!(diff(&mut a, &mut b).unwrap(), vec![]);
    }

    #[test]
    fn diff_emits_sorted_edits() {
        let mut a = tree_of(&[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]);
        let mut b = tree_of(&[(b"b", b"2"), (b"c", b"4"), (b"d", b"5")]);

        let log = diff(&mut a, &mut b).unwrap();
        assert_eq!(
            log,
            vec![
                LogEntry::delete(&b"a"[..]),
                LogEntry::new(&b"c"[..], &b"4"[..]),
                LogEntry::new(&b"d"[..], &b"5"[..]),
            ]
        );
    }

    #[test]
    fn replaying_the_diff_reproduces_the_destination() {
        let mut a = Tree::empty(NullSource);
        let mut pairs = populate(&mut a, 80);
        a.commit(1).unwrap();

        // Build the destination from the same committed base so shared
        // subtrees keep identical version stamps.
        let mut b = Tree::empty(NullSource);
        for (key, value) in &pairs {
            b.insert(key, value).unwrap();
        }
        b.commit(1).unwrap();

        // Mutate a slice of the key space.
        for (key, _) in pairs.drain(..20) {
            b.remove(&key).unwrap();
        }
        b.insert(b"zz new key", b"zz").unwrap();
        b.insert(b"key 50", b"rewritten").unwrap();
        let (b_root, _) = b.commit(2).unwrap();

        let log = diff(&mut a, &mut b).unwrap();
        a.apply_write_log(&log).unwrap();
        let (replayed_root, _) = a.commit(2).unwrap();
        assert_eq!(replayed_root, b_root);
    }
}
