//! Ordered cursor over the tree.

use std::collections::VecDeque;

use crate::{
    error::Error,
    tree::{NodeSource, Tree},
};

/// How many entries a cursor loads per descent.
const DEFAULT_BATCH: usize = 64;

impl<S: NodeSource> Tree<S> {
    /// Creates an ordered cursor positioned at the first key.
    pub fn iter(&mut self) -> TreeIterator<'_, S> {
        TreeIterator::new(self, DEFAULT_BATCH)
    }
}

/// A restartable, ordered cursor over the tree's `(key, value)` pairs.
///
/// The cursor keeps its position as a key and refills an internal window
/// by descending from the root, so [`TreeIterator::seek`] can reposition
/// it at the smallest key greater than or equal to any target at any time.
pub struct TreeIterator<'t, S: NodeSource> {
    tree: &'t mut Tree<S>,
    window: VecDeque<(Vec<u8>, Vec<u8>)>,
    next_from: Option<Vec<u8>>,
    batch: usize,
}

impl<'t, S: NodeSource> TreeIterator<'t, S> {
    pub(crate) fn new(tree: &'t mut Tree<S>, batch: usize) -> Self {
        Self {
            tree,
            window: VecDeque::new(),
            next_from: Some(Vec::new()),
            batch: batch.max(1),
        }
    }

    /// Repositions the cursor at the smallest key `>= key`.
    pub fn seek(&mut self, key: &[u8]) {
        self.window.clear();
        self.next_from = Some(key.to_vec());
    }

    fn refill(&mut self) -> Result<(), Error> {
        let Some(from) = self.next_from.take() else {
            return Ok(());
        };
        let window = &mut self.window;
        let batch = self.batch;
        self.tree.walk_from(&from, &mut |key, value| {
            window.push_back((key.to_vec(), value.to_vec()));
            Ok(window.len() < batch)
        })?;
        if self.window.len() >= self.batch {
            // The walk may have stopped early; resume at the successor of
            // the last key seen.
            if let Some((last, _)) = self.window.back() {
                let mut from = last.clone();
                from.push(0x00);
                self.next_from = Some(from);
            }
        }
        Ok(())
    }
}

impl<'t, S: NodeSource> Iterator for TreeIterator<'t, S> {
    type Item = Result<(Vec<u8>, Vec<u8>), Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.window.is_empty() {
            self.next_from.as_ref()?;
            if let Err(e) = self.refill() {
                self.next_from = None;
                return Some(Err(e));
            }
        }
        self.window.pop_front().map(Ok)
    }
}
