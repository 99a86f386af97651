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

//! Diff and checkpoint streams.

use std::collections::VecDeque;

use mkvs_tree::{diff, LogEntry, Root, Tree, WriteLog};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{cache::DbSource, error::Error, Store};

/// Entries a checkpoint stream loads per descent.
const CHECKPOINT_CHUNK: usize = 256;

impl Store {
    /// Computes the write-log leading from `from` to `to`.
    ///
    /// Logs recorded by past applies are served from the write-log cache;
    /// anything else is reconstructed by parallel descent over the two
    /// trees and cached for next time.
    pub fn get_diff(
        &self,
        token: &CancellationToken,
        from: &Root,
        to: &Root,
    ) -> Result<WriteLog, Error> {
        if from.namespace != to.namespace {
            return Err(Error::Internal(
                "diff roots belong to different namespaces".into(),
            ));
        }
        if from.hash == to.hash {
            return Ok(WriteLog::new());
        }
        if let Some(log) = self.db.get_cached_write_log(from, to)? {
            return Ok(log);
        }

        let mut src = self.open_tree(token, from)?;
        let mut dst = self.open_tree(token, to)?;
        let log = diff::diff(&mut src, &mut dst).map_err(Error::from)?;
        self.db.put_cached_write_log(from, to, &log)?;
        debug!(
            from = %hex::encode(from.hash),
            to = %hex::encode(to.hash),
            entries = log.len(),
            "reconstructed write-log",
        );
        Ok(log)
    }

    /// Streams a checkpoint of `root`: every `(key, value)` pair reachable
    /// from it, in key order, as write-log entries that reproduce the root
    /// when applied against the empty tree.
    pub fn get_checkpoint(
        &self,
        token: &CancellationToken,
        root: &Root,
    ) -> Result<CheckpointStream, Error> {
        let tree = self.open_tree(token, root)?;
        Ok(CheckpointStream {
            tree,
            window: VecDeque::new(),
            next_from: Some(Vec::new()),
            chunk: CHECKPOINT_CHUNK,
        })
    }

    /// Applies a checkpoint stream against the empty tree and persists the
    /// result, verifying that it reproduces `root` exactly.
    pub fn restore_checkpoint(
        &self,
        token: &CancellationToken,
        root: &Root,
        entries: impl IntoIterator<Item = LogEntry>,
    ) -> Result<(), Error> {
        self.ensure_writable(&root.namespace)?;

        let mut tree = Tree::empty(DbSource::new(self.db.clone(), token.clone()));
        for entry in entries {
            if entry.is_delete() {
                return Err(Error::MalformedNode(
                    "checkpoint stream contains a deletion".into(),
                ));
            }
            tree.insert(&entry.key, &entry.value).map_err(Error::from)?;
        }
        let (computed, batch) = tree.commit(root.version).map_err(Error::from)?;
        if computed != root.hash {
            return Err(Error::HashMismatch {
                expected: hex::encode(root.hash),
                computed: hex::encode(computed),
            });
        }
        if token.is_cancelled() {
            return Err(Error::Canceled);
        }
        self.db.apply_batch(root, batch, None)?;
        debug!(root = %hex::encode(root.hash), "restored checkpoint");
        Ok(())
    }
}

/// An ordered stream of checkpoint entries, loaded in chunks.
pub struct CheckpointStream {
    tree: Tree<DbSource>,
    window: VecDeque<LogEntry>,
    next_from: Option<Vec<u8>>,
    chunk: usize,
}

impl CheckpointStream {
    fn refill(&mut self) -> Result<(), Error> {
        let Some(from) = self.next_from.take() else {
            return Ok(());
        };
        let window = &mut self.window;
        let chunk = self.chunk;
        self.tree.walk_from(&from, &mut |key, value| {
            window.push_back(LogEntry::new(key, value));
            Ok(window.len() < chunk)
        })?;
        if self.window.len() >= self.chunk {
            if let Some(last) = self.window.back() {
                let mut from = last.key.clone();
                from.push(0x00);
                self.next_from = Some(from);
            }
        }
        Ok(())
    }
}

impl Iterator for CheckpointStream {
    type Item = Result<LogEntry, Error>;

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

impl std::fmt::Debug for CheckpointStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointStream")
            .field("buffered", &self.window.len())
            .finish()
    }
}
