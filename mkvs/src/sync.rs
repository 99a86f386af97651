//! The sync server: proof-producing remote reads.

use mkvs_tree::{
    GetPrefixesRequest, GetRequest, IterateRequest, ProofResponse, Root, TraversalLimits, Tree,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{cache::DbSource, error::Error, Store};

/// Read-only, proof-producing access to a tree server.
pub trait ReadSync {
    /// Serves a point read.
    fn sync_get(
        &self,
        token: &CancellationToken,
        request: &GetRequest,
    ) -> Result<ProofResponse, Error>;

    /// Serves a prefix fetch.
    fn sync_get_prefixes(
        &self,
        token: &CancellationToken,
        request: &GetPrefixesRequest,
    ) -> Result<ProofResponse, Error>;

    /// Serves an ordered iteration window.
    fn sync_iterate(
        &self,
        token: &CancellationToken,
        request: &IterateRequest,
    ) -> Result<ProofResponse, Error>;
}

impl Store {
    fn limits(&self) -> TraversalLimits {
        TraversalLimits {
            max_nodes: self.cfg.sync_max_nodes,
            max_bytes: self.cfg.sync_max_bytes,
        }
    }

    /// Runs `op` on a recording tree opened at `root` and wraps the proof.
    ///
    /// An operation aborted by a traversal limit still yields a valid
    /// proof over everything visited; the response is marked partial so
    /// the caller resumes with a follow-up request.
    fn record<F>(
        &self,
        token: &CancellationToken,
        root: &Root,
        truncated: bool,
        op: F,
    ) -> Result<ProofResponse, Error>
    where
        F: FnOnce(&mut Tree<DbSource>) -> Result<(), mkvs_tree::Error>,
    {
        let mut tree = self.open_tree(token, root)?;
        tree.start_recording(self.limits()).map_err(Error::from)?;
        let mut partial = truncated;
        match op(&mut tree) {
            Ok(()) => {}
            Err(mkvs_tree::Error::LimitReached) => partial = true,
            Err(e) => return Err(e.into()),
        }
        let proof = tree.end_recording().map_err(Error::from)?;
        debug!(
            root = %hex::encode(root.hash),
            entries = proof.entries.len(),
            partial,
            "served sync request",
        );
        Ok(ProofResponse { proof, partial })
    }
}

impl ReadSync for Store {
    fn sync_get(
        &self,
        token: &CancellationToken,
        request: &GetRequest,
    ) -> Result<ProofResponse, Error> {
        self.record(token, &request.tree, false, |tree| {
            tree.get(&request.key).map(|_| ())
        })
    }

    fn sync_get_prefixes(
        &self,
        token: &CancellationToken,
        request: &GetPrefixesRequest,
    ) -> Result<ProofResponse, Error> {
        let limit = request.limit.min(self.cfg.sync_max_keys);
        self.record(token, &request.tree, limit < request.limit, |tree| {
            tree.get_prefixes(&request.prefixes, limit).map(|_| ())
        })
    }

    fn sync_iterate(
        &self,
        token: &CancellationToken,
        request: &IterateRequest,
    ) -> Result<ProofResponse, Error> {
        let limit = request.prefetch.min(self.cfg.sync_max_keys);
        self.record(token, &request.tree, limit < request.prefetch, |tree| {
            if limit == 0 {
                return Ok(());
            }
            let mut remaining = limit;
            tree.walk_from(&request.key, &mut |_, _| {
                remaining -= 1;
                Ok(remaining > 0)
            })
        })
    }
}
