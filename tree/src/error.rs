//! Errors

/// Tree-level errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A node referenced by hash could not be produced by the node source.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// A node failed to decode, or an in-memory node violated a structural
    /// invariant while being encoded.
    #[error("malformed node: {0}")]
    MalformedNode(String),

    /// The key is not usable with this tree.
    #[error("malformed key: {0}")]
    MalformedKey(&'static str),

    /// Proof creation error.
    #[error("proof creation error: {0}")]
    ProofCreation(&'static str),

    /// Invalid proof error.
    #[error("proof verification failed: {0}")]
    ProofVerifyFailed(String),

    /// A traversal limit was hit before the operation completed.
    #[error("traversal limit reached")]
    LimitReached,

    /// The operation was canceled through its cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] mkvs_storage::Error),
}

impl From<ed::Error> for Error {
    fn from(e: ed::Error) -> Self {
        Error::MalformedNode(e.to_string())
    }
}
