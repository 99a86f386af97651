//! The wire-stable error surface of the store.

/// Store errors. Every variant maps onto a stable wire code via
/// [`Error::code`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested record does not exist.
    #[error("not found")]
    NotFound,

    /// An encoded node failed to decode.
    #[error("malformed node: {0}")]
    MalformedNode(String),

    /// The key is not usable with the store.
    #[error("malformed key: {0}")]
    MalformedKey(String),

    /// A computed root did not match the expected one.
    #[error("hash mismatch: expected {expected}, computed {computed}")]
    HashMismatch {
        /// The root the caller claimed.
        expected: String,
        /// The root the store computed.
        computed: String,
    },

    /// A proof failed verification.
    #[error("proof verification failed: {0}")]
    ProofVerifyFailed(String),

    /// The requested root is not known to the store.
    #[error("root not found: {0}")]
    RootNotFound(String),

    /// The requested version is not known to the store.
    #[error("version not found: {0}")]
    VersionNotFound(u64),

    /// The round was already finalized with a different root set.
    #[error("round already finalized: {0}")]
    AlreadyFinalized(u64),

    /// A request or response limit was exceeded.
    #[error("limit reached: {0}")]
    LimitReached(&'static str),

    /// The operation was canceled through its cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable wire code of the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound => "NotFound",
            Error::MalformedNode(_) => "MalformedNode",
            Error::MalformedKey(_) => "MalformedKey",
            Error::HashMismatch { .. } => "HashMismatch",
            Error::ProofVerifyFailed(_) => "ProofVerifyFailed",
            Error::RootNotFound(_) => "RootNotFound",
            Error::VersionNotFound(_) => "VersionNotFound",
            Error::AlreadyFinalized(_) => "AlreadyFinalized",
            Error::LimitReached(_) => "LimitReached",
            Error::Canceled => "Canceled",
            Error::Internal(_) => "Internal",
        }
    }

    /// True for errors that a retry of the same operation cannot fix.
    ///
    /// Cancellation is deliberately transient: a retry with the same apply
    /// fingerprint is expected and coalesces with any result the first
    /// attempt already published.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::MalformedNode(_)
                | Error::MalformedKey(_)
                | Error::HashMismatch { .. }
                | Error::ProofVerifyFailed(_)
                | Error::AlreadyFinalized(_)
        )
    }
}

impl From<mkvs_tree::Error> for Error {
    fn from(e: mkvs_tree::Error) -> Self {
        use mkvs_tree::Error as T;
        match e {
            T::NodeNotFound(_) => Error::NotFound,
            T::MalformedNode(m) => Error::MalformedNode(m),
            T::MalformedKey(m) => Error::MalformedKey(m.to_string()),
            T::ProofVerifyFailed(m) => Error::ProofVerifyFailed(m),
            T::ProofCreation(m) => Error::Internal(m.to_string()),
            T::LimitReached => Error::LimitReached("sync response limit"),
            T::Canceled => Error::Canceled,
            T::Storage(e) => Error::Internal(e.to_string()),
        }
    }
}

impl From<mkvs_storage::Error> for Error {
    fn from(e: mkvs_storage::Error) -> Self {
        Error::Internal(e.to_string())
    }
}
