use std::path::PathBuf;

/// Convenient result alias for builder operations.
pub type Result<T> = std::result::Result<T, BuilderError>;

/// Errors raised on the developer side of the framework.
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
    /// A shared-engine operation failed.
    #[error(transparent)]
    Core(#[from] updraft_core::CoreError),
    /// Filesystem access failed.
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Persisted state could not be encoded or decoded.
    #[error("state serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// The key store lock was poisoned by a panicking writer.
    #[error("key store lock poisoned")]
    KeyStoreLock,
    /// Signing requires at least two live keys so a revocation always
    /// leaves a fallback.
    #[error("need at least 2 non-revoked signing keys, have {have}")]
    NotEnoughSigningKeys { have: usize },
    /// A directory the pipeline depends on is missing.
    #[error("missing working directory: {0}")]
    MissingDir(PathBuf),
}
