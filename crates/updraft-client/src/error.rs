/// Convenient result alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised while checking for, downloading or applying an update.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// A shared-engine operation failed (version grammar, patch codec,
    /// signature verification, ...).
    #[error(transparent)]
    Core(#[from] updraft_core::CoreError),
    /// Filesystem access failed.
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// An HTTP request failed.
    #[error("transfer failed: {0}")]
    Http(#[from] reqwest::Error),
    /// JSON decoding failed.
    #[error("decoding failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A mirror URL could not be combined with the target filename.
    #[error("bad mirror url: {0}")]
    BadMirror(String),
    /// Every configured mirror failed or served bad bytes.
    #[error("all mirrors failed for {filename}")]
    AllMirrorsFailed { filename: String },
    /// A downloaded file's digest did not match the manifest.
    #[error("hash mismatch for {filename} (expected {expected}, got {actual})")]
    HashMismatch {
        filename: String,
        expected: String,
        actual: String,
    },
    /// The installed archive is absent or does not match its recorded hash,
    /// so there is no trusted base to patch from.
    #[error("installed binary does not match recorded fingerprint")]
    InstalledMismatch,
    /// A version inside the patch chain has no patch metadata.
    #[error("no patch available for version {version}")]
    PatchUnavailable { version: String },
    /// The fully patched binary did not hash to the manifest value.
    #[error("patched result hash mismatch (expected {expected}, got {actual})")]
    FinalHashMismatch { expected: String, actual: String },
    /// Replacing the live executable failed; the staged file was removed.
    #[error("swap failed: {0}")]
    SwapFailed(String),
    /// The run was cancelled between steps.
    #[error("cancelled")]
    Cancelled,
    /// A state-machine method was called out of order.
    #[error("cannot {event} while {from}")]
    InvalidTransition {
        from: &'static str,
        event: &'static str,
    },
    /// Attempted an operation this platform cannot perform.
    #[error("unsupported operation on this platform: {0}")]
    Unsupported(&'static str),
}
