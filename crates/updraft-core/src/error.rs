use std::path::PathBuf;

/// Convenient result alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors produced by the shared update engine.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    /// A release number could not be parsed.
    #[error("cannot parse version from {0:?}")]
    VersionParse(String),
    /// A platform tag did not match the closed tag grammar.
    #[error("cannot parse platform tag from {0:?}")]
    PlatformParse(String),
    /// A patch blob was malformed or did not fit its source.
    #[error("patch is corrupt: {0}")]
    PatchCorrupt(&'static str),
    /// No manifest signature could be verified with a trusted key.
    #[error("manifest signature invalid")]
    SignatureInvalid,
    /// Key material could not be decoded.
    #[error("malformed {kind} key: {detail}")]
    MalformedKey {
        /// `"public"` or `"private"`.
        kind: &'static str,
        detail: String,
    },
    /// JSON encoding or decoding failed.
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Filesystem or stream I/O failed.
    #[error("i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// A file expected by the engine is missing.
    #[error("file not found: {0}")]
    MissingFile(PathBuf),
}
