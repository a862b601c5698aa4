//! Classification of incoming release archives.
//!
//! Every inbox entry either becomes a [`Package`] with its content hash, or
//! a [`Rejection`] carrying the reason it was excluded. A rejection never
//! aborts ingestion; the rest of the batch is still processed.

use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;
use updraft_core::{file_sha256_hex, ArchiveName, CoreError, PlatformTag, Version};

/// A validated release archive ready for ingestion.
///
/// Once the hash is computed the file is treated as immutable; the filename
/// uniquely identifies the byte content from here on.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub platform: PlatformTag,
    pub filename: String,
    pub path: PathBuf,
    pub file_hash: String,
}

/// Why an inbox entry was excluded from processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Dotfiles are never release archives.
    Ignored,
    /// Extension outside {zip, tar.gz}.
    UnsupportedArchive,
    /// Version segment failed to parse.
    MalformedVersion,
    /// Filename did not split into `<name>-<platform>-<version>`.
    MalformedPlatform,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RejectReason::Ignored => "ignored (dotfile)",
            RejectReason::UnsupportedArchive => "unsupported archive",
            RejectReason::MalformedVersion => "malformed version",
            RejectReason::MalformedPlatform => "malformed platform",
        };
        f.write_str(text)
    }
}

/// An excluded inbox entry.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub filename: String,
    pub reason: RejectReason,
}

/// Outcome of classifying one inbox entry.
#[derive(Debug)]
pub enum Classification {
    Valid(Box<Package>),
    Rejected(Rejection),
}

/// Classify one inbox entry, hashing it when it passes all checks.
///
/// Only hashing can fail with an error; every grammar problem is reported as
/// a [`Rejection`].
pub fn classify(path: &Path) -> Result<Classification> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string();

    let reject = |reason| {
        Ok(Classification::Rejected(Rejection {
            filename: filename.clone(),
            reason,
        }))
    };

    if filename.starts_with('.') || filename.is_empty() {
        return reject(RejectReason::Ignored);
    }
    if updraft_core::platform::split_archive_ext(&filename).is_none() {
        return reject(RejectReason::UnsupportedArchive);
    }

    let parsed = match ArchiveName::parse(&filename) {
        Ok(parsed) => parsed,
        Err(CoreError::VersionParse(_)) => return reject(RejectReason::MalformedVersion),
        Err(_) => return reject(RejectReason::MalformedPlatform),
    };

    let file_hash = file_sha256_hex(path)?;
    debug!(%filename, hash = %file_hash, "classified package");
    Ok(Classification::Valid(Box::new(Package {
        name: parsed.name,
        version: parsed.version,
        platform: parsed.platform,
        filename,
        path: path.to_path_buf(),
        file_hash,
    })))
}
