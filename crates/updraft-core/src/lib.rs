//! Shared engine for the updraft self-update framework.
//!
//! Everything the developer side and the deployed client must agree on lives
//! here: the release-number grammar and ordering, SHA-256 content
//! fingerprints, the bsdiff4-compatible binary-diff codec, the signed
//! version-manifest data model and its canonical signing payload, and
//! Ed25519 multi-signature production and verification under key rotation.
//!
//! The developer-side pipeline is `updraft-builder`; the client-side state
//! machine is `updraft-client`. Both depend on this crate and nothing in
//! here touches the network or the process image.

pub mod bsdiff;
pub mod error;
pub mod hash;
pub mod manifest;
pub mod platform;
pub mod sign;
pub mod version;

pub use error::{CoreError, Result};
pub use hash::{file_sha256_hex, sha256_hex, StreamHasher};
pub use manifest::{star_get, Manifest, PackageEntry};
pub use platform::{ArchiveName, PlatformTag};
pub use version::{Channel, Version};
