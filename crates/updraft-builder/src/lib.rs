//! Developer side of the updraft self-update framework.
//!
//! The pipeline ingests built application archives from an inbox, computes
//! binary diffs against the previous release on a worker pool, records
//! filenames, hashes and patch metadata in the version manifest, signs the
//! manifest with every live key from the rotating key store and stages all
//! artifacts in a deploy directory ready for upload.
//!
//! ```ignore
//! use updraft_builder::{Builder, BuilderConfig};
//!
//! # fn demo() -> updraft_builder::Result<()> {
//! let builder = Builder::open(BuilderConfig::new("app", "/srv/releases"))?;
//! let mut manifest = builder.load_manifest()?;
//! builder.process_packages(&mut manifest)?;
//! builder.sign_update(&mut manifest)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod ingest;
pub mod keystore;
pub mod package;
pub mod patch;
pub mod pipeline;
pub mod signer;
pub mod store;

pub use config::BuilderConfig;
pub use error::{BuilderError, Result};
pub use ingest::{IngestReport, Ingestor};
pub use keystore::{KeyRecord, KeyStore};
pub use package::{Classification, Package, RejectReason, Rejection};
pub use patch::{PatchJob, PatchResult};
pub use pipeline::Builder;
pub use signer::ManifestSigner;
pub use store::{BuilderState, StateStore};
