//! Client side of the updraft self-update framework.
//!
//! Embedded in a deployed application, this crate fetches the signed version
//! manifest over an ordered mirror list, verifies its Ed25519 signatures
//! against the public keys compiled into the build, then either walks the
//! binary patch chain from the installed version or downloads the full
//! archive, verifies the result by SHA-256, and atomically swaps the running
//! executable.
//!
//! ```ignore
//! use std::time::Duration;
//! use updraft_client::{ClientConfig, HttpTransport, UpdateStatus, Updater};
//! use updraft_core::{PlatformTag, Version};
//!
//! # async fn demo(trusted: Vec<ed25519_dalek::VerifyingKey>) -> updraft_client::Result<()> {
//! let config = ClientConfig::new(
//!     "app",
//!     Version::parse(env!("CARGO_PKG_VERSION"))?,
//!     PlatformTag::parse("nix64")?,
//!     "/home/user/.app",
//! )
//! .with_mirrors(vec!["https://updates.example.com/app".into()]);
//!
//! let transport = HttpTransport::new(config.verify_tls, Duration::from_secs(60))?;
//! let mut updater = Updater::new(config, transport, trusted)?;
//! if let UpdateStatus::Available(version) = updater.check().await? {
//!     tracing::info!(%version, "updating");
//!     updater.download().await?;
//!     updater.extract().await?;
//!     updater.restart()?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod download;
pub mod error;
pub mod patcher;
pub mod swap;
pub mod updater;

pub use config::ClientConfig;
pub use download::{
    CancelFlag, DownloadSink, DownloadStatus, Downloader, HttpTransport, ProgressEvent,
    ProgressHooks, Transport,
};
pub use error::{ClientError, Result};
pub use patcher::Patcher;
pub use swap::SwapStrategy;
pub use updater::{UpdateState, UpdateStatus, UpdateTarget, Updater};
