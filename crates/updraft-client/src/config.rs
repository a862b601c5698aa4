//! Client-side update context.
//!
//! Everything the updater needs arrives through this struct; there is no
//! global configuration and no process-wide mutable state.

use crate::error::Result;
use std::fs;
use std::path::PathBuf;
use updraft_core::{PlatformTag, Version};

/// Configuration for one application's update check.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application name; also the executable name inside archives.
    pub name: String,
    /// Version currently installed and running.
    pub current_version: Version,
    /// Platform tag of this build.
    pub platform: PlatformTag,
    /// Ordered mirror base URLs; earlier entries are preferred.
    pub mirrors: Vec<String>,
    /// Application data directory; staging happens in `update/` below it.
    pub data_dir: PathBuf,
    /// Verify TLS certificates on download connections.
    pub verify_tls: bool,
    /// Whether the patch path may be attempted before a full download.
    pub update_patches: bool,
}

impl ClientConfig {
    pub fn new(
        name: impl Into<String>,
        current_version: Version,
        platform: PlatformTag,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        ClientConfig {
            name: name.into(),
            current_version,
            platform,
            mirrors: Vec::new(),
            data_dir: data_dir.into(),
            verify_tls: true,
            update_patches: true,
        }
    }

    pub fn with_mirrors(mut self, mirrors: Vec<String>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Staging directory for downloads and extracted binaries.
    pub fn update_dir(&self) -> PathBuf {
        self.data_dir.join("update")
    }

    pub(crate) fn ensure_update_dir(&self) -> Result<()> {
        let dir = self.update_dir();
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}
