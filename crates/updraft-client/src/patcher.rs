//! Patch-chain application.
//!
//! Starting from the installed archive's bytes, every patch between the
//! current and the highest advertised version is downloaded into memory and
//! folded through the binary-diff codec. The result only reaches disk after
//! its digest matches the manifest entry for the target version. Any failure
//! along the way is reported to the caller, which falls back to a full
//! download; nothing here is fatal to the update run.

use crate::download::{CancelFlag, Downloader, ProgressHooks, Transport};
use crate::error::{ClientError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use updraft_core::{bsdiff, sha256_hex, Manifest, PlatformTag, Version};

/// Applies the patch chain for one `(name, platform)` pair.
pub struct Patcher<'a, T: Transport + ?Sized> {
    transport: &'a T,
    manifest: &'a Manifest,
    name: &'a str,
    platform: &'a PlatformTag,
    current_version: &'a Version,
    mirrors: &'a [String],
    update_dir: &'a Path,
    hooks: &'a ProgressHooks,
}

impl<'a, T: Transport + ?Sized> Patcher<'a, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: &'a T,
        manifest: &'a Manifest,
        name: &'a str,
        platform: &'a PlatformTag,
        current_version: &'a Version,
        mirrors: &'a [String],
        update_dir: &'a Path,
        hooks: &'a ProgressHooks,
    ) -> Self {
        Patcher {
            transport,
            manifest,
            name,
            platform,
            current_version,
            mirrors,
            update_dir,
            hooks,
        }
    }

    /// Run the whole chain and stage the target archive. Returns the staged
    /// path on success.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<PathBuf> {
        info!("starting patch update");
        let base = self.verify_installed()?;
        let chain = self.required_patches()?;

        let target_version = self
            .manifest
            .latest_version(self.name, self.platform)
            .ok_or(ClientError::InstalledMismatch)?;
        let target = self
            .manifest
            .entry(self.name, &target_version, self.platform)
            .ok_or(ClientError::InstalledMismatch)?;

        let mut binary = base;
        for (version, patch_name, patch_hash) in &chain {
            cancel.check()?;
            debug!(%version, patch = %patch_name, "downloading patch");
            let blob = Downloader::new(
                self.transport,
                patch_name,
                self.mirrors,
                Some(patch_hash),
                self.hooks,
            )
            .download_verify_return()
            .await?;
            binary = bsdiff::patch(&binary, &blob)?;
        }

        let actual = sha256_hex(&binary);
        if actual != target.file_hash {
            warn!("patched result does not hash to manifest value");
            return Err(ClientError::FinalHashMismatch {
                expected: target.file_hash.clone(),
                actual,
            });
        }

        let staged = self.update_dir.join(&target.filename);
        let mut temp = NamedTempFile::new_in(self.update_dir)?;
        temp.write_all(&binary)?;
        temp.flush()?;
        temp.persist(&staged)
            .map_err(|err| ClientError::Io(err.error))?;
        info!(path = %staged.display(), "staged patched archive");
        Ok(staged)
    }

    /// Check the installed archive against its recorded fingerprint and
    /// return its bytes as the patch base.
    fn verify_installed(&self) -> Result<Vec<u8>> {
        let entry = self
            .manifest
            .entry(self.name, self.current_version, self.platform)
            .ok_or(ClientError::InstalledMismatch)?;
        let installed = self.update_dir.join(&entry.filename);
        if !installed.exists() {
            debug!(path = %installed.display(), "no base binary to start patching from");
            return Err(ClientError::InstalledMismatch);
        }
        let bytes = fs::read(&installed)?;
        if sha256_hex(&bytes) != entry.file_hash {
            debug!("binary hash mismatch");
            return Err(ClientError::InstalledMismatch);
        }
        debug!("binary found and verified");
        Ok(bytes)
    }

    /// All `(version, patch_name, patch_hash)` steps above the current
    /// version, ascending. A step without patch metadata aborts the chain.
    fn required_patches(&self) -> Result<Vec<(Version, String, String)>> {
        let mut chain = Vec::new();
        for version in self.manifest.versions(self.name, self.platform) {
            if version <= *self.current_version {
                continue;
            }
            let entry = self
                .manifest
                .entry(self.name, &version, self.platform)
                .ok_or_else(|| ClientError::PatchUnavailable {
                    version: version.to_string(),
                })?;
            match (&entry.patch_name, &entry.patch_hash) {
                (Some(patch_name), Some(patch_hash)) => {
                    chain.push((version, patch_name.clone(), patch_hash.clone()));
                }
                _ => {
                    return Err(ClientError::PatchUnavailable {
                        version: version.to_string(),
                    })
                }
            }
        }
        Ok(chain)
    }
}
