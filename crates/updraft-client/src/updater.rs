//! The client update state machine.
//!
//! One run walks check → download → extract → restart strictly in order;
//! phases never overlap, so the whole machine is sequential and needs no
//! locking. Nothing is written into the application directory before the
//! manifest signature has verified and the downloaded bytes hash to the
//! manifest value. A cancel signal observed between states moves the
//! machine to `Failed`; in-flight transfers stop at the next file boundary.

use crate::config::ClientConfig;
use crate::download::{CancelFlag, Downloader, ProgressEvent, ProgressHooks, Transport};
use crate::error::{ClientError, Result};
use crate::patcher::Patcher;
use crate::swap::{self, SwapStrategy};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};
use updraft_core::manifest::MANIFEST_FILENAME;
use updraft_core::{file_sha256_hex, sign, ArchiveName, Manifest, Version};

/// Where the machine currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    Idle,
    HaveTarget,
    TryPatch,
    FullDownload,
    Downloaded,
    Extracted,
    Ready,
    Restarted,
    Failed,
}

impl UpdateState {
    pub fn name(self) -> &'static str {
        match self {
            UpdateState::Idle => "idle",
            UpdateState::HaveTarget => "have-target",
            UpdateState::TryPatch => "try-patch",
            UpdateState::FullDownload => "full-download",
            UpdateState::Downloaded => "downloaded",
            UpdateState::Extracted => "extracted",
            UpdateState::Ready => "ready",
            UpdateState::Restarted => "restarted",
            UpdateState::Failed => "failed",
        }
    }
}

/// Result of a version check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    /// Already at the highest advertised version.
    UpToDate,
    /// A newer version is advertised.
    Available(Version),
}

/// The release the machine is updating towards.
#[derive(Debug, Clone)]
pub struct UpdateTarget {
    pub version: Version,
    pub filename: String,
    pub file_hash: String,
}

/// Drives one update run for a deployed application.
pub struct Updater<T: Transport> {
    config: ClientConfig,
    transport: T,
    trusted_keys: Vec<ed25519_dalek::VerifyingKey>,
    hooks: ProgressHooks,
    cancel: CancelFlag,
    state: UpdateState,
    manifest: Option<Manifest>,
    target: Option<UpdateTarget>,
}

impl<T: Transport> Updater<T> {
    /// Create a fresh machine in `Idle`. `trusted_keys` are the public keys
    /// compiled into this client build, oldest first.
    pub fn new(
        config: ClientConfig,
        transport: T,
        trusted_keys: Vec<ed25519_dalek::VerifyingKey>,
    ) -> Result<Self> {
        config.ensure_update_dir()?;
        Ok(Updater {
            config,
            transport,
            trusted_keys,
            hooks: ProgressHooks::new(),
            cancel: CancelFlag::new(),
            state: UpdateState::Idle,
            manifest: None,
            target: None,
        })
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn target(&self) -> Option<&UpdateTarget> {
        self.target.as_ref()
    }

    /// Handle that cancels this run from another task or thread.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn add_progress_hook(&mut self, hook: Arc<dyn Fn(&ProgressEvent) + Send + Sync>) {
        self.hooks.add(hook);
    }

    /// Fetch and verify the manifest, then decide whether an update exists.
    ///
    /// Ends in `HaveTarget` when a higher version is advertised, `Ready`
    /// when already current, `Failed` on signature or transport problems.
    pub async fn check(&mut self) -> Result<UpdateStatus> {
        self.expect(UpdateState::Idle, "check")?;
        self.checkpoint()?;

        let outcome = self.fetch_manifest().await;
        let manifest = match outcome {
            Ok(manifest) => manifest,
            Err(err) => return Err(self.fail(err)),
        };

        if let Err(err) = sign::verify_manifest(&manifest, &self.trusted_keys) {
            warn!("manifest signature rejected");
            return Err(self.fail(err.into()));
        }

        let latest = manifest.latest_version(&self.config.name, &self.config.platform);
        let entry = latest
            .as_ref()
            .filter(|latest| **latest > self.config.current_version)
            .and_then(|latest| manifest.entry(&self.config.name, latest, &self.config.platform));
        let status = match (latest, entry) {
            (Some(latest), Some(entry)) => {
                info!(version = %latest, "update available");
                self.target = Some(UpdateTarget {
                    version: latest.clone(),
                    filename: entry.filename.clone(),
                    file_hash: entry.file_hash.clone(),
                });
                self.state = UpdateState::HaveTarget;
                UpdateStatus::Available(latest)
            }
            (Some(latest), None) if latest > self.config.current_version => {
                // A latest pointer with no matching entry means the manifest
                // is inconsistent; do not chase it.
                warn!(version = %latest, "latest pointer has no manifest entry");
                self.state = UpdateState::Ready;
                UpdateStatus::UpToDate
            }
            _ => {
                info!("no update available");
                self.state = UpdateState::Ready;
                UpdateStatus::UpToDate
            }
        };
        self.manifest = Some(manifest);
        Ok(status)
    }

    /// Obtain the target archive, preferring the patch chain and falling
    /// back to a full download. Ends in `Downloaded` or `Failed`.
    pub async fn download(&mut self) -> Result<()> {
        self.expect(UpdateState::HaveTarget, "download")?;
        self.checkpoint()?;
        let target = match self.target.clone() {
            Some(target) => target,
            None => {
                return Err(self.fail(ClientError::InvalidTransition {
                    from: self.state.name(),
                    event: "download",
                }))
            }
        };

        if self.is_downloaded(&target) {
            info!("target archive already staged");
            return self.downloaded(&target);
        }

        if self.config.update_patches {
            self.state = UpdateState::TryPatch;
            info!("starting patch download");
            let outcome = self.try_patch().await;
            match outcome {
                Ok(()) => {
                    info!("patch download successful");
                    return self.downloaded(&target);
                }
                Err(ClientError::Cancelled) => return Err(self.fail(ClientError::Cancelled)),
                Err(err) => {
                    warn!(%err, "patch update failed, starting full download");
                }
            }
        }

        self.state = UpdateState::FullDownload;
        self.checkpoint()?;
        let outcome = self.full_download(&target).await;
        match outcome {
            Ok(()) => {
                info!("full download successful");
                self.downloaded(&target)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Expand the staged archive into the staging directory.
    pub async fn extract(&mut self) -> Result<()> {
        self.expect(UpdateState::Downloaded, "extract")?;
        self.checkpoint()?;
        let target = match self.target.clone() {
            Some(target) => target,
            None => {
                return Err(self.fail(ClientError::InvalidTransition {
                    from: self.state.name(),
                    event: "extract",
                }))
            }
        };

        let archive = self.config.update_dir().join(&target.filename);
        let dest = self.config.update_dir();
        info!(archive = %archive.display(), "extracting update");

        // Archive expansion is blocking work; keep it off the async runtime.
        let outcome = task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .map_err(|err| {
                ClientError::Io(std::io::Error::other(format!("task join error: {err}")))
            });
        match outcome {
            Ok(Ok(())) => {
                self.state = UpdateState::Extracted;
                Ok(())
            }
            Ok(Err(err)) | Err(err) => Err(self.fail(err)),
        }
    }

    /// Swap the live executable for the staged one and restart.
    ///
    /// On Unix this replaces the process image and does not return on
    /// success. On Windows it spawns the delayed-replace script and exits
    /// the process.
    pub fn restart(&mut self) -> Result<()> {
        self.expect(UpdateState::Extracted, "restart")?;
        self.checkpoint()?;

        match self.perform_swap() {
            Ok(()) => {
                self.state = UpdateState::Restarted;
                Ok(())
            }
            Err(err) => {
                self.remove_staged();
                Err(self.fail(err))
            }
        }
    }

    fn perform_swap(&mut self) -> Result<()> {
        let exe = std::env::current_exe()?;
        let exe_dir = exe
            .parent()
            .ok_or_else(|| ClientError::SwapFailed("executable has no parent dir".into()))?;
        let app_dir = swap::resolve_app_dir(exe_dir);

        match SwapStrategy::for_host() {
            SwapStrategy::InProcessReplace => {
                let (staged, live) =
                    swap::resolve_swap_paths(&self.config.update_dir(), &app_dir, &self.config.name);
                swap::overwrite_app(&staged, &live)?;
                // The state is recorded before exec because a successful
                // exec never returns.
                self.state = UpdateState::Restarted;
                swap::exec_replacement(&live, &self.config.name)
            }
            SwapStrategy::DelayedHostScript => {
                let exe_name = format!("{}.exe", self.config.name);
                let staged = self.config.update_dir().join(&exe_name);
                let live = app_dir.join(&exe_name);
                let script = swap::write_host_script(&app_dir, &staged, &live)?;
                swap::spawn_host_script(&script)?;
                self.state = UpdateState::Restarted;
                std::process::exit(0);
            }
        }
    }

    async fn fetch_manifest(&self) -> Result<Manifest> {
        // The manifest has no pre-known hash; it is authenticated by its
        // signatures instead, and progress hooks stay quiet for it.
        let silent = ProgressHooks::new();
        let raw = Downloader::new(
            &self.transport,
            MANIFEST_FILENAME,
            &self.config.mirrors,
            None,
            &silent,
        )
        .download_verify_return()
        .await?;

        let mut decoded = Vec::new();
        match GzDecoder::new(raw.as_slice()).read_to_end(&mut decoded) {
            Ok(_) => debug!("decompressed gzip manifest"),
            Err(_) => {
                // Legacy uncompressed manifest.
                decoded = raw;
            }
        }
        Ok(Manifest::from_json(&decoded)?)
    }

    async fn try_patch(&self) -> Result<()> {
        let manifest = self.manifest.as_ref().ok_or(ClientError::InstalledMismatch)?;
        let update_dir = self.config.update_dir();
        let patcher = Patcher::new(
            &self.transport,
            manifest,
            &self.config.name,
            &self.config.platform,
            &self.config.current_version,
            &self.config.mirrors,
            &update_dir,
            &self.hooks,
        );
        patcher.run(&self.cancel).await.map(|_| ())
    }

    async fn full_download(&self, target: &UpdateTarget) -> Result<()> {
        info!("starting full download");
        Downloader::new(
            &self.transport,
            &target.filename,
            &self.config.mirrors,
            Some(&target.file_hash),
            &self.hooks,
        )
        .download_verify_write(&self.config.update_dir())
        .await
        .map(|_| ())
    }

    /// A staged archive that already hashes to the target short-circuits
    /// the download phase.
    fn is_downloaded(&self, target: &UpdateTarget) -> bool {
        let staged = self.config.update_dir().join(&target.filename);
        match file_sha256_hex(&staged) {
            Ok(digest) => digest == target.file_hash,
            Err(_) => false,
        }
    }

    fn downloaded(&mut self, target: &UpdateTarget) -> Result<()> {
        self.state = UpdateState::Downloaded;
        self.purge_old_artifacts(&target.version);
        Ok(())
    }

    /// Delete staged artifacts of the same application whose version is
    /// strictly below the newly installed one. Only files whose parsed name
    /// matches exactly are touched; an unparseable version counts as 0.0.0
    /// but an unparseable name is left alone. Purging is housekeeping and
    /// never fails the run.
    fn purge_old_artifacts(&self, new_version: &Version) {
        let update_dir = self.config.update_dir();
        let entries = match fs::read_dir(&update_dir) {
            Ok(entries) => entries,
            Err(err) => {
                warn!(%err, "cannot list staging directory for purge");
                return;
            }
        };
        for entry in entries.flatten() {
            let filename = match entry.file_name().into_string() {
                Ok(filename) => filename,
                Err(_) => continue,
            };
            let (name, _, version) = match ArchiveName::parse_lossy_version(&filename) {
                Ok(parsed) => parsed,
                Err(_) => continue,
            };
            if name == self.config.name && version < *new_version {
                info!(%filename, "removing old update");
                if let Err(err) = fs::remove_file(entry.path()) {
                    warn!(%filename, %err, "failed to remove old update");
                }
            }
        }
    }

    fn remove_staged(&self) {
        if let Some(target) = &self.target {
            let staged = self.config.update_dir().join(&target.filename);
            if staged.exists() {
                let _ = fs::remove_file(&staged);
            }
        }
    }

    fn expect(&self, expected: UpdateState, event: &'static str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ClientError::InvalidTransition {
                from: self.state.name(),
                event,
            })
        }
    }

    /// Observe the cancel signal between states.
    fn checkpoint(&mut self) -> Result<()> {
        if self.cancel.is_cancelled() {
            self.state = UpdateState::Failed;
            return Err(ClientError::Cancelled);
        }
        Ok(())
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        self.state = UpdateState::Failed;
        err
    }
}

/// Expand a tar.gz or zip archive into `dest`.
fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let filename = archive
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default();
    if filename.ends_with(".tar.gz") {
        let file = fs::File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        tar.unpack(dest)?;
        Ok(())
    } else if filename.ends_with(".zip") {
        let file = fs::File::open(archive)?;
        let mut zip = zip::ZipArchive::new(file)
            .map_err(|err| ClientError::SwapFailed(format!("error reading zip file: {err}")))?;
        zip.extract(dest)
            .map_err(|err| ClientError::SwapFailed(format!("error reading zip file: {err}")))?;
        Ok(())
    } else {
        Err(ClientError::Unsupported("unknown archive type"))
    }
}
