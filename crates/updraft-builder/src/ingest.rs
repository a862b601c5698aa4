//! Inbox ingestion: classify new archives, record them in the manifest,
//! build patches against the previous release and stage everything for
//! deployment.
//!
//! Artifact lifecycle per valid package: hashed in `inbox/`, copied to
//! `deploy/` for upload, then moved to `files/` where it becomes the diff
//! source for the next release. The diff source consumed by a patch is
//! removed from `files/` afterwards.

use crate::config::{list_file_names, BuilderConfig};
use crate::error::Result;
use crate::package::{classify, Classification, Package, Rejection};
use crate::patch::{build_patches, PatchJob, PatchResult};
use crate::store::BuilderState;
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};
use updraft_core::Manifest;

/// Outcome of one ingestion run.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Packages registered in the manifest, in processing order.
    pub accepted: Vec<Package>,
    /// Entries excluded from processing, with reasons.
    pub rejected: Vec<Rejection>,
    /// Patches built during this run.
    pub patches: Vec<PatchResult>,
}

/// Scans the inbox and drives the whole developer-side pipeline step.
#[derive(Debug)]
pub struct Ingestor {
    config: BuilderConfig,
}

impl Ingestor {
    /// Create an ingestor, bootstrapping the working directories.
    pub fn new(config: BuilderConfig) -> Result<Self> {
        config.ensure_dirs()?;
        Ok(Ingestor { config })
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    /// Process every archive currently in the inbox.
    ///
    /// Valid packages are registered in `manifest`, per-platform `latest`
    /// pointers are advanced, patch jobs are built on the worker pool and
    /// their hashes recorded, and artifacts are moved to the deploy and
    /// files stores. Bad packages are logged and skipped.
    pub fn process_inbox(
        &self,
        manifest: &mut Manifest,
        state: &mut BuilderState,
    ) -> Result<IngestReport> {
        let inbox = self.config.inbox_dir();
        let mut report = IngestReport::default();

        info!(inbox = %inbox.display(), "getting package list");
        for filename in list_file_names(&inbox)? {
            match classify(&inbox.join(&filename))? {
                Classification::Valid(package) => report.accepted.push(*package),
                Classification::Rejected(rejection) => {
                    warn!(
                        filename = %rejection.filename,
                        reason = %rejection.reason,
                        "skipping bad package"
                    );
                    report.rejected.push(rejection);
                }
            }
        }

        // Process versions in order so a multi-release batch still produces
        // a contiguous patch chain.
        report.accepted.sort_by(|a, b| {
            (&a.name, a.platform.as_str(), &a.version)
                .cmp(&(&b.name, b.platform.as_str(), &b.version))
        });

        let mut jobs = Vec::new();
        for package in &report.accepted {
            manifest.register_package(
                &package.name,
                &package.version,
                &package.platform,
                updraft_core::PackageEntry::new(
                    package.filename.as_str(),
                    package.file_hash.as_str(),
                ),
            );

            if self.config.update_patches {
                if let Some(job) = self.plan_patch(manifest, state, package) {
                    jobs.push(job);
                }
            }

            manifest.bump_latest(&package.name, &package.platform, &package.version);
        }

        report.patches = build_patches(jobs, &self.config.deploy_dir());
        for result in &report.patches {
            manifest.record_patch(
                &result.name,
                &result.version,
                &result.platform,
                result.patch_name.clone(),
                result.patch_hash.clone(),
            );
        }

        self.cleanup_sources(&report.patches)?;
        self.move_packages(&report.accepted)?;

        if !report.rejected.is_empty() {
            warn!(count = report.rejected.len(), "bad packages in this batch");
        }
        Ok(report)
    }

    /// Choose the diff source for `package`: whatever `latest` pointed at
    /// before this package's own bump. Resolves against `files/` first and
    /// falls back to the current batch still sitting in the inbox.
    fn plan_patch(
        &self,
        manifest: &Manifest,
        state: &mut BuilderState,
        package: &Package,
    ) -> Option<PatchJob> {
        let previous = manifest.latest_version(&package.name, &package.platform)?;
        let source = manifest.entry(&package.name, &previous, &package.platform)?;
        let src_path = self.resolve_source(&source.filename)?;

        let patch_number = state.next_patch_number(&package.name, self.config.boot_strap());
        let patch_name = format!(
            "{}-{}-{}",
            package.name,
            package.platform.as_str(),
            patch_number
        );
        debug!(patch = %patch_name, src = %src_path.display(), "planned patch job");

        Some(PatchJob {
            name: package.name.clone(),
            version: package.version.clone(),
            platform: package.platform.clone(),
            src_path,
            dst_path: package.path.clone(),
            patch_name,
            patch_number,
            package_filename: package.filename.clone(),
        })
    }

    fn resolve_source(&self, filename: &str) -> Option<PathBuf> {
        let in_files = self.config.files_dir().join(filename);
        if in_files.exists() {
            return Some(in_files);
        }
        let in_inbox = self.config.inbox_dir().join(filename);
        if in_inbox.exists() {
            return Some(in_inbox);
        }
        warn!(%filename, "no source file to patch from");
        None
    }

    /// Drop consumed diff sources from the files store.
    fn cleanup_sources(&self, patches: &[PatchResult]) -> Result<()> {
        let files_dir = self.config.files_dir();
        for patch in patches {
            if patch.src_path.parent() == Some(files_dir.as_path()) && patch.src_path.exists() {
                info!(src = %patch.src_path.display(), "removing consumed diff source");
                fs::remove_file(&patch.src_path)?;
            }
        }
        Ok(())
    }

    /// Copy each new archive to the deploy store and move it to the files
    /// store for the next cycle.
    fn move_packages(&self, accepted: &[Package]) -> Result<()> {
        if accepted.is_empty() {
            return Ok(());
        }
        info!("moving packages to deploy folder");
        for package in accepted {
            let deploy_path = self.config.deploy_dir().join(&package.filename);
            let files_path = self.config.files_dir().join(&package.filename);

            fs::copy(&package.path, &deploy_path)?;
            if files_path.exists() {
                fs::remove_file(&files_path)?;
            }
            fs::rename(&package.path, &files_path)?;
            debug!(filename = %package.filename, "staged package");
        }
        Ok(())
    }
}
