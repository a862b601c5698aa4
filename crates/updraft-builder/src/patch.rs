//! Parallel binary-diff generation.
//!
//! Each [`PatchJob`] pairs a new archive with the previous release for the
//! same `(name, platform)` and produces one bsdiff blob in the deploy store.
//! Jobs share nothing but immutable inputs and write to distinct filenames,
//! so the pool needs no synchronization beyond the result channel.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use threadpool::ThreadPool;
use tracing::{error, info, warn};
use updraft_core::{bsdiff, sha256_hex, PlatformTag, Version};

/// One pending diff between consecutive releases.
#[derive(Debug, Clone)]
pub struct PatchJob {
    /// Application the patch belongs to.
    pub name: String,
    /// Version the patch produces (the destination archive's version).
    pub version: Version,
    pub platform: PlatformTag,
    /// Previous release archive to diff from.
    pub src_path: PathBuf,
    /// Newly ingested archive to diff to.
    pub dst_path: PathBuf,
    /// Output name, `<name>-<platform>-<number>`, no extension.
    pub patch_name: String,
    pub patch_number: u64,
    /// Filename of the destination archive, used to attach the result.
    pub package_filename: String,
}

impl PatchJob {
    /// A job is ready when all naming fields are present and the diff
    /// source actually exists.
    pub fn ready(&self) -> bool {
        !self.patch_name.is_empty()
            && !self.package_filename.is_empty()
            && !self.src_path.as_os_str().is_empty()
            && !self.dst_path.as_os_str().is_empty()
            && self.src_path.exists()
    }
}

/// A successfully built patch.
#[derive(Debug, Clone)]
pub struct PatchResult {
    pub name: String,
    pub version: Version,
    pub platform: PlatformTag,
    pub patch_name: String,
    pub patch_hash: String,
    pub src_path: PathBuf,
    pub package_filename: String,
}

/// Run all jobs on a pool of `2 × logical CPUs` workers and collect results
/// in job order. A failed job is logged and dropped; the affected package
/// simply ships without a patch and clients fall back to a full download.
pub fn build_patches(jobs: Vec<PatchJob>, deploy_dir: &Path) -> Vec<PatchResult> {
    if jobs.is_empty() {
        return Vec::new();
    }
    info!(count = jobs.len(), "starting patch creation");

    let pool = ThreadPool::new(num_cpus::get() * 2);
    let (sender, receiver) = mpsc::channel();
    let total = jobs.len();

    for (index, job) in jobs.into_iter().enumerate() {
        let sender = sender.clone();
        let deploy_dir = deploy_dir.to_path_buf();
        pool.execute(move || {
            let outcome = run_job(&job, &deploy_dir);
            // A dropped receiver just means the caller gave up on the batch.
            let _ = sender.send((index, job, outcome));
        });
    }
    drop(sender);

    let mut collected: Vec<(usize, PatchJob, Result<PatchResult>)> =
        receiver.iter().collect();
    collected.sort_by_key(|(index, _, _)| *index);
    debug_assert_eq!(collected.len(), total);

    let mut results = Vec::new();
    for (_, job, outcome) in collected {
        match outcome {
            Ok(result) => {
                info!(patch = %result.patch_name, "created patch");
                results.push(result);
            }
            Err(err) => {
                error!(patch = %job.patch_name, %err, "patch creation failed");
            }
        }
    }
    results
}

fn run_job(job: &PatchJob, deploy_dir: &Path) -> Result<PatchResult> {
    if !job.ready() {
        warn!(patch = %job.patch_name, "source file missing, skipping patch");
        return Err(updraft_core::CoreError::MissingFile(job.src_path.clone()).into());
    }

    let old = fs::read(&job.src_path)?;
    let new = fs::read(&job.dst_path)?;
    let blob = bsdiff::diff(&old, &new)?;
    let patch_hash = sha256_hex(&blob);

    let out_path = deploy_dir.join(&job.patch_name);
    fs::write(&out_path, &blob)?;

    Ok(PatchResult {
        name: job.name.clone(),
        version: job.version.clone(),
        platform: job.platform.clone(),
        patch_name: job.patch_name.clone(),
        patch_hash,
        src_path: job.src_path.clone(),
        package_filename: job.package_filename.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(dir: &Path, src: &str, dst: &str, number: u64) -> PatchJob {
        PatchJob {
            name: "app".into(),
            version: Version::parse("0.1.1").unwrap(),
            platform: PlatformTag::parse("mac").unwrap(),
            src_path: dir.join(src),
            dst_path: dir.join(dst),
            patch_name: format!("app-mac-{number}"),
            patch_number: number,
            package_filename: dst.to_string(),
        }
    }

    #[test]
    fn builds_applicable_patches() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = dir.path().join("deploy");
        fs::create_dir(&deploy).unwrap();
        fs::write(dir.path().join("old.tar.gz"), b"release one payload").unwrap();
        fs::write(dir.path().join("new.tar.gz"), b"release two payload, longer").unwrap();

        let results = build_patches(
            vec![job(dir.path(), "old.tar.gz", "new.tar.gz", 101)],
            &deploy,
        );
        assert_eq!(results.len(), 1);

        let blob = fs::read(deploy.join("app-mac-101")).unwrap();
        assert_eq!(sha256_hex(&blob), results[0].patch_hash);
        let rebuilt = bsdiff::patch(b"release one payload", &blob).unwrap();
        assert_eq!(rebuilt, b"release two payload, longer");
    }

    #[test]
    fn missing_source_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = dir.path().join("deploy");
        fs::create_dir(&deploy).unwrap();
        fs::write(dir.path().join("new.tar.gz"), b"payload").unwrap();

        let results = build_patches(
            vec![job(dir.path(), "ghost.tar.gz", "new.tar.gz", 101)],
            &deploy,
        );
        assert!(results.is_empty());
        assert!(!deploy.join("app-mac-101").exists());
    }

    #[test]
    fn results_come_back_in_job_order() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = dir.path().join("deploy");
        fs::create_dir(&deploy).unwrap();
        fs::write(dir.path().join("a"), b"source a").unwrap();
        fs::write(dir.path().join("b"), b"target b").unwrap();

        let jobs: Vec<PatchJob> = (0..8)
            .map(|i| {
                let mut job = job(dir.path(), "a", "b", 101 + i);
                job.patch_name = format!("app-mac-{}", 101 + i);
                job
            })
            .collect();
        let results = build_patches(jobs, &deploy);
        let numbers: Vec<String> = results.iter().map(|r| r.patch_name.clone()).collect();
        let mut sorted = numbers.clone();
        sorted.sort();
        assert_eq!(numbers, sorted);
    }
}
