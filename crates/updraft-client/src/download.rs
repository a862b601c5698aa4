//! Hash-verified downloads with ordered mirror fail-over.
//!
//! Transport is abstracted behind [`Transport`] so the whole client can be
//! exercised against an in-memory implementation; the production
//! [`HttpTransport`] streams over reqwest with a per-attempt deadline.
//! Bytes flow through a [`DownloadSink`] that hashes incrementally while
//! writing either to memory (patch blobs) or to a temporary file that is
//! only renamed into place once the digest matches.

use crate::error::{ClientError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use updraft_core::StreamHasher;

/// Where a download currently stands, as reported to progress hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadStatus {
    Downloading,
    Finished,
    Failed,
}

/// Progress report delivered at least once per completed file.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Total bytes expected, 0 when the server did not say.
    pub total: u64,
    /// Bytes received so far.
    pub downloaded: u64,
    pub status: DownloadStatus,
}

/// Registered progress callbacks.
#[derive(Clone, Default)]
pub struct ProgressHooks {
    hooks: Vec<Arc<dyn Fn(&ProgressEvent) + Send + Sync>>,
}

impl ProgressHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, hook: Arc<dyn Fn(&ProgressEvent) + Send + Sync>) {
        self.hooks.push(hook);
    }

    pub(crate) fn emit(&self, event: &ProgressEvent) {
        for hook in &self.hooks {
            hook(event);
        }
    }
}

impl std::fmt::Debug for ProgressHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressHooks")
            .field("count", &self.hooks.len())
            .finish()
    }
}

/// Cooperative cancellation signal, observed between files and between
/// state-machine steps, never in the middle of applying a single patch.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ClientError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Receives one file's bytes, hashing as they arrive.
pub struct DownloadSink<'a> {
    hasher: StreamHasher,
    target: SinkTarget<'a>,
    hooks: &'a ProgressHooks,
    total: u64,
    downloaded: u64,
}

enum SinkTarget<'a> {
    Memory(Vec<u8>),
    File(&'a mut File),
}

impl<'a> DownloadSink<'a> {
    fn memory(hooks: &'a ProgressHooks) -> Self {
        DownloadSink {
            hasher: StreamHasher::new(),
            target: SinkTarget::Memory(Vec::new()),
            hooks,
            total: 0,
            downloaded: 0,
        }
    }

    fn file(file: &'a mut File, hooks: &'a ProgressHooks) -> Self {
        DownloadSink {
            hasher: StreamHasher::new(),
            target: SinkTarget::File(file),
            hooks,
            total: 0,
            downloaded: 0,
        }
    }

    /// Record the expected byte count, when the transport knows it.
    pub fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    /// Append one chunk.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        match &mut self.target {
            SinkTarget::Memory(buf) => buf.extend_from_slice(chunk),
            SinkTarget::File(file) => file.write_all(chunk)?,
        }
        self.downloaded += chunk.len() as u64;
        self.hooks.emit(&ProgressEvent {
            total: self.total,
            downloaded: self.downloaded,
            status: DownloadStatus::Downloading,
        });
        Ok(())
    }

    fn finish(self) -> (String, Option<Vec<u8>>) {
        let digest = self.hasher.finish();
        match self.target {
            SinkTarget::Memory(buf) => (digest, Some(buf)),
            SinkTarget::File(_) => (digest, None),
        }
    }
}

/// Fetches one URL's bytes into a sink.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, sink: &mut DownloadSink<'_>) -> Result<()>;
}

/// Production transport over reqwest with rustls.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// `verify_tls = false` disables certificate validation; `deadline`
    /// bounds each attempt, and expiry counts as a mirror failure.
    pub fn new(verify_tls: bool, deadline: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!verify_tls)
            .timeout(deadline)
            .build()?;
        Ok(HttpTransport { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(&self, url: &str, sink: &mut DownloadSink<'_>) -> Result<()> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        if let Some(length) = response.content_length() {
            sink.set_total(length);
        }
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            sink.push(&chunk?)?;
        }
        Ok(())
    }
}

/// Downloads one file from an ordered mirror list, verifying its digest.
pub struct Downloader<'a, T: Transport + ?Sized> {
    transport: &'a T,
    filename: &'a str,
    mirrors: &'a [String],
    /// Expected lower-case hex digest; `None` skips verification (used for
    /// the manifest itself, which is authenticated by signature instead).
    expected_hash: Option<&'a str>,
    hooks: &'a ProgressHooks,
}

impl<'a, T: Transport + ?Sized> Downloader<'a, T> {
    pub fn new(
        transport: &'a T,
        filename: &'a str,
        mirrors: &'a [String],
        expected_hash: Option<&'a str>,
        hooks: &'a ProgressHooks,
    ) -> Self {
        Downloader {
            transport,
            filename,
            mirrors,
            expected_hash,
            hooks,
        }
    }

    /// Download into memory and return the verified bytes.
    pub async fn download_verify_return(&self) -> Result<Vec<u8>> {
        for mirror in self.mirrors {
            let url = join_url(mirror, self.filename);
            debug!(%url, "downloading");
            let mut sink = DownloadSink::memory(self.hooks);
            match self.transport.fetch(&url, &mut sink).await {
                Ok(()) => {
                    let (digest, bytes) = sink.finish();
                    let bytes = bytes.unwrap_or_default();
                    match self.check_digest(&digest) {
                        Ok(()) => {
                            self.finished(bytes.len() as u64);
                            return Ok(bytes);
                        }
                        Err(err) => warn!(%url, %err, "mirror served bad bytes"),
                    }
                }
                Err(err) => warn!(%url, %err, "mirror failed"),
            }
        }
        self.failed()
    }

    /// Download through a temporary file and rename it into `dest_dir` under
    /// the download's filename once verified. Partial or corrupt files never
    /// become visible at the final path.
    pub async fn download_verify_write(&self, dest_dir: &Path) -> Result<PathBuf> {
        let final_path = dest_dir.join(self.filename);
        for mirror in self.mirrors {
            let url = join_url(mirror, self.filename);
            debug!(%url, "downloading to file");
            let mut temp = NamedTempFile::new_in(dest_dir)?;
            let outcome = {
                let mut sink = DownloadSink::file(temp.as_file_mut(), self.hooks);
                self.transport.fetch(&url, &mut sink).await.map(|()| {
                    let (digest, _) = sink.finish();
                    digest
                })
            };
            match outcome {
                Ok(digest) => match self.check_digest(&digest) {
                    Ok(()) => {
                        temp.as_file().sync_all()?;
                        let written = temp.as_file().metadata()?.len();
                        temp.persist(&final_path)
                            .map_err(|err| ClientError::Io(err.error))?;
                        self.finished(written);
                        return Ok(final_path);
                    }
                    Err(err) => warn!(%url, %err, "mirror served bad bytes"),
                },
                Err(err) => warn!(%url, %err, "mirror failed"),
            }
            // The NamedTempFile drop removes the partial download.
        }
        self.failed()
    }

    fn check_digest(&self, actual: &str) -> Result<()> {
        match self.expected_hash {
            Some(expected) if expected != actual => Err(ClientError::HashMismatch {
                filename: self.filename.to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn finished(&self, bytes: u64) {
        info!(filename = %self.filename, bytes, "download complete");
        self.hooks.emit(&ProgressEvent {
            total: bytes,
            downloaded: bytes,
            status: DownloadStatus::Finished,
        });
    }

    fn failed<R>(&self) -> Result<R> {
        self.hooks.emit(&ProgressEvent {
            total: 0,
            downloaded: 0,
            status: DownloadStatus::Failed,
        });
        Err(ClientError::AllMirrorsFailed {
            filename: self.filename.to_string(),
        })
    }
}

fn join_url(mirror: &str, filename: &str) -> String {
    format!("{}/{}", mirror.trim_end_matches('/'), filename)
}
