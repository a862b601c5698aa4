//! Manifest signing and emission to the deploy store.
//!
//! Signing uses every live key in the key store, oldest first. Two files are
//! written: the gzip-compressed multi-signature manifest that current
//! clients fetch, and an uncompressed companion carrying a single `sig`
//! scalar for clients from before the rotation scheme. Both contain the same
//! signed payload.

use crate::error::Result;
use crate::keystore::KeyStore;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use updraft_core::manifest::{LEGACY_MANIFEST_FILENAME, MANIFEST_FILENAME};
use updraft_core::{sign, Manifest};

/// Signs manifests with the key store and writes distribution files.
#[derive(Debug)]
pub struct ManifestSigner<'a> {
    keystore: &'a KeyStore,
    deploy_dir: PathBuf,
}

impl<'a> ManifestSigner<'a> {
    pub fn new(keystore: &'a KeyStore, deploy_dir: impl Into<PathBuf>) -> Self {
        ManifestSigner {
            keystore,
            deploy_dir: deploy_dir.into(),
        }
    }

    /// Sign `manifest` in place and write both distribution files.
    ///
    /// When fewer than two live keys remain (fresh repository, or a
    /// revocation that was not followed by minting) a replacement set is
    /// created first so a later revocation always leaves a fallback.
    pub fn sign_and_write(&self, manifest: &mut Manifest) -> Result<()> {
        if self.keystore.live_count()? < 2 {
            self.keystore.make_keys(3)?;
        }
        let keys = self.keystore.signing_keys()?;
        sign::sign_manifest(manifest, &keys)?;
        info!(sigs = manifest.sigs.len(), "signed version manifest");

        self.write_compressed(manifest)?;
        self.write_legacy(manifest)?;
        Ok(())
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.deploy_dir.join(MANIFEST_FILENAME)
    }

    pub fn legacy_manifest_path(&self) -> PathBuf {
        self.deploy_dir.join(LEGACY_MANIFEST_FILENAME)
    }

    fn write_compressed(&self, manifest: &Manifest) -> Result<()> {
        let path = self.manifest_path();
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(&manifest.to_json()?)?;
        encoder.finish()?;
        info!(path = %path.display(), "created gzipped version manifest in deploy dir");
        Ok(())
    }

    fn write_legacy(&self, manifest: &Manifest) -> Result<()> {
        let legacy = Manifest {
            sig: manifest.sigs.first().cloned(),
            sigs: Vec::new(),
            ..manifest.clone()
        };
        let path = self.legacy_manifest_path();
        std::fs::write(&path, legacy.to_json()?)?;
        info!(path = %path.display(), "created legacy version manifest in deploy dir");
        Ok(())
    }
}

/// Read back a deployed gzip manifest, mainly for tests and audits.
pub fn read_compressed_manifest(path: &Path) -> Result<Manifest> {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut raw = Vec::new();
    GzDecoder::new(File::open(path)?).read_to_end(&mut raw)?;
    Ok(Manifest::from_json(&raw)?)
}
