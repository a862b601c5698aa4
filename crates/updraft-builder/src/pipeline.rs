//! High-level facade over the developer-side pipeline: processes inbox
//! packages, signs the manifest and manages signing keys, persisting
//! everything under the configured data directory.

use crate::config::BuilderConfig;
use crate::error::Result;
use crate::ingest::{IngestReport, Ingestor};
use crate::keystore::KeyStore;
use crate::signer::ManifestSigner;
use crate::store::{BuilderState, StateStore};
use std::fs;
use tracing::debug;
use updraft_core::Manifest;

/// One application's release pipeline.
#[derive(Debug)]
pub struct Builder {
    ingestor: Ingestor,
    keystore: KeyStore,
    state_store: StateStore,
}

impl Builder {
    /// Open (or initialize) the pipeline rooted at `config.data_dir`.
    pub fn open(config: BuilderConfig) -> Result<Self> {
        let keystore = KeyStore::open(config.keys_path())?;
        let state_store = StateStore::new(config.state_path());
        let ingestor = Ingestor::new(config)?;
        Ok(Builder {
            ingestor,
            keystore,
            state_store,
        })
    }

    pub fn config(&self) -> &BuilderConfig {
        self.ingestor.config()
    }

    pub fn keystore(&self) -> &KeyStore {
        &self.keystore
    }

    /// Load the working manifest from the config dir, or start empty.
    pub fn load_manifest(&self) -> Result<Manifest> {
        let path = self.config().manifest_path();
        if !path.exists() {
            debug!("no manifest yet, starting empty");
            return Ok(Manifest::new());
        }
        Ok(Manifest::from_json(&fs::read(&path)?)?)
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        fs::write(self.config().manifest_path(), manifest.to_json()?)?;
        Ok(())
    }

    /// Ingest everything in the inbox and persist the updated manifest and
    /// patch counters.
    pub fn process_packages(&self, manifest: &mut Manifest) -> Result<IngestReport> {
        let mut state = self.load_state()?;
        let report = self.ingestor.process_inbox(manifest, &mut state)?;
        self.state_store.save(&state)?;
        self.save_manifest(manifest)?;
        Ok(report)
    }

    /// Sign the manifest with all live keys and write the deploy files.
    pub fn sign_update(&self, manifest: &mut Manifest) -> Result<()> {
        let signer = ManifestSigner::new(&self.keystore, self.config().deploy_dir());
        signer.sign_and_write(manifest)?;
        self.save_manifest(manifest)?;
        Ok(())
    }

    /// Mint `count` signing keypairs.
    pub fn make_keys(&self, count: usize) -> Result<()> {
        self.keystore.make_keys(count)
    }

    /// Revoke the `count` oldest live keys and mint the same number of
    /// replacements, keeping the live set size stable.
    pub fn rotate_keys(&self, count: usize) -> Result<()> {
        self.keystore.revoke(count)?;
        self.keystore.make_keys(count)
    }

    /// Base64 public keys a client build should bundle, oldest first.
    pub fn public_keys(&self) -> Result<Vec<String>> {
        self.keystore.public_keys()
    }

    fn load_state(&self) -> Result<BuilderState> {
        self.state_store.load()
    }
}
