//! Persisted pipeline state: per-application patch counters.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// State carried between pipeline runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuilderState {
    /// Last assigned patch number per application name.
    #[serde(default)]
    pub patches: BTreeMap<String, u64>,
}

impl BuilderState {
    /// Allocate the next patch number for `name`. Numbers are dense,
    /// monotonic and never reused; the first one is `boot_strap + 1`.
    pub fn next_patch_number(&mut self, name: &str, boot_strap: u64) -> u64 {
        let slot = self.patches.entry(name.to_string()).or_insert(boot_strap);
        *slot += 1;
        *slot
    }
}

/// JSON-file persistence for [`BuilderState`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        StateStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, or an empty one when none exists yet.
    pub fn load(&self) -> Result<BuilderState> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "no state file, starting empty");
            return Ok(BuilderState::default());
        }
        let raw = fs::read(&self.path)?;
        Ok(serde_json::from_slice(&raw)?)
    }

    pub fn save(&self, state: &BuilderState) -> Result<()> {
        fs::write(&self.path, serde_json::to_vec_pretty(state)?)?;
        debug!(path = %self.path.display(), "saved builder state");
        Ok(())
    }
}
