//! Builder-side configuration and working-directory layout.
//!
//! Incoming archives land in `inbox/`, previously released archives are kept
//! in `files/` as future diff sources, and everything ready for upload sits
//! in `deploy/`. Framework metadata (key store, patch counters, manifest)
//! lives under a hidden config directory next to them. All paths are carried
//! explicitly; nothing in the pipeline changes the process working
//! directory.

use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name of the hidden metadata directory inside the data dir.
const CONFIG_DIR: &str = ".updraft";

/// Configuration for one application's release pipeline.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Application name; archive filenames must start with it.
    pub app_name: String,
    /// Root of the working tree described above.
    pub data_dir: PathBuf,
    /// Whether binary patches are generated at all.
    pub update_patches: bool,
    /// Patch numbering starts at `boot_strap + 1` (default 100 → 101).
    pub boot_strap: Option<u64>,
}

impl BuilderConfig {
    pub fn new(app_name: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        BuilderConfig {
            app_name: app_name.into(),
            data_dir: data_dir.into(),
            update_patches: true,
            boot_strap: None,
        }
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.data_dir.join("inbox")
    }

    pub fn files_dir(&self) -> PathBuf {
        self.data_dir.join("files")
    }

    pub fn deploy_dir(&self) -> PathBuf {
        self.data_dir.join("deploy")
    }

    pub fn config_dir(&self) -> PathBuf {
        self.data_dir.join(CONFIG_DIR)
    }

    pub fn keys_path(&self) -> PathBuf {
        self.config_dir().join("keys.json")
    }

    pub fn state_path(&self) -> PathBuf {
        self.config_dir().join("state.json")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.config_dir().join("manifest.json")
    }

    /// First patch number minus one.
    pub fn boot_strap(&self) -> u64 {
        self.boot_strap.unwrap_or(100)
    }

    /// Create any missing working directories. Non-destructive.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.data_dir.clone(),
            self.inbox_dir(),
            self.files_dir(),
            self.deploy_dir(),
            self.config_dir(),
        ] {
            if !dir.exists() {
                info!(dir = %dir.display(), "creating working directory");
                fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}

/// Best-effort listing of plain file names in a directory.
pub(crate) fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_hangs_off_data_dir() {
        let config = BuilderConfig::new("app", "/tmp/release");
        assert_eq!(config.inbox_dir(), PathBuf::from("/tmp/release/inbox"));
        assert_eq!(
            config.keys_path(),
            PathBuf::from("/tmp/release/.updraft/keys.json")
        );
        assert_eq!(config.boot_strap(), 100);
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuilderConfig::new("app", dir.path());
        config.ensure_dirs().unwrap();
        config.ensure_dirs().unwrap();
        assert!(config.inbox_dir().is_dir());
        assert!(config.deploy_dir().is_dir());
    }
}
