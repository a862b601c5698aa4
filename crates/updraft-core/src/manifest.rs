//! The version manifest: the canonical description of every published
//! release, the per-platform latest pointers and the signatures over both.
//!
//! All maps are `BTreeMap`, so any serialization of the manifest is
//! sorted-key JSON and the signing payload is byte-stable no matter what
//! order entries were inserted in.

use crate::error::Result;
use crate::platform::PlatformTag;
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Delimiter of the string-form accessor kept at the JSON boundary.
pub const STAR: char = '*';

/// Distribution filename of the gzip-compressed manifest.
pub const MANIFEST_FILENAME: &str = "versions.gz";

/// Distribution filename of the uncompressed legacy companion, which
/// carries a single `sig` scalar instead of the `sigs` list.
pub const LEGACY_MANIFEST_FILENAME: &str = "versions.json";

/// Per-`(name, version, platform)` release metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub filename: String,
    pub file_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch_hash: Option<String>,
}

impl PackageEntry {
    pub fn new(filename: impl Into<String>, file_hash: impl Into<String>) -> Self {
        PackageEntry {
            filename: filename.into(),
            file_hash: file_hash.into(),
            patch_name: None,
            patch_hash: None,
        }
    }

    /// Whether this entry can participate in a patch chain.
    pub fn has_patch(&self) -> bool {
        self.patch_name.is_some() && self.patch_hash.is_some()
    }
}

type PlatformMap = BTreeMap<String, PackageEntry>;
type VersionMap = BTreeMap<String, PlatformMap>;

/// The signed release manifest.
///
/// `sigs` carries one signature per live signing key, oldest key first. The
/// legacy scalar `sig` is populated only in the uncompressed companion file
/// kept for older clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub latest: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sigs: Vec<String>,
    #[serde(default)]
    pub updates: BTreeMap<String, VersionMap>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest from its JSON encoding.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Entry for an exact `(name, version, platform)` coordinate.
    pub fn entry(&self, name: &str, version: &Version, platform: &PlatformTag) -> Option<&PackageEntry> {
        self.updates
            .get(name)?
            .get(&version.canonical())?
            .get(platform.as_str())
    }

    /// The advertised latest version for a `(name, platform)` pair.
    pub fn latest_version(&self, name: &str, platform: &PlatformTag) -> Option<Version> {
        let raw = self.latest.get(name)?.get(platform.as_str())?;
        Version::parse(raw).ok()
    }

    /// All versions published for a `(name, platform)` pair, ascending.
    pub fn versions(&self, name: &str, platform: &PlatformTag) -> Vec<Version> {
        let mut out: Vec<Version> = self
            .updates
            .get(name)
            .map(|versions| {
                versions
                    .iter()
                    .filter(|(_, platforms)| platforms.contains_key(platform.as_str()))
                    .filter_map(|(raw, _)| Version::parse(raw).ok())
                    .collect()
            })
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Record a freshly ingested package.
    pub fn register_package(
        &mut self,
        name: &str,
        version: &Version,
        platform: &PlatformTag,
        entry: PackageEntry,
    ) {
        self.updates
            .entry(name.to_string())
            .or_default()
            .entry(version.canonical())
            .or_default()
            .insert(platform.as_str().to_string(), entry);
    }

    /// Attach patch metadata to an existing entry. Missing coordinates are
    /// ignored rather than created; a patch without its package is useless.
    pub fn record_patch(
        &mut self,
        name: &str,
        version: &Version,
        platform: &PlatformTag,
        patch_name: String,
        patch_hash: String,
    ) {
        if let Some(entry) = self
            .updates
            .get_mut(name)
            .and_then(|versions| versions.get_mut(&version.canonical()))
            .and_then(|platforms| platforms.get_mut(platform.as_str()))
        {
            entry.patch_name = Some(patch_name);
            entry.patch_hash = Some(patch_hash);
        }
    }

    /// Advance the latest pointer when `version` exceeds the stored one.
    /// Returns whether the pointer moved.
    pub fn bump_latest(&mut self, name: &str, platform: &PlatformTag, version: &Version) -> bool {
        let slot = self
            .latest
            .entry(name.to_string())
            .or_default()
            .entry(platform.as_str().to_string())
            .or_default();
        let current = Version::parse(slot).ok();
        if current.map_or(true, |current| *version > current) {
            *slot = version.canonical();
            true
        } else {
            false
        }
    }
}

/// Walk a `*`-delimited key path through a JSON value.
///
/// Any missing segment yields `None`; nothing panics. This is the string
/// form of the typed accessors above and exists only at the serialization
/// boundary.
pub fn star_get<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split(STAR) {
        current = current.get(segment)?;
    }
    Some(current)
}
