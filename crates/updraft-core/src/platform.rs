//! Platform tags and archive-name parsing.
//!
//! Release archives are named `<name>-<platform>-<version>.<ext>` with a
//! platform tag drawn from the closed grammar `[mnw][ai][cnx](64)?`
//! (`mac`, `win`, `nix`, `nix64`, ...). Both the developer-side ingestor and
//! the client-side staging purge go through this module so the two sides
//! never disagree on what a filename means.

use crate::error::{CoreError, Result};
use crate::version::Version;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[mnw][ai][cnx](?:64)?$").expect("platform tag pattern"));

static ARCHIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<name>.+)-(?P<platform>[mnw][ai][cnx](?:64)?)-(?P<version>\d[^-]*)$")
        .expect("archive name pattern")
});

/// A validated platform tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlatformTag(String);

impl PlatformTag {
    /// Parse a tag, rejecting anything outside the closed grammar.
    pub fn parse(input: &str) -> Result<Self> {
        if TAG_RE.is_match(input) {
            Ok(PlatformTag(input.to_string()))
        } else {
            Err(CoreError::PlatformParse(input.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PlatformTag {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        PlatformTag::parse(s)
    }
}

/// The parsed fields of a release archive filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub name: String,
    pub platform: PlatformTag,
    pub version: Version,
    /// `"zip"` or `"tar.gz"`.
    pub extension: String,
}

impl ArchiveName {
    /// Parse `<name>-<platform>-<version>.<ext>`.
    ///
    /// The extension must be one of the supported archive formats; the
    /// version segment is handed to [`Version::parse`] after the split.
    pub fn parse(filename: &str) -> Result<Self> {
        let (stem, extension) = split_archive_ext(filename)
            .ok_or_else(|| CoreError::VersionParse(filename.to_string()))?;
        let caps = ARCHIVE_RE
            .captures(stem)
            .ok_or_else(|| CoreError::PlatformParse(filename.to_string()))?;
        Ok(ArchiveName {
            name: caps["name"].to_string(),
            platform: PlatformTag(caps["platform"].to_string()),
            version: Version::parse(&caps["version"])?,
            extension: extension.to_string(),
        })
    }

    /// Like [`ArchiveName::parse`] but tolerant of the version segment, for
    /// the staging-purge path where an unparseable version is treated as
    /// `0.0.0` rather than skipped.
    pub fn parse_lossy_version(filename: &str) -> Result<(String, PlatformTag, Version)> {
        let (stem, _) = split_archive_ext(filename)
            .ok_or_else(|| CoreError::VersionParse(filename.to_string()))?;
        let caps = ARCHIVE_RE
            .captures(stem)
            .ok_or_else(|| CoreError::PlatformParse(filename.to_string()))?;
        let version = Version::parse(&caps["version"]).unwrap_or(Version {
            major: 0,
            minor: 0,
            patch: 0,
            channel: crate::version::Channel::Stable,
            channel_rev: 0,
        });
        Ok((
            caps["name"].to_string(),
            PlatformTag(caps["platform"].to_string()),
            version,
        ))
    }
}

/// Split a supported archive extension off a filename.
pub fn split_archive_ext(filename: &str) -> Option<(&str, &str)> {
    if let Some(stem) = filename.strip_suffix(".tar.gz") {
        Some((stem, "tar.gz"))
    } else {
        filename.strip_suffix(".zip").map(|stem| (stem, "zip"))
    }
}
