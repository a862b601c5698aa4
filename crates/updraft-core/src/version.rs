//! Release numbers with pre-release channels.
//!
//! Two textual forms are accepted: the human form `M.m[.p][(a|b)N]` found in
//! archive filenames (`0.1.0`, `1.2`, `1.2.1b1`, `1.2.1-a2`) and the 4-dot
//! canonical form `M.m.p.c.n` that the manifest stores (`1.2.1.1.1`). Any
//! other dot count is a hard error. Ordering is lexicographic over
//! `(major, minor, patch, channel, channel_rev)`, which puts
//! `alpha < beta < stable` at an equal numeric prefix.

use crate::error::{CoreError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static HUMAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?P<major>\d+)\.(?P<minor>\d+)\.?(?P<patch>\d+)?-?(?P<channel>[ab])?(?P<rev>\d+)?",
    )
    .expect("human version pattern")
});

static CANONICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<major>\d+)\.(?P<minor>\d+)\.(?P<patch>\d+)\.(?P<channel>\d+)\.(?P<rev>\d+)")
        .expect("canonical version pattern")
});

/// Pre-release channel, ordered alpha < beta < stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Channel {
    Alpha = 0,
    Beta = 1,
    Stable = 2,
}

impl Channel {
    fn from_digit(d: u64) -> Option<Self> {
        match d {
            0 => Some(Channel::Alpha),
            1 => Some(Channel::Beta),
            2 => Some(Channel::Stable),
            _ => None,
        }
    }

    /// Numeric form used by the canonical encoding.
    pub fn as_digit(self) -> u64 {
        self as u64
    }
}

/// A normalized release number.
///
/// Fields are declared in comparison order, so the derived `Ord` is the
/// release ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub channel: Channel,
    pub channel_rev: u64,
}

impl Version {
    /// Parse a version from either accepted textual form.
    ///
    /// Archive extensions (`.zip`, `.tar.gz`) are stripped before the dot
    /// count is checked, so full archive filenames can be passed through.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = strip_archive_ext(input);
        match trimmed.matches('.').count() {
            1 | 2 => Self::parse_human(trimmed),
            4 => Self::parse_canonical(trimmed),
            _ => Err(CoreError::VersionParse(input.to_string())),
        }
    }

    fn parse_human(input: &str) -> Result<Self> {
        let caps = HUMAN_RE
            .captures(input)
            .ok_or_else(|| CoreError::VersionParse(input.to_string()))?;
        let number = |name: &str| -> u64 {
            caps.name(name)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        let channel = match caps.name("channel").map(|m| m.as_str()) {
            Some("a") => Channel::Alpha,
            Some("b") => Channel::Beta,
            _ => Channel::Stable,
        };
        Ok(Version {
            major: number("major"),
            minor: number("minor"),
            patch: number("patch"),
            channel,
            channel_rev: number("rev"),
        })
    }

    fn parse_canonical(input: &str) -> Result<Self> {
        let caps = CANONICAL_RE
            .captures(input)
            .ok_or_else(|| CoreError::VersionParse(input.to_string()))?;
        let number = |name: &str| -> Result<u64> {
            caps[name]
                .parse()
                .map_err(|_| CoreError::VersionParse(input.to_string()))
        };
        let channel = Channel::from_digit(number("channel")?)
            .ok_or_else(|| CoreError::VersionParse(input.to_string()))?;
        Ok(Version {
            major: number("major")?,
            minor: number("minor")?,
            patch: number("patch")?,
            channel,
            channel_rev: number("rev")?,
        })
    }

    /// The canonical 5-field encoding, e.g. `1.2.1.2.0`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}.{}",
            self.major,
            self.minor,
            self.patch,
            self.channel.as_digit(),
            self.channel_rev
        )
    }
}

impl FromStr for Version {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

fn strip_archive_ext(input: &str) -> &str {
    if let Some(stem) = input.strip_suffix(".zip") {
        stem
    } else if let Some(stem) = input.strip_suffix(".tar.gz") {
        stem
    } else {
        input
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).expect(s)
    }

    #[test]
    fn parses_human_forms() {
        assert_eq!(
            v("1.2"),
            Version {
                major: 1,
                minor: 2,
                patch: 0,
                channel: Channel::Stable,
                channel_rev: 0
            }
        );
        assert_eq!(v("1.2.1a2").channel, Channel::Alpha);
        assert_eq!(v("1.2.1a2").channel_rev, 2);
        assert_eq!(v("1.2.1-b1").channel, Channel::Beta);
    }

    #[test]
    fn strips_archive_extensions() {
        assert_eq!(v("app-mac-0.1.0.tar.gz"), v("0.1.0"));
        assert_eq!(v("app-win-4.1.zip"), v("4.1"));
    }

    #[test]
    fn rejects_bad_dot_counts() {
        assert!(Version::parse("1").is_err());
        assert!(Version::parse("1.1.1.1").is_err());
        assert!(Version::parse("1.1.1.1.1.1").is_err());
    }

    #[test]
    fn rejects_out_of_range_channel_digit() {
        assert!(Version::parse("1.2.3.7.0").is_err());
    }

    #[test]
    fn ordering_follows_channel_weight() {
        assert!(v("1.1b1") < v("1.1"));
        assert!(v("1.2.1a1") < v("1.2.1a2"));
        assert!(v("1.2.1a2") < v("1.2.1b1"));
        assert!(v("1.2.1b1") < v("1.2.1"));
        assert!(v("2.0") > v("1.9.9"));
    }

    #[test]
    fn canonical_round_trips() {
        for s in ["0.1.0", "1.2", "1.2.1b1", "3.0.2a4"] {
            let parsed = v(s);
            assert_eq!(v(&parsed.canonical()), parsed);
        }
    }
}
