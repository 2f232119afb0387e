//! Helper/server version compatibility.
//!
//! Versions look like `MAJOR.MINOR[.PATCH][-suffix]`. A helper and a server are
//! compatible when their major versions match; while the major version is 0
//! the minor version must match as well.

use std::fmt;

/// Parsed version triple. Suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parses a version string, tolerating a leading `v` and a `-suffix`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let raw = raw.strip_prefix('v').unwrap_or(raw);
        let core = raw.split(['-', '+']).next()?;

        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            major,
            minor,
            patch,
        })
    }

    fn compatible_with(self, other: Self) -> bool {
        if self.major != other.major {
            return false;
        }
        self.major > 0 || self.minor == other.minor
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Outcome of a compatibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    Compatible,
    /// One side did not report a parseable version.
    Unknown,
    Incompatible,
}

/// Compares the helper's version against the server's.
pub fn check(helper: &str, server: &str) -> Compatibility {
    match (Version::parse(helper), Version::parse(server)) {
        (Some(h), Some(s)) if h.compatible_with(s) => Compatibility::Compatible,
        (Some(_), Some(_)) => Compatibility::Incompatible,
        _ => Compatibility::Unknown,
    }
}
