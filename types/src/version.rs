//! Negotiated worker version and the capability gate.
//!
//! Every behavioral difference between worker releases is expressed as a
//! single [`ServerVersion::supports`] call against one of the feature
//! constants below. Call sites never compare version strings themselves.

use std::fmt;

use semver::Version;
use serde::{Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("invalid server version {raw:?}: {source}")]
pub struct VersionError {
    raw: String,
    #[source]
    source: semver::Error,
}

/// Immutable semantic version reported by a worker installation.
///
/// Prerelease and build suffixes are kept for display but ignored by
/// [`supports`](Self::supports): a `3.1.0-dev` build gates like `3.1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerVersion(Version);

impl ServerVersion {
    /// Version assumed when the installation metadata is unreadable.
    pub const DEFAULT: Self = Self::new(1, 0, 0);
    /// Inferred-project compiler options, typing acquisition flag.
    pub const V206: Self = Self::new(2, 0, 6);
    /// In-memory (non-file) resources are addressed by URI.
    pub const V213: Self = Self::new(2, 1, 3);
    /// Cancellation pipe and worker log file.
    pub const V222: Self = Self::new(2, 2, 2);
    /// Global plugins.
    pub const V230: Self = Self::new(2, 3, 0);
    /// Explicit npm location.
    pub const V234: Self = Self::new(2, 3, 4);
    /// One inferred project per project root.
    pub const V250: Self = Self::new(2, 5, 0);
    /// `^` prefix on in-memory resource names.
    pub const V270: Self = Self::new(2, 7, 0);

    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parse a version string such as `"2.1.0"` or `"3.1.0-dev.20180901"`.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        Version::parse(raw.trim())
            .map(Self)
            .map_err(|source| VersionError {
                raw: raw.to_string(),
                source,
            })
    }

    /// Whether this worker has the behavior introduced in `feature`.
    #[must_use]
    pub fn supports(&self, feature: &ServerVersion) -> bool {
        self.core() >= feature.core()
    }

    fn core(&self) -> (u64, u64, u64) {
        (self.0.major, self.0.minor, self.0.patch)
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for ServerVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
