//! Controller version gating
//!
//! The plugin talks to a helper script that ships inside the ingress
//! controller image. Older images either lack the script or speak a
//! different protocol, so every subcommand first reads the controller's
//! version file and refuses to continue below [`MINIMUM_SUPPORTED_VERSION`].

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use k8s_openapi::api::core::v1::Pod;
use regex::Regex;
use tracing::debug;

use crate::kubectl::Kubectl;
use crate::{Error, Result};

/// Path of the version file inside the controller container
pub const VERSION_FILE: &str = "/usr/src/triton/VERSION";

/// Oldest controller version the plugin can drive
pub const MINIMUM_SUPPORTED_VERSION: Version = Version::new(1, 31, 4);

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+)\.(\d+)\.(\d+)").expect("version pattern is a valid regex")
});

/// A `major.minor.patch` triple, ordered lexicographically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
}

impl Version {
    /// Construct a version from its components
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    /// Parse the first `N.N.N` found in free text.
    ///
    /// Anything around the triple (a `v` prefix, `-rc1`, build metadata, a
    /// trailing newline from `cat`) is ignored.
    fn from_str(s: &str) -> Result<Self> {
        let caps = VERSION_PATTERN
            .captures(s)
            .ok_or_else(|| Error::parse(s))?;
        let component = |i: usize| -> Result<u64> {
            caps[i].parse().map_err(|_| Error::parse(s))
        };
        Ok(Self::new(component(1)?, component(2)?, component(3)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Whether `remote` is at or above `minimum`.
///
/// Either string failing to parse is an error, never an implicit `0.0.0`.
pub fn is_compatible(minimum: &str, remote: &str) -> Result<bool> {
    let minimum: Version = minimum.parse()?;
    let remote: Version = remote.parse()?;
    Ok(remote >= minimum)
}

/// Outcome of a version check that did not fail outright.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionStatus {
    /// The controller is new enough
    Compatible(Version),
    /// The version file exists but is empty (or absent from the image)
    Missing,
    /// The controller predates [`MINIMUM_SUPPORTED_VERSION`]
    TooOld(Version),
}

impl VersionStatus {
    /// Classify the raw content of the version file
    pub fn from_file_content(content: &str) -> Result<Self> {
        let content = content.trim();
        if content.is_empty() {
            return Ok(VersionStatus::Missing);
        }
        let version: Version = content.parse()?;
        if version >= MINIMUM_SUPPORTED_VERSION {
            Ok(VersionStatus::Compatible(version))
        } else {
            Ok(VersionStatus::TooOld(version))
        }
    }

    /// Whether the plugin may proceed
    pub fn is_compatible(&self) -> bool {
        matches!(self, VersionStatus::Compatible(_))
    }

    /// Message shown to the user when the plugin may not proceed
    pub fn message(&self) -> Option<String> {
        match self {
            VersionStatus::Compatible(_) => None,
            VersionStatus::Missing => Some(format!(
                "CIC Version file is Empty, CIC Version supported from: {}",
                MINIMUM_SUPPORTED_VERSION
            )),
            VersionStatus::TooOld(version) => Some(format!(
                "CIC Version: {} not supported for kubectl plugin. This is supported from: {}",
                version, MINIMUM_SUPPORTED_VERSION
            )),
        }
    }
}

/// Read the controller version from inside `container` and gate on it.
///
/// A failing `kubectl exec` is returned as-is; only an empty file is a soft
/// failure.
pub async fn check_version(
    kubectl: &Kubectl,
    pod: &Pod,
    container: Option<&str>,
) -> Result<VersionStatus> {
    let content = kubectl
        .exec(pod, container, &["cat", VERSION_FILE])
        .await?;
    let status = VersionStatus::from_file_content(&content)?;
    debug!(?status, "Checked controller version");
    Ok(status)
}
