//! Support artifact persistence
//!
//! Captured command output is written below a bundle root as
//! `<root>/<namespace>/<category>/<file>`. IPv4 addresses are replaced with
//! `X.X.X.X` unless the user asked for them to be kept.

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::{NoExpand, Regex};
use tracing::debug;

use crate::{Error, Result};

/// Replacement for every masked address
pub const MASKED_IP: &str = "X.X.X.X";

static IPV4_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"((25[0-5]|(2[0-4]|1\d|[1-9]|)\d)\.?\b){4}").expect("IPv4 pattern is a valid regex")
});

/// Replace IPv4-shaped text with [`MASKED_IP`].
pub fn mask_ips(content: &str) -> Cow<'_, str> {
    IPV4_PATTERN.replace_all(content, NoExpand(MASKED_IP))
}

/// kubectl verb a resource dump was taken with
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DumpVerb {
    /// `kubectl get <kind> -o yaml`
    Get,
    /// `kubectl describe <kind>`
    Describe,
}

impl DumpVerb {
    /// The kubectl subcommand
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpVerb::Get => "get",
            DumpVerb::Describe => "describe",
        }
    }
}

impl fmt::Display for DumpVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a support artifact holds; decides where it lands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Artifact<'a> {
    /// Current controller logs
    Logs,
    /// Logs of the previous controller container instance
    PreviousLogs,
    /// The controller pod as YAML
    PodManifest,
    /// A get or describe listing of one resource kind
    Dump {
        /// How the listing was taken
        verb: DumpVerb,
        /// Resource kind as passed to kubectl (`svc`, `ing`, ...)
        kind: &'a str,
    },
}

impl Artifact<'_> {
    /// Directory below the namespace
    pub fn category(&self) -> Cow<'_, str> {
        match self {
            Artifact::Logs | Artifact::PreviousLogs => Cow::Borrowed("cic_logs"),
            Artifact::PodManifest => Cow::Borrowed("cic_deployment"),
            Artifact::Dump { kind, .. } => Cow::Borrowed(*kind),
        }
    }

    /// File name inside the category directory
    pub fn file_name(&self) -> Cow<'_, str> {
        match self {
            Artifact::Logs => Cow::Borrowed("cic_logs.txt"),
            Artifact::PreviousLogs => Cow::Borrowed("restarted_pod_logs.txt"),
            Artifact::PodManifest => Cow::Borrowed("cic_deployment.txt"),
            Artifact::Dump { verb, kind } => Cow::Owned(format!("{}_{}.txt", verb, kind)),
        }
    }
}

/// Write `content` to `root/namespace/category/filename`.
///
/// The category directory is always created. Empty content writes no file
/// and returns `Ok(None)`. Content is masked unless `unmask` is set.
pub fn write_artifact(
    root: &Path,
    namespace: &str,
    category: &str,
    filename: &str,
    content: &str,
    unmask: bool,
) -> Result<Option<PathBuf>> {
    let dir = root.join(namespace).join(category);
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    if content.is_empty() {
        debug!(dir = %dir.display(), "Nothing to write");
        return Ok(None);
    }

    let content = if unmask {
        Cow::Borrowed(content)
    } else {
        mask_ips(content)
    };
    let path = dir.join(filename);
    fs::write(&path, content.as_bytes()).map_err(|e| Error::io(&path, e))?;
    debug!(path = %path.display(), bytes = content.len(), "Wrote artifact");
    Ok(Some(path))
}

/// Writes artifacts below one bundle root.
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    root: PathBuf,
    unmask: bool,
}

impl ArtifactWriter {
    /// Writer rooted at `root`; `unmask` keeps IP addresses intact
    pub fn new(root: impl Into<PathBuf>, unmask: bool) -> Self {
        Self {
            root: root.into(),
            unmask,
        }
    }

    /// Persist `content` as `artifact` for `namespace`
    pub fn write(&self, namespace: &str, artifact: &Artifact<'_>, content: &str) -> Result<Option<PathBuf>> {
        write_artifact(
            &self.root,
            namespace,
            &artifact.category(),
            &artifact.file_name(),
            content,
            self.unmask,
        )
    }
}
