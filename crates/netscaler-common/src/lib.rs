//! Core of the NetScaler kubectl plugin: pod resolution, version gating,
//! endpoint caching, kubectl bridging and support artifact persistence

#![deny(missing_docs)]

pub mod artifact;
pub mod connection;
pub mod endpoints;
pub mod error;
pub mod kubectl;
pub mod lister;
pub mod resolver;
pub mod version;

pub use artifact::{Artifact, ArtifactWriter, DumpVerb};
pub use connection::ConnectionFlags;
pub use endpoints::EndpointSliceCache;
pub use error::Error;
pub use kubectl::{CommandOutput, CommandRunner, Kubectl, ProcessRunner};
pub use lister::{KubeLister, ResourceLister};
pub use resolver::{ContainerRoles, PodResolver, ProxyContainerPolicy, ResolvedPod, Selector};
pub use version::{check_version, Version, VersionStatus};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Helper script inside the controller container that implements the
/// plugin subcommands
pub const PLUGIN_SCRIPT: &str = "/usr/src/triton/plugin/plugin.py";

/// Interpreter for [`PLUGIN_SCRIPT`]
pub const PYTHON: &str = "python3";
