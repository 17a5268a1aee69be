//! CLI commands

use std::sync::Arc;

use kube::Client;
use netscaler_common::{
    check_version, ConnectionFlags, EndpointSliceCache, KubeLister, Kubectl, PodResolver,
    ProcessRunner, ProxyContainerPolicy, ResolvedPod, ResourceLister, Selector, PLUGIN_SCRIPT,
    PYTHON,
};
use tracing::{debug, info};

use crate::Result;

pub mod conf;
pub mod format;
pub mod ingresses;
pub mod status;
pub mod support;

/// Outcome of resolving the controller pod and checking its version.
#[derive(Debug)]
pub enum Gate {
    /// The pod runs a supported controller
    Ready(ResolvedPod),
    /// The controller is too old or has no version; carries the user message
    Unsupported(String),
}

/// Everything one plugin invocation needs to talk to the cluster.
///
/// The endpoint slice cache lives here so that every lookup in the
/// invocation shares one prefetch.
pub struct Session {
    pub kubectl: Kubectl,
    pub lister: Arc<dyn ResourceLister>,
    pub namespace: String,
    pub endpoints: EndpointSliceCache,
    pub policy: ProxyContainerPolicy,
}

impl Session {
    /// Build a session from the global connection flags
    pub async fn connect(connection: &ConnectionFlags, policy: ProxyContainerPolicy) -> Result<Self> {
        let config = connection.kube_config().await?;
        let namespace = connection.resolve_namespace(&config)?;
        let client = Client::try_from(config)?;
        debug!(namespace = %namespace, "Connected to cluster");

        let kubectl = Kubectl::new(connection, Arc::new(ProcessRunner::new()));
        Ok(Self::new(
            kubectl,
            Arc::new(KubeLister::new(client)),
            namespace,
            policy,
        ))
    }

    /// Assemble a session from parts
    pub fn new(
        kubectl: Kubectl,
        lister: Arc<dyn ResourceLister>,
        namespace: impl Into<String>,
        policy: ProxyContainerPolicy,
    ) -> Self {
        Self {
            kubectl,
            endpoints: EndpointSliceCache::new(lister.clone()),
            lister,
            namespace: namespace.into(),
            policy,
        }
    }

    /// Resolve the controller pod in the session namespace
    pub async fn resolve(&self, selector: &Selector) -> Result<ResolvedPod> {
        let resolved = PodResolver::new(self.lister.as_ref(), &self.namespace)
            .with_policy(self.policy)
            .resolve(selector)
            .await?;
        Ok(resolved)
    }

    /// Resolve the controller pod and make sure it runs a supported version
    pub async fn gate(&self, selector: &Selector) -> Result<Gate> {
        let resolved = self.resolve(selector).await?;
        let status = check_version(
            &self.kubectl,
            &resolved.pod,
            resolved.roles.controller_container(),
        )
        .await?;

        match status.message() {
            Some(message) => {
                info!(pod = %resolved, ?status, "Controller version not supported");
                Ok(Gate::Unsupported(message))
            }
            None => Ok(Gate::Ready(resolved)),
        }
    }
}

/// `python3 plugin.py -c <subcommand>` as run inside the controller
pub fn plugin_command(subcommand: &str) -> Vec<&str> {
    vec![PYTHON, PLUGIN_SCRIPT, "-c", subcommand]
}
