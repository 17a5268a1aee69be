//! Resource listing capability
//!
//! Resolution and diagnostics only ever need three listings. They sit behind
//! [`ResourceLister`] so the resolver and the endpoint cache can be driven
//! by an in-memory fake in tests.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ListParams;
use kube::{Api, Client};
use tracing::debug;

use crate::Result;

/// Read-only listings used by the plugin.
///
/// An empty `namespace` means all namespaces.
#[async_trait]
pub trait ResourceLister: Send + Sync {
    /// List pods, optionally filtered by a label selector
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>>;

    /// List endpoint slices
    async fn list_endpoint_slices(&self, namespace: &str) -> Result<Vec<EndpointSlice>>;

    /// List ingress definitions
    async fn list_ingresses(&self, namespace: &str) -> Result<Vec<Ingress>>;
}

/// [`ResourceLister`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeLister {
    client: Client,
}

impl KubeLister {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceLister for KubeLister {
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>> {
        let api: Api<Pod> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let pods = api.list(&params).await?.items;
        debug!(namespace, ?label_selector, count = pods.len(), "Listed pods");
        Ok(pods)
    }

    async fn list_endpoint_slices(&self, namespace: &str) -> Result<Vec<EndpointSlice>> {
        let api: Api<EndpointSlice> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let slices = api.list(&ListParams::default()).await?.items;
        debug!(namespace, count = slices.len(), "Listed endpoint slices");
        Ok(slices)
    }

    async fn list_ingresses(&self, namespace: &str) -> Result<Vec<Ingress>> {
        let api: Api<Ingress> = if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        };
        let ingresses = api.list(&ListParams::default()).await?.items;
        debug!(namespace, count = ingresses.len(), "Listed ingresses");
        Ok(ingresses)
    }
}
