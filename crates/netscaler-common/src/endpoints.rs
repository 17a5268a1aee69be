//! Session-scoped endpoint slice cache
//!
//! Diagnostics ask for the endpoints behind many services, usually spread
//! over several namespaces. The first namespaced lookup triggers a single
//! cluster-wide listing; every later namespace is served by filtering that
//! listing in memory. If the cluster-wide listing is refused (namespaced RBAC
//! is common for ingress operators) the failure is remembered and lookups
//! fall back to per-namespace listings without retrying the wide one.
//!
//! Entries never expire. The cache belongs to one plugin invocation.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::discovery::v1::EndpointSlice;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::lister::ResourceLister;
use crate::Result;

/// Label that ties an EndpointSlice to its owning Service
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Cache key for the cluster-wide listing
const ALL_NAMESPACES: &str = "";

/// Memoized EndpointSlice listings keyed by namespace.
///
/// `None` under the all-namespaces key marks a failed prefetch.
pub struct EndpointSliceCache {
    lister: Arc<dyn ResourceLister>,
    entries: Mutex<HashMap<String, Option<Vec<EndpointSlice>>>>,
}

impl EndpointSliceCache {
    /// Create an empty cache over `lister`
    pub fn new(lister: Arc<dyn ResourceLister>) -> Self {
        Self {
            lister,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// All endpoint slices in `namespace` (`""` for every namespace).
    pub async fn get(&self, namespace: &str) -> Result<Vec<EndpointSlice>> {
        let mut entries = self.entries.lock().await;

        if let Some(Some(slices)) = entries.get(namespace) {
            return Ok(slices.clone());
        }

        if !namespace.is_empty() && !entries.contains_key(ALL_NAMESPACES) {
            let prefetched = match self.lister.list_endpoint_slices(ALL_NAMESPACES).await {
                Ok(all) => {
                    debug!(count = all.len(), "Prefetched endpoint slices in all namespaces");
                    Some(all)
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Cluster-wide endpoint slice listing failed, using namespaced listings"
                    );
                    None
                }
            };
            entries.insert(ALL_NAMESPACES.to_string(), prefetched);
        }

        let filtered = match entries.get(ALL_NAMESPACES) {
            Some(Some(all)) => Some(
                all.iter()
                    .filter(|s| s.metadata.namespace.as_deref() == Some(namespace))
                    .cloned()
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        };
        if let Some(slices) = filtered {
            entries.insert(namespace.to_string(), Some(slices.clone()));
            return Ok(slices);
        }

        let slices = self.lister.list_endpoint_slices(namespace).await?;
        entries.insert(namespace.to_string(), Some(slices.clone()));
        Ok(slices)
    }

    /// Endpoint slices that back `service` in `namespace`
    pub async fn for_service(&self, namespace: &str, service: &str) -> Result<Vec<EndpointSlice>> {
        Ok(self
            .get(namespace)
            .await?
            .into_iter()
            .filter(|slice| {
                slice
                    .metadata
                    .labels
                    .as_ref()
                    .and_then(|labels| labels.get(SERVICE_NAME_LABEL))
                    .is_some_and(|name| name == service)
            })
            .collect())
    }

    /// Total endpoint addresses behind `service`.
    ///
    /// `None` when the service has no endpoint slices at all, which usually
    /// means the service does not exist or has no selector.
    pub async fn address_count(&self, namespace: &str, service: &str) -> Result<Option<usize>> {
        let slices = self.for_service(namespace, service).await?;
        if slices.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            slices
                .iter()
                .flat_map(|slice| slice.endpoints.iter())
                .map(|endpoint| endpoint.addresses.len())
                .sum(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::discovery::v1::Endpoint;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    use super::*;
    use crate::lister::fake::FakeLister;
    use crate::Error;

    fn slice(namespace: &str, name: &str, service: &str, addresses: &[&[&str]]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([(
                    SERVICE_NAME_LABEL.to_string(),
                    service.to_string(),
                )])),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: addresses
                .iter()
                .map(|addrs| Endpoint {
                    addresses: addrs.iter().map(|a| a.to_string()).collect(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    fn lister() -> FakeLister {
        FakeLister {
            slices: vec![
                slice("ns1", "web-abc", "web", &[&["10.0.0.1"], &["10.0.0.2"]]),
                slice("ns1", "web-def", "web", &[&["10.0.0.3", "10.0.0.4"]]),
                slice("ns1", "api-xyz", "api", &[]),
                slice("ns2", "web-ghi", "web", &[&["10.1.0.1"]]),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn wide_listing_serves_later_namespaces_without_extra_calls() {
        let lister = Arc::new(lister());
        let cache = EndpointSliceCache::new(lister.clone());

        let all = cache.get("").await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(lister.slice_call_count(), 1);

        let ns1 = cache.get("ns1").await.unwrap();
        assert_eq!(ns1.len(), 3);
        assert!(ns1
            .iter()
            .all(|s| s.metadata.namespace.as_deref() == Some("ns1")));

        let ns2 = cache.get("ns2").await.unwrap();
        assert_eq!(ns2.len(), 1);

        assert_eq!(lister.slice_call_count(), 1);
    }

    #[tokio::test]
    async fn first_namespaced_lookup_prefetches_everything() {
        let lister = Arc::new(lister());
        let cache = EndpointSliceCache::new(lister.clone());

        assert_eq!(cache.get("ns2").await.unwrap().len(), 1);
        assert_eq!(cache.get("ns1").await.unwrap().len(), 3);
        assert_eq!(cache.get("empty").await.unwrap().len(), 0);
        assert_eq!(cache.get("ns1").await.unwrap().len(), 3);

        assert_eq!(*lister.slice_calls.lock().unwrap(), vec!["".to_string()]);
    }

    #[tokio::test]
    async fn failed_prefetch_is_not_retried() {
        let lister = Arc::new(FakeLister {
            fail_all_namespace_slices: true,
            ..lister()
        });
        let cache = EndpointSliceCache::new(lister.clone());

        assert_eq!(cache.get("ns1").await.unwrap().len(), 3);
        assert_eq!(cache.get("ns2").await.unwrap().len(), 1);
        assert_eq!(cache.get("ns1").await.unwrap().len(), 3);

        assert_eq!(
            *lister.slice_calls.lock().unwrap(),
            vec!["".to_string(), "ns1".to_string(), "ns2".to_string()]
        );
    }

    #[tokio::test]
    async fn explicit_all_namespace_lookup_after_failed_prefetch_surfaces_error() {
        let lister = Arc::new(FakeLister {
            fail_all_namespace_slices: true,
            ..lister()
        });
        let cache = EndpointSliceCache::new(lister.clone());

        cache.get("ns1").await.unwrap();
        assert!(matches!(cache.get("").await, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn address_count_sums_all_slices_of_a_service() {
        let cache = EndpointSliceCache::new(Arc::new(lister()));

        assert_eq!(cache.address_count("ns1", "web").await.unwrap(), Some(4));
        assert_eq!(cache.address_count("ns2", "web").await.unwrap(), Some(1));
        assert_eq!(cache.address_count("ns1", "api").await.unwrap(), Some(0));
        assert_eq!(cache.address_count("ns1", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn slices_without_service_label_are_ignored() {
        let mut unlabeled = slice("ns1", "orphan", "web", &[&["10.9.9.9"]]);
        unlabeled.metadata.labels = None;
        let mut lister = lister();
        lister.slices.push(unlabeled);
        let cache = EndpointSliceCache::new(Arc::new(lister));

        assert_eq!(cache.for_service("ns1", "web").await.unwrap().len(), 2);
    }
}
