//! Ingress controller pod resolution
//!
//! Turns a user selector (pod name, label selector, or owning deployment)
//! into one running pod and works out which of its containers is the
//! ingress controller running in sidecar mode and which is the proxy.

use std::fmt;

use clap::{Args, ValueEnum};
use k8s_openapi::api::core::v1::{Container, Pod};
use tracing::debug;

use crate::lister::ResourceLister;
use crate::{Error, Result};

/// Env var set on the controller container when it runs as a sidecar
pub const DEPLOYMENT_MODE_ENV: &str = "NS_DEPLOYMENT_MODE";

/// Value of [`DEPLOYMENT_MODE_ENV`] that marks the controller container
pub const SIDECAR_MODE: &str = "SIDECAR";

const RUNNING_PHASE: &str = "Running";

/// How the user picks the ingress controller pod.
///
/// Priority when several are given: pod, then label, then deployment.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    /// Name of the ingress controller pod
    #[arg(long)]
    pub pod: Option<String>,

    /// Label of the ingress controller deployment
    #[arg(short = 'l', long)]
    pub label: Option<String>,

    /// Name of the ingress controller deployment
    #[arg(long)]
    pub deployment: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Selector {
    /// Select by pod name
    pub fn pod(name: impl Into<String>) -> Self {
        Self {
            pod: Some(name.into()),
            ..Default::default()
        }
    }

    /// Select by label selector
    pub fn label(selector: impl Into<String>) -> Self {
        Self {
            label: Some(selector.into()),
            ..Default::default()
        }
    }

    /// Select by owning deployment
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            deployment: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Tie-break when a pod has more than one container without the sidecar marker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProxyContainerPolicy {
    /// The last candidate in pod spec order is the proxy container
    #[default]
    Last,
    /// The first candidate in pod spec order is the proxy container
    First,
    /// More than one candidate is an error
    Strict,
}

/// Role a container plays inside the ingress controller pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerRole {
    /// Ingress controller running as a sidecar
    Integration,
    /// Any other container, a candidate for the proxy role
    Proxy,
}

impl ContainerRole {
    fn of(container: &Container) -> Self {
        let is_sidecar = container.env.iter().flatten().any(|env| {
            env.name == DEPLOYMENT_MODE_ENV && env.value.as_deref() == Some(SIDECAR_MODE)
        });
        if is_sidecar {
            ContainerRole::Integration
        } else {
            ContainerRole::Proxy
        }
    }
}

/// Container names by role; both may be absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerRoles {
    /// Sidecar-mode ingress controller container
    pub integration: Option<String>,
    /// Data-plane container
    pub proxy: Option<String>,
}

impl ContainerRoles {
    /// Classify the containers of `pod` and apply the proxy tie-break policy.
    pub fn classify(pod: &Pod, policy: ProxyContainerPolicy) -> Result<Self> {
        let containers = pod.spec.as_ref().map(|s| s.containers.as_slice()).unwrap_or_default();
        let classified: Vec<(&str, ContainerRole)> = containers
            .iter()
            .map(|c| (c.name.as_str(), ContainerRole::of(c)))
            .collect();

        let integration = classified
            .iter()
            .rev()
            .find(|(_, role)| *role == ContainerRole::Integration)
            .map(|(name, _)| name.to_string());

        let candidates: Vec<&str> = classified
            .iter()
            .filter(|(_, role)| *role == ContainerRole::Proxy)
            .map(|(name, _)| *name)
            .collect();

        let proxy = match policy {
            ProxyContainerPolicy::Last => candidates.last(),
            ProxyContainerPolicy::First => candidates.first(),
            ProxyContainerPolicy::Strict if candidates.len() > 1 => {
                return Err(Error::config(format!(
                    "pod {} has several candidate proxy containers ({}); \
                     pass --proxy-container-policy first or last to pick one",
                    pod.metadata.name.as_deref().unwrap_or("<unnamed>"),
                    candidates.join(", ")
                )));
            }
            ProxyContainerPolicy::Strict => candidates.first(),
        }
        .map(|name| name.to_string());

        Ok(Self { integration, proxy })
    }

    /// Container to run the controller helper in; `None` means the pod's default
    pub fn controller_container(&self) -> Option<&str> {
        self.integration.as_deref()
    }

    /// Container holding the appliance support tooling: the sidecar if any,
    /// otherwise the proxy
    pub fn support_container(&self) -> Option<&str> {
        self.integration.as_deref().or(self.proxy.as_deref())
    }
}

/// A running ingress controller pod and its container roles
#[derive(Clone, Debug)]
pub struct ResolvedPod {
    /// The pod as listed
    pub pod: Pod,
    /// Classified containers
    pub roles: ContainerRoles,
}

impl ResolvedPod {
    /// Pod name
    pub fn name(&self) -> &str {
        self.pod.metadata.name.as_deref().unwrap_or_default()
    }

    /// Pod namespace
    pub fn namespace(&self) -> &str {
        self.pod.metadata.namespace.as_deref().unwrap_or_default()
    }
}

impl fmt::Display for ResolvedPod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace(), self.name())
    }
}

fn is_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .is_some_and(|phase| phase == RUNNING_PHASE)
}

/// Whether `pod` belongs to `deployment`.
///
/// A pod is taken to be in a deployment when its controlling ReplicaSet is
/// named `<deployment>-<hash>`. The hyphen count check rejects
/// `<deployment>-canary-<hash>`, which belongs to a different deployment
/// that merely shares the prefix.
pub fn pod_in_deployment(pod: &Pod, deployment: &str) -> bool {
    let prefix = format!("{}-", deployment);
    let expected_hyphens = deployment.matches('-').count() + 1;
    pod.metadata
        .owner_references
        .iter()
        .flatten()
        .filter(|owner| owner.controller == Some(true) && owner.kind == "ReplicaSet")
        .any(|owner| {
            owner.name.matches('-').count() == expected_hyphens && owner.name.starts_with(&prefix)
        })
}

/// Resolves a [`Selector`] against the pods of one namespace.
pub struct PodResolver<'a> {
    lister: &'a dyn ResourceLister,
    namespace: &'a str,
    policy: ProxyContainerPolicy,
}

impl<'a> PodResolver<'a> {
    /// Create a resolver for `namespace`
    pub fn new(lister: &'a dyn ResourceLister, namespace: &'a str) -> Self {
        Self {
            lister,
            namespace,
            policy: ProxyContainerPolicy::default(),
        }
    }

    /// Use a non-default proxy container tie-break
    pub fn with_policy(mut self, policy: ProxyContainerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Find the running pod the selector designates and classify its containers.
    pub async fn resolve(&self, selector: &Selector) -> Result<ResolvedPod> {
        let pod = if let Some(name) = non_empty(&selector.pod) {
            self.named_pod(name).await?
        } else if let Some(label) = non_empty(&selector.label) {
            self.labeled_pod(label).await?
        } else if let Some(deployment) = non_empty(&selector.deployment) {
            self.deployment_pod(deployment).await?
        } else {
            return Err(Error::config(
                "please provide either label (-l, --label), deployment (--deployment) \
                 or pod (--pod) as a selector in the command",
            ));
        };

        let roles = ContainerRoles::classify(&pod, self.policy)?;
        let resolved = ResolvedPod { pod, roles };
        debug!(
            pod = %resolved,
            integration = ?resolved.roles.integration,
            proxy = ?resolved.roles.proxy,
            "Resolved ingress controller pod"
        );
        Ok(resolved)
    }

    async fn named_pod(&self, name: &str) -> Result<Pod> {
        self.lister
            .list_pods(self.namespace, None)
            .await?
            .into_iter()
            .find(|pod| pod.metadata.name.as_deref() == Some(name) && is_running(pod))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "pod {} not found in namespace {} or is not in healthy state",
                    name, self.namespace
                ))
            })
    }

    async fn labeled_pod(&self, label: &str) -> Result<Pod> {
        let pods = self.lister.list_pods(self.namespace, Some(label)).await?;
        self.first_running(pods, &format!("label selector {}", label))
    }

    async fn deployment_pod(&self, deployment: &str) -> Result<Pod> {
        let pods = self
            .lister
            .list_pods(self.namespace, None)
            .await?
            .into_iter()
            .filter(|pod| pod_in_deployment(pod, deployment))
            .collect();
        self.first_running(pods, &format!("deployment {}", deployment))
    }

    fn first_running(&self, pods: Vec<Pod>, what: &str) -> Result<Pod> {
        if pods.is_empty() {
            return Err(Error::not_found(format!(
                "no pods for {} found in namespace {}",
                what, self.namespace
            )));
        }
        pods.into_iter().find(is_running).ok_or_else(|| {
            Error::not_found(format!(
                "no pods for {} found in namespace {} with healthy state",
                what, self.namespace
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use k8s_openapi::api::core::v1::{EnvVar, PodSpec, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    use super::*;
    use crate::lister::fake::FakeLister;

    fn container(name: &str, env: &[(&str, &str)]) -> Container {
        Container {
            name: name.to_string(),
            env: (!env.is_empty()).then(|| {
                env.iter()
                    .map(|(k, v)| EnvVar {
                        name: k.to_string(),
                        value: Some(v.to_string()),
                        ..Default::default()
                    })
                    .collect()
            }),
            ..Default::default()
        }
    }

    fn owner(kind: &str, name: &str, controller: Option<bool>) -> OwnerReference {
        OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            uid: format!("uid-{}", name),
            controller,
            ..Default::default()
        }
    }

    fn pod(name: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ingress".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container("cic", &[])],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
        }
    }

    fn with_labels(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
        pod.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        pod
    }

    fn with_owner(mut pod: Pod, owner: OwnerReference) -> Pod {
        pod.metadata.owner_references = Some(vec![owner]);
        pod
    }

    fn with_containers(mut pod: Pod, containers: Vec<Container>) -> Pod {
        pod.spec = Some(PodSpec {
            containers,
            ..Default::default()
        });
        pod
    }

    // =========================================================================
    // Deployment membership
    // =========================================================================

    #[test]
    fn replicaset_of_the_deployment_is_a_member() {
        let p = with_owner(
            pod("myapp-7d9f8b6-x2z9p", "Running"),
            owner("ReplicaSet", "myapp-7d9f8b6", Some(true)),
        );
        assert!(pod_in_deployment(&p, "myapp"));
    }

    #[test]
    fn shared_prefix_with_extra_segment_is_not_a_member() {
        let p = with_owner(
            pod("myapp-canary-7d9f8b6-x2z9p", "Running"),
            owner("ReplicaSet", "myapp-canary-7d9f8b6", Some(true)),
        );
        assert!(!pod_in_deployment(&p, "myapp"));
        assert!(pod_in_deployment(&p, "myapp-canary"));
    }

    #[test]
    fn non_controller_or_non_replicaset_owner_is_ignored() {
        let p = with_owner(
            pod("myapp-7d9f8b6-x2z9p", "Running"),
            owner("ReplicaSet", "myapp-7d9f8b6", Some(false)),
        );
        assert!(!pod_in_deployment(&p, "myapp"));

        let p = with_owner(
            pod("myapp-7d9f8b6-x2z9p", "Running"),
            owner("ReplicaSet", "myapp-7d9f8b6", None),
        );
        assert!(!pod_in_deployment(&p, "myapp"));

        let p = with_owner(
            pod("myapp-0", "Running"),
            owner("StatefulSet", "myapp-abc", Some(true)),
        );
        assert!(!pod_in_deployment(&p, "myapp"));
    }

    #[test]
    fn pod_without_owners_is_not_a_member() {
        assert!(!pod_in_deployment(&pod("myapp-7d9f8b6-x2z9p", "Running"), "myapp"));
    }

    // =========================================================================
    // Container classification
    // =========================================================================

    fn sidecar_pod() -> Pod {
        with_containers(
            pod("cpx-ingress-1", "Running"),
            vec![
                container("cpx-ingress", &[("EULA", "yes")]),
                container("cic", &[("NS_IP", "127.0.0.1"), (DEPLOYMENT_MODE_ENV, SIDECAR_MODE)]),
                container("exporter", &[]),
            ],
        )
    }

    #[test]
    fn sidecar_marker_identifies_integration_container() {
        let roles = ContainerRoles::classify(&sidecar_pod(), ProxyContainerPolicy::Last).unwrap();
        assert_eq!(roles.integration.as_deref(), Some("cic"));
        assert_eq!(roles.controller_container(), Some("cic"));
        assert_eq!(roles.support_container(), Some("cic"));
    }

    #[test]
    fn last_policy_keeps_the_last_candidate() {
        let roles = ContainerRoles::classify(&sidecar_pod(), ProxyContainerPolicy::Last).unwrap();
        assert_eq!(roles.proxy.as_deref(), Some("exporter"));
    }

    #[test]
    fn first_policy_keeps_the_first_candidate() {
        let roles = ContainerRoles::classify(&sidecar_pod(), ProxyContainerPolicy::First).unwrap();
        assert_eq!(roles.proxy.as_deref(), Some("cpx-ingress"));
    }

    #[test]
    fn strict_policy_rejects_ambiguous_proxy() {
        let err = ContainerRoles::classify(&sidecar_pod(), ProxyContainerPolicy::Strict).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("cpx-ingress, exporter"));
    }

    #[test]
    fn strict_policy_accepts_single_proxy() {
        let p = with_containers(
            pod("cpx-1", "Running"),
            vec![
                container("cpx", &[]),
                container("cic", &[(DEPLOYMENT_MODE_ENV, SIDECAR_MODE)]),
            ],
        );
        let roles = ContainerRoles::classify(&p, ProxyContainerPolicy::Strict).unwrap();
        assert_eq!(roles.proxy.as_deref(), Some("cpx"));
        assert_eq!(roles.integration.as_deref(), Some("cic"));
    }

    #[test]
    fn marker_with_other_value_is_not_integration() {
        let p = with_containers(
            pod("cic-1", "Running"),
            vec![container("cic", &[(DEPLOYMENT_MODE_ENV, "STANDALONE")])],
        );
        let roles = ContainerRoles::classify(&p, ProxyContainerPolicy::Last).unwrap();
        assert_eq!(roles.integration, None);
        assert_eq!(roles.proxy.as_deref(), Some("cic"));
        assert_eq!(roles.controller_container(), None);
        assert_eq!(roles.support_container(), Some("cic"));
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    fn cluster() -> FakeLister {
        FakeLister {
            pods: vec![
                with_labels(pod("cic-pending", "Pending"), &[("app", "cic")]),
                with_labels(
                    with_owner(
                        pod("cic-5f6d7c8b9-abcde", "Running"),
                        owner("ReplicaSet", "cic-5f6d7c8b9", Some(true)),
                    ),
                    &[("app", "cic")],
                ),
                with_labels(pod("other", "Running"), &[("app", "other")]),
                with_labels(pod("stuck", "Failed"), &[("app", "stuck")]),
                with_owner(
                    pod("cic-canary-1a2b3c-zzzzz", "Running"),
                    owner("ReplicaSet", "cic-canary-1a2b3c", Some(true)),
                ),
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resolves_pod_by_name() {
        let lister = cluster();
        let resolved = PodResolver::new(&lister, "ingress")
            .resolve(&Selector::pod("other"))
            .await
            .unwrap();
        assert_eq!(resolved.name(), "other");
        assert_eq!(resolved.to_string(), "ingress/other");
    }

    #[tokio::test]
    async fn named_pod_that_is_not_running_is_not_found() {
        let lister = cluster();
        let err = PodResolver::new(&lister, "ingress")
            .resolve(&Selector::pod("stuck"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.to_string().contains("not in healthy state"));
    }

    #[tokio::test]
    async fn name_takes_priority_over_label() {
        let lister = cluster();
        let selector = Selector {
            pod: Some("other".to_string()),
            label: Some("app=cic".to_string()),
            deployment: Some("cic".to_string()),
        };
        let resolved = PodResolver::new(&lister, "ingress")
            .resolve(&selector)
            .await
            .unwrap();

        assert_eq!(resolved.name(), "other");
        assert_eq!(
            lister.pod_call_log(),
            vec![("ingress".to_string(), None)],
            "label selector must not be used when a pod name is given"
        );
    }

    #[tokio::test]
    async fn label_takes_priority_over_deployment() {
        let lister = cluster();
        let selector = Selector {
            label: Some("app=other".to_string()),
            deployment: Some("cic".to_string()),
            ..Default::default()
        };
        let resolved = PodResolver::new(&lister, "ingress")
            .resolve(&selector)
            .await
            .unwrap();
        assert_eq!(resolved.name(), "other");
    }

    #[tokio::test]
    async fn label_selection_skips_pods_that_are_not_running() {
        let lister = cluster();
        let resolved = PodResolver::new(&lister, "ingress")
            .resolve(&Selector::label("app=cic"))
            .await
            .unwrap();
        assert_eq!(resolved.name(), "cic-5f6d7c8b9-abcde");
        assert_eq!(
            lister.pod_call_log(),
            vec![("ingress".to_string(), Some("app=cic".to_string()))]
        );
    }

    #[tokio::test]
    async fn label_selection_distinguishes_no_pods_from_no_healthy_pods() {
        let lister = cluster();
        let resolver = PodResolver::new(&lister, "ingress");

        let none = resolver.resolve(&Selector::label("app=nothing")).await.unwrap_err();
        assert_eq!(
            none.to_string(),
            "no pods for label selector app=nothing found in namespace ingress"
        );

        let unhealthy = resolver.resolve(&Selector::label("app=stuck")).await.unwrap_err();
        assert_eq!(
            unhealthy.to_string(),
            "no pods for label selector app=stuck found in namespace ingress with healthy state"
        );
    }

    #[tokio::test]
    async fn deployment_selection_uses_ownership() {
        let lister = cluster();
        let resolver = PodResolver::new(&lister, "ingress");

        let resolved = resolver.resolve(&Selector::deployment("cic")).await.unwrap();
        assert_eq!(resolved.name(), "cic-5f6d7c8b9-abcde");

        let canary = resolver
            .resolve(&Selector::deployment("cic-canary"))
            .await
            .unwrap();
        assert_eq!(canary.name(), "cic-canary-1a2b3c-zzzzz");

        let err = resolver
            .resolve(&Selector::deployment("missing"))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "no pods for deployment missing found in namespace ingress"
        );
    }

    #[tokio::test]
    async fn no_selector_is_a_config_error() {
        let lister = cluster();
        let err = PodResolver::new(&lister, "ingress")
            .resolve(&Selector::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
        assert!(err.to_string().contains("--label"));
        assert!(lister.pod_call_log().is_empty());
    }

    #[tokio::test]
    async fn empty_strings_count_as_absent() {
        let lister = cluster();
        let selector = Selector {
            pod: Some(String::new()),
            label: Some("app=other".to_string()),
            ..Default::default()
        };
        let resolved = PodResolver::new(&lister, "ingress")
            .resolve(&selector)
            .await
            .unwrap();
        assert_eq!(resolved.name(), "other");
    }

    #[tokio::test]
    async fn strict_policy_is_applied_during_resolution() {
        let lister = FakeLister {
            pods: vec![sidecar_pod()],
            ..Default::default()
        };
        let err = PodResolver::new(&lister, "ingress")
            .with_policy(ProxyContainerPolicy::Strict)
            .resolve(&Selector::pod("cpx-ingress-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
