//! kubectl-compatible connection flags
//!
//! The plugin accepts the same global flags as `kubectl` so that
//! `kubectl netscaler --context prod status ...` behaves like any other
//! kubectl subcommand. The flags are used twice:
//!
//! - serialized back into `--flag=value` tokens for every `kubectl` child
//!   process ([`ConnectionFlags::to_kubectl_args`]);
//! - applied to the kube-rs client configuration used for listings
//!   ([`ConnectionFlags::kube_config`]).

use std::time::Duration;

use clap::Args;
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig};
use kube::Config;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Global cluster-connection flags, mirroring kubectl's own.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionFlags {
    /// Path to the kubeconfig file to use for CLI requests
    #[arg(long, global = true)]
    pub kubeconfig: Option<String>,

    /// Default cache directory
    #[arg(long = "cache-dir", global = true)]
    pub cache_dir: Option<String>,

    /// Path to a client certificate file for TLS
    #[arg(long = "client-certificate", global = true)]
    pub client_certificate: Option<String>,

    /// Path to a client key file for TLS
    #[arg(long = "client-key", global = true)]
    pub client_key: Option<String>,

    /// Bearer token for authentication to the API server
    #[arg(long, global = true)]
    pub token: Option<String>,

    /// Username to impersonate for the operation
    #[arg(long = "as", global = true)]
    pub impersonate: Option<String>,

    /// Group to impersonate for the operation, repeat for multiple groups
    #[arg(long = "as-group", global = true)]
    pub impersonate_groups: Vec<String>,

    /// Username for basic authentication to the API server
    #[arg(long, global = true)]
    pub username: Option<String>,

    /// Password for basic authentication to the API server
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// The name of the kubeconfig cluster to use
    #[arg(long, global = true)]
    pub cluster: Option<String>,

    /// The name of the kubeconfig user to use
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// If present, the namespace scope for this CLI request
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,

    /// The name of the kubeconfig context to use
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// The address and port of the Kubernetes API server
    #[arg(short = 's', long, global = true)]
    pub server: Option<String>,

    /// If true, the server's certificate will not be checked for validity
    #[arg(
        long = "insecure-skip-tls-verify",
        global = true,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true"
    )]
    pub insecure_skip_tls_verify: Option<bool>,

    /// Path to a cert file for the certificate authority
    #[arg(long = "certificate-authority", global = true)]
    pub certificate_authority: Option<String>,

    /// The length of time to wait before giving up on a single server request (e.g. 1s, 2m, 3h)
    #[arg(long = "request-timeout", global = true)]
    pub request_timeout: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

fn push_string(out: &mut Vec<String>, flag: &str, value: &Option<String>) {
    if let Some(value) = non_empty(value) {
        out.push(format!("--{}={}", flag, value));
    }
}

fn push_bool(out: &mut Vec<String>, flag: &str, value: Option<bool>) {
    if let Some(value) = value {
        out.push(format!("--{}={}", flag, value));
    }
}

fn push_list(out: &mut Vec<String>, flag: &str, values: &[String]) {
    if !values.is_empty() {
        out.push(format!("--{}={}", flag, values.join(",")));
    }
}

impl ConnectionFlags {
    /// Serialize the flags into `kubectl` arguments.
    ///
    /// Empty strings are skipped. `--insecure-skip-tls-verify` is emitted
    /// whenever it was given, including an explicit `false`. The namespace is
    /// never emitted: each command passes `-n` for the namespace it targets.
    pub fn to_kubectl_args(&self) -> Vec<String> {
        let mut out = Vec::new();
        push_string(&mut out, "kubeconfig", &self.kubeconfig);
        push_string(&mut out, "cache-dir", &self.cache_dir);
        push_string(&mut out, "client-certificate", &self.client_certificate);
        push_string(&mut out, "client-key", &self.client_key);
        push_string(&mut out, "token", &self.token);
        push_string(&mut out, "as", &self.impersonate);
        push_list(&mut out, "as-group", &self.impersonate_groups);
        push_string(&mut out, "username", &self.username);
        push_string(&mut out, "password", &self.password);
        push_string(&mut out, "cluster", &self.cluster);
        push_string(&mut out, "user", &self.user);
        push_string(&mut out, "context", &self.context);
        push_string(&mut out, "server", &self.server);
        push_bool(
            &mut out,
            "insecure-skip-tls-verify",
            self.insecure_skip_tls_verify,
        );
        push_string(&mut out, "certificate-authority", &self.certificate_authority);
        push_string(&mut out, "request-timeout", &self.request_timeout);
        out
    }

    /// Build a kube-rs [`Config`] that honors the same flags kubectl would.
    ///
    /// Without `--kubeconfig` the default kubeconfig chain is used, falling
    /// back to in-cluster configuration when no kubeconfig can be read. The
    /// in-cluster fallback keeps the service account CA and ignores
    /// `--certificate-authority`. A `--request-timeout` the client cannot
    /// interpret is logged and left to kubectl.
    pub async fn kube_config(&self) -> Result<Config> {
        let kubeconfig = match non_empty(&self.kubeconfig) {
            Some(path) => Some(Kubeconfig::read_from(path).map_err(|e| {
                Error::config(format!("failed to read kubeconfig {}: {}", path, e))
            })?),
            None => Kubeconfig::read().ok(),
        };

        let mut config = match kubeconfig {
            Some(mut kubeconfig) => {
                self.apply_cluster_overrides(&mut kubeconfig);
                let options = KubeConfigOptions {
                    context: non_empty(&self.context).map(str::to_string),
                    cluster: non_empty(&self.cluster).map(str::to_string),
                    user: non_empty(&self.user).map(str::to_string),
                };
                Config::from_custom_kubeconfig(kubeconfig, &options)
                    .await
                    .map_err(|e| Error::config(format!("invalid kubeconfig: {}", e)))?
            }
            None => {
                debug!("No kubeconfig found, inferring in-cluster configuration");
                if non_empty(&self.certificate_authority).is_some() {
                    warn!("--certificate-authority is ignored for in-cluster configuration");
                }
                Config::infer()
                    .await
                    .map_err(|e| Error::config(format!("failed to infer kube config: {}", e)))?
            }
        };

        if let Some(server) = non_empty(&self.server) {
            config.cluster_url = server
                .parse()
                .map_err(|e| Error::config(format!("invalid --server {}: {}", server, e)))?;
        }
        if let Some(insecure) = self.insecure_skip_tls_verify {
            config.accept_invalid_certs = insecure;
        }
        // kubectl gets the raw value and reports bad input itself
        if let Some(timeout) = non_empty(&self.request_timeout) {
            match parse_request_timeout(timeout) {
                Ok(timeout) => config.read_timeout = timeout,
                Err(e) => warn!(error = %e, "Ignoring --request-timeout for API listings"),
            }
        }
        if let Some(namespace) = non_empty(&self.namespace) {
            config.default_namespace = namespace.to_string();
        }
        self.apply_auth_overrides(&mut config.auth_info);

        Ok(config)
    }

    /// Namespace to operate in: `--namespace`, else the kubeconfig context's.
    pub fn resolve_namespace(&self, config: &Config) -> Result<String> {
        let namespace = non_empty(&self.namespace).unwrap_or(config.default_namespace.as_str());
        if namespace.is_empty() {
            return Err(Error::config("namespace not found"));
        }
        Ok(namespace.to_string())
    }

    /// CA overrides live on the kubeconfig cluster entries because kube-rs
    /// loads root certificates while building the [`Config`].
    fn apply_cluster_overrides(&self, kubeconfig: &mut Kubeconfig) {
        let Some(ca) = non_empty(&self.certificate_authority) else {
            return;
        };
        for named in &mut kubeconfig.clusters {
            if let Some(cluster) = named.cluster.as_mut() {
                cluster.certificate_authority = Some(ca.to_string());
                cluster.certificate_authority_data = None;
            }
        }
    }

    fn apply_auth_overrides(&self, auth: &mut AuthInfo) {
        if let Some(token) = non_empty(&self.token) {
            auth.token = Some(token.to_string().into());
            auth.token_file = None;
        }
        if let Some(username) = non_empty(&self.username) {
            auth.username = Some(username.to_string());
        }
        if let Some(password) = non_empty(&self.password) {
            auth.password = Some(password.to_string().into());
        }
        if let Some(cert) = non_empty(&self.client_certificate) {
            auth.client_certificate = Some(cert.to_string());
            auth.client_certificate_data = None;
        }
        if let Some(key) = non_empty(&self.client_key) {
            auth.client_key = Some(key.to_string());
            auth.client_key_data = None;
        }
        if let Some(impersonate) = non_empty(&self.impersonate) {
            auth.impersonate = Some(impersonate.to_string());
        }
        if !self.impersonate_groups.is_empty() {
            auth.impersonate_groups = Some(self.impersonate_groups.clone());
        }
    }
}

/// Nanoseconds per duration unit suffix, as kubectl spells them
fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "\u{b5}s" | "\u{3bc}s" => 1_000,
        "ms" => 1_000_000,
        "s" => 1_000_000_000,
        "m" => 60 * 1_000_000_000,
        "h" => 3_600 * 1_000_000_000,
        _ => return None,
    })
}

/// Parse a kubectl `--request-timeout` value.
///
/// Accepts bare seconds (`10`) and compound durations with optional
/// fractions (`1h`, `1m30s`, `500ms`, `1.5s`). Zero means no timeout.
pub fn parse_request_timeout(s: &str) -> Result<Option<Duration>> {
    let s = s.trim();
    let invalid = || {
        Error::config(format!(
            "invalid request timeout '{}', expected e.g. 10, 1m30s, 500ms",
            s
        ))
    };
    if s.is_empty() {
        return Err(invalid());
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        let secs: u64 = s.parse().map_err(|_| invalid())?;
        return Ok((secs > 0).then(|| Duration::from_secs(secs)));
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos: u128 = 0;
    let mut rest = s;
    while !rest.is_empty() {
        let (number, tail) = rest.split_at(rest.find(|c: char| !is_number(c)).unwrap_or(rest.len()));
        let (unit, tail) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));
        let scale = unit_nanos(unit).ok_or_else(invalid)?;

        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };

        // digits below one nanosecond are dropped
        let mut fraction_value: u128 = 0;
        let mut divisor: u128 = 1;
        for digit in fraction.bytes() {
            if !digit.is_ascii_digit() {
                return Err(invalid());
            }
            if divisor < scale {
                fraction_value = fraction_value * 10 + u128::from(digit - b'0');
                divisor *= 10;
            }
        }

        let term = whole
            .checked_mul(scale)
            .and_then(|n| n.checked_add(fraction_value * scale / divisor))
            .ok_or_else(invalid)?;
        nanos = nanos.checked_add(term).ok_or_else(invalid)?;
        rest = tail;
    }

    let secs = u64::try_from(nanos / 1_000_000_000).map_err(|_| invalid())?;
    let subsec = (nanos % 1_000_000_000) as u32;
    Ok((nanos > 0).then(|| Duration::new(secs, subsec)))
}
