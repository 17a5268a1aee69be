//! `kubectl netscaler ingresses` - ingress backends and their endpoints
//!
//! One row per backend service referenced by an Ingress (default backend
//! and every rule path), with the number of endpoint addresses currently
//! behind it. Backends with no endpoints are the usual reason a NetScaler
//! service group shows DOWN.

use clap::Args;
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend};
use serde::Serialize;

use crate::Result;

use super::format::{print_table, OutputFormat, NONE};
use super::Session;

/// Annotation used for the ingress class before `spec.ingressClassName`
const LEGACY_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

#[derive(Args, Debug)]
pub struct IngressesArgs {
    /// List ingresses across all namespaces
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "table")]
    pub output: OutputFormat,
}

/// One ingress backend
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BackendRow {
    pub namespace: String,
    pub ingress: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// `None` when the service has no endpoint slices at all
    pub endpoints: Option<usize>,
}

struct BackendRef<'a> {
    host: Option<&'a str>,
    path: Option<&'a str>,
    backend: &'a IngressBackend,
}

fn ingress_class(ingress: &Ingress) -> Option<String> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress_class_name.clone())
        .or_else(|| {
            ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(LEGACY_CLASS_ANNOTATION).cloned())
        })
}

fn backends(ingress: &Ingress) -> Vec<BackendRef<'_>> {
    let Some(spec) = ingress.spec.as_ref() else {
        return Vec::new();
    };

    let mut refs: Vec<BackendRef<'_>> = spec
        .default_backend
        .iter()
        .map(|backend| BackendRef {
            host: None,
            path: None,
            backend,
        })
        .collect();

    for rule in spec.rules.iter().flatten() {
        for path in rule.http.iter().flat_map(|http| http.paths.iter()) {
            refs.push(BackendRef {
                host: rule.host.as_deref(),
                path: path.path.as_deref(),
                backend: &path.backend,
            });
        }
    }
    refs
}

/// Build backend rows, looking endpoint counts up in the session cache.
///
/// Resource (non-service) backends are skipped.
pub async fn backend_rows(session: &Session, ingresses: &[Ingress]) -> Result<Vec<BackendRow>> {
    let mut rows = Vec::new();
    for ingress in ingresses {
        let namespace = ingress.metadata.namespace.clone().unwrap_or_default();
        let name = ingress.metadata.name.clone().unwrap_or_default();
        let class = ingress_class(ingress);

        for backend in backends(ingress) {
            let Some(service) = backend.backend.service.as_ref() else {
                continue;
            };
            let port = service.port.as_ref().and_then(|p| {
                p.name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .or_else(|| p.number.map(|n| n.to_string()))
            });
            let endpoints = session
                .endpoints
                .address_count(&namespace, &service.name)
                .await?;

            rows.push(BackendRow {
                namespace: namespace.clone(),
                ingress: name.clone(),
                class: class.clone(),
                host: backend.host.map(str::to_string),
                path: backend.path.map(str::to_string),
                service: service.name.clone(),
                port,
                endpoints,
            });
        }
    }
    Ok(rows)
}

fn table_rows(rows: &[BackendRow]) -> Vec<Vec<String>> {
    let cell = |value: &Option<String>| value.clone().unwrap_or_else(|| NONE.to_string());
    rows.iter()
        .map(|row| {
            vec![
                row.namespace.clone(),
                row.ingress.clone(),
                cell(&row.class),
                cell(&row.host),
                cell(&row.path),
                row.service.clone(),
                cell(&row.port),
                row.endpoints
                    .map(|n| n.to_string())
                    .unwrap_or_else(|| "<none>".to_string()),
            ]
        })
        .collect()
}

pub async fn run(session: &Session, args: IngressesArgs) -> Result<()> {
    let namespace = if args.all_namespaces {
        ""
    } else {
        session.namespace.as_str()
    };
    let ingresses = session.lister.list_ingresses(namespace).await?;
    let rows = backend_rows(session, &ingresses).await?;

    match args.output {
        OutputFormat::Table => {
            if rows.is_empty() {
                println!("No ingresses found.");
                return Ok(());
            }
            let headers = &[
                "NAMESPACE",
                "INGRESS",
                "CLASS",
                "HOST",
                "PATH",
                "SERVICE",
                "PORT",
                "ENDPOINTS",
            ];
            print_table(headers, &table_rows(&rows));
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
    }
    Ok(())
}
