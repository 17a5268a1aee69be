//! `kubectl netscaler support` - collect a support bundle
//!
//! The bundle is a timestamped directory holding the NetScaler show
//! techsupport archive (copied out of the controller pod when it runs as a
//! sidecar) and a `kube_info` tree with resource dumps of the application
//! namespaces plus the controller's manifest and logs.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::Args;
use netscaler_common::{Artifact, ArtifactWriter, DumpVerb, ResolvedPod, Selector};
use tracing::{debug, warn};

use crate::{Error, Result};

use super::{plugin_command, Gate, Session};

/// Symlink the controller helper points at the latest techsupport archive
pub const TECHSUPPORT_LINK: &str = "/var/tmp/support/support.tgz";

/// File name of the copied techsupport archive inside the bundle
pub const TECHSUPPORT_ARCHIVE: &str = "showtechsupport.tgz";

/// Bundle directory name prefix
pub const BUNDLE_PREFIX: &str = "nssupport_";

/// Bundle directory timestamp, always UTC
pub const BUNDLE_TIMESTAMP: &str = "%Y%m%d%H%M%S";

/// Subdirectory holding the Kubernetes side of the bundle
pub const KUBE_INFO_DIR: &str = "kube_info";

/// Kinds dumped with `kubectl get <kind> -o yaml`
pub const GET_KINDS: [&str; 6] = ["pods", "deployment", "svc", "ing", "events", "nodes"];

/// Kinds dumped with `kubectl describe <kind>`
pub const DESCRIBE_KINDS: [&str; 4] = ["svc", "ing", "events", "nodes"];

const SKIPPED_TECHSUPPORT: &str = "Skipping show tech support collection. For show tech support on \
     NetScaler rerun with by removing --skip-nsbundle option";

const APPLIANCE_TECHSUPPORT: &str = "This CIC is connected to VPX/MPX NetScaler appliance. \
     Please securely download support artifact from NetScaler location: ";

#[derive(Args, Debug)]
pub struct SupportArgs {
    #[command(flatten)]
    pub selector: Selector,

    /// Skip extracting show techsupport from NetScaler
    #[arg(long = "skip-nsbundle")]
    pub skip_nsbundle: bool,

    /// Directory to store support files in (default: current directory)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Space separated namespaces (within quotes) to extract Kubernetes
    /// resource details from, e.g. "default namespace1 namespace2"
    #[arg(long, default_value = "default")]
    pub appns: String,

    /// Keep IP addresses in the collected Kubernetes information
    #[arg(long = "unhideIP")]
    pub unhide_ip: bool,
}

impl SupportArgs {
    /// Namespaces named by `--appns`
    pub fn namespaces(&self) -> Result<Vec<&str>> {
        let namespaces: Vec<&str> = self.appns.split_whitespace().collect();
        if namespaces.is_empty() {
            return Err(Error::validation("--appns must name at least one namespace"));
        }
        Ok(namespaces)
    }

    /// Directory the bundle is created in: `--dir`, else the working directory
    pub fn base_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) if !dir.as_os_str().is_empty() => {
                if dir.exists() && !dir.is_dir() {
                    return Err(Error::validation(format!(
                        "--dir {} is not a directory",
                        dir.display()
                    )));
                }
                Ok(dir.clone())
            }
            _ => Ok(std::env::current_dir()?),
        }
    }
}

/// What a collection run produced
#[derive(Debug, Default)]
pub struct SupportReport {
    /// Bundle root
    pub bundle: PathBuf,
    /// Copied techsupport archive, when one was collected
    pub techsupport: Option<PathBuf>,
    /// Files written below `kube_info`
    pub files: Vec<PathBuf>,
    /// Non-fatal collection failures
    pub failures: Vec<String>,
}

impl SupportReport {
    fn record(&mut self, written: Option<PathBuf>) {
        self.files.extend(written);
    }
}

/// `<base>/nssupport_<timestamp>`
pub fn bundle_dir(base: &Path, now: DateTime<Utc>) -> PathBuf {
    base.join(format!("{}{}", BUNDLE_PREFIX, now.format(BUNDLE_TIMESTAMP)))
}

/// Archive path from `readlink -f` output, ignoring any noise printed
/// before it.
pub fn archive_path(readlink_output: &str) -> Option<&str> {
    readlink_output
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .last()
}

fn flush_stdout() {
    let _ = std::io::stdout().flush();
}

async fn collect_techsupport(
    session: &Session,
    resolved: &ResolvedPod,
    bundle: &Path,
    report: &mut SupportReport,
) -> Result<()> {
    print!("Extracting show tech support information, this may take minutes");
    flush_stdout();

    let result = session
        .kubectl
        .exec(
            &resolved.pod,
            resolved.roles.support_container(),
            &plugin_command("support"),
        )
        .await;
    let shown = match &result {
        Ok(output) => Some(output.as_str()),
        Err(e) => e.partial_output(),
    };
    if let Some(output) = shown.filter(|o| !o.is_empty()) {
        print!("\n{}", output);
    }
    result?;

    let Some(integration) = resolved.roles.integration.as_deref() else {
        print!("\n{}{}", APPLIANCE_TECHSUPPORT, TECHSUPPORT_LINK);
        return Ok(());
    };

    let link = session
        .kubectl
        .exec(&resolved.pod, Some(integration), &["readlink", "-f", TECHSUPPORT_LINK])
        .await?;
    let remote = archive_path(&link).ok_or_else(|| {
        Error::command_failed(format!(
            "could not resolve {} in {}: {:?}",
            TECHSUPPORT_LINK, resolved, link
        ))
    })?;

    std::fs::create_dir_all(bundle).map_err(|e| netscaler_common::Error::io(bundle, e))?;
    let local = bundle.join(TECHSUPPORT_ARCHIVE);
    session
        .kubectl
        .copy_from(&resolved.pod, Some(integration), remote, &local)
        .await?;
    debug!(remote, local = %local.display(), "Copied techsupport archive");
    report.techsupport = Some(local);
    Ok(())
}

async fn dump_namespace(
    session: &Session,
    writer: &ArtifactWriter,
    namespace: &str,
    report: &mut SupportReport,
) -> Result<()> {
    for kind in GET_KINDS {
        let output = session
            .kubectl
            .run_in_namespace(namespace, &["get", kind, "-o", "yaml"])
            .await?;
        let artifact = Artifact::Dump {
            verb: DumpVerb::Get,
            kind,
        };
        report.record(writer.write(namespace, &artifact, &output)?);
    }
    for kind in DESCRIBE_KINDS {
        let output = session
            .kubectl
            .run_in_namespace(namespace, &["describe", kind])
            .await?;
        let artifact = Artifact::Dump {
            verb: DumpVerb::Describe,
            kind,
        };
        report.record(writer.write(namespace, &artifact, &output)?);
    }
    Ok(())
}

async fn collect_controller(
    session: &Session,
    writer: &ArtifactWriter,
    resolved: &ResolvedPod,
    report: &mut SupportReport,
) -> Result<()> {
    let namespace = resolved.namespace();
    let pod_ref = format!("pod/{}", resolved.name());

    let manifest = session
        .kubectl
        .run_in_namespace(namespace, &["get", pod_ref.as_str(), "-o", "yaml"])
        .await?;
    report.record(writer.write(namespace, &Artifact::PodManifest, &manifest)?);

    for (artifact, previous) in [(Artifact::Logs, false), (Artifact::PreviousLogs, true)] {
        let mut argv = vec!["logs"];
        if previous {
            argv.push("-p");
        }
        argv.push(&pod_ref);
        if let Some(container) = resolved.roles.controller_container() {
            argv.extend(["-c", container]);
        }

        match session.kubectl.run_in_namespace(namespace, &argv).await {
            Ok(output) => report.record(writer.write(namespace, &artifact, &output)?),
            Err(e) if e.is_exec() => {
                warn!(pod = %resolved, previous, error = %e, "Could not retrieve controller logs");
                if let Some(output) = e.partial_output().filter(|o| !o.is_empty()) {
                    report.record(writer.write(namespace, &artifact, output)?);
                }
                report
                    .failures
                    .push(format!("{} for {}: {}", artifact.file_name(), resolved, e));
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Collect the bundle for an already gated controller pod into `bundle`.
pub async fn collect(
    session: &Session,
    resolved: &ResolvedPod,
    args: &SupportArgs,
    bundle: &Path,
) -> Result<SupportReport> {
    let namespaces = args.namespaces()?;
    let mut report = SupportReport {
        bundle: bundle.to_path_buf(),
        ..Default::default()
    };

    if args.skip_nsbundle {
        println!("{}", SKIPPED_TECHSUPPORT);
    } else {
        collect_techsupport(session, resolved, bundle, &mut report).await?;
    }

    println!("\nExtracting Kubernetes information");
    flush_stdout();
    let writer = ArtifactWriter::new(bundle.join(KUBE_INFO_DIR), args.unhide_ip);
    for namespace in namespaces {
        dump_namespace(session, &writer, namespace, &mut report).await?;
    }
    collect_controller(session, &writer, resolved, &mut report).await?;

    Ok(report)
}

pub async fn run(session: &Session, args: SupportArgs) -> Result<()> {
    let base = args.base_dir()?;
    args.namespaces()?;

    let resolved = match session.gate(&args.selector).await? {
        Gate::Ready(resolved) => resolved,
        Gate::Unsupported(message) => {
            print!("{}", message);
            return Ok(());
        }
    };

    let bundle = bundle_dir(&base, Utc::now());

    let report = collect(session, &resolved, &args, &bundle).await?;
    if !report.failures.is_empty() {
        warn!(count = report.failures.len(), "Support bundle is incomplete");
    }
    println!("The support files are present in {}", report.bundle.display());
    Ok(())
}
