//! NetScaler kubectl plugin library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};
use netscaler_common::{ConnectionFlags, ProxyContainerPolicy};

use commands::Session;

/// kubectl netscaler - inspect NetScaler ingress controller deployments
#[derive(Parser, Debug)]
#[command(name = "kubectl-netscaler", bin_name = "kubectl netscaler")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionFlags,

    /// Which container is the proxy when several lack the sidecar marker
    #[arg(long, value_enum, default_value_t, global = true)]
    pub proxy_container_policy: ProxyContainerPolicy,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Display the status (up/down/active...) of NetScaler entities for the
    /// given prefix (k8s by default)
    Status(commands::status::StatusArgs),
    /// Display NetScaler configuration (show run output)
    Conf(commands::conf::ConfArgs),
    /// Get NetScaler (show techsupport) and ingress controller support bundle
    Support(commands::support::SupportArgs),
    /// List ingress backends with their endpoint counts
    Ingresses(commands::ingresses::IngressesArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        let session = Session::connect(&self.connection, self.proxy_container_policy).await?;
        match self.command {
            Commands::Status(args) => commands::status::run(&session, args).await,
            Commands::Conf(args) => commands::conf::run(&session, args).await,
            Commands::Support(args) => commands::support::run(&session, args).await,
            Commands::Ingresses(args) => commands::ingresses::run(&session, args).await,
        }
    }
}
