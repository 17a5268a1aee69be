//! `kubectl netscaler status` - state of the NetScaler entities the
//! controller manages

use clap::Args;
use netscaler_common::Selector;

use crate::Result;

use super::format::trim_report;
use super::{plugin_command, Gate, Session};

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub selector: Selector,

    /// Retrieve the config status of one Kubernetes Ingress resource
    #[arg(short, long)]
    pub ingress: Option<String>,

    /// Prefix given to the ingress controller at deploy time
    #[arg(short, long)]
    pub prefix: Option<String>,

    /// Output format. Supported formats are Tabular (default) and Json
    #[arg(long)]
    pub output: Option<String>,

    /// Also show NetScaler config type and service port
    #[arg(short, long)]
    pub verbose: bool,
}

impl StatusArgs {
    fn helper_command(&self) -> Vec<&str> {
        let mut command = plugin_command("status");
        let options = [("-i", &self.ingress), ("-p", &self.prefix), ("-o", &self.output)];
        for (flag, value) in options {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                command.extend([flag, value]);
            }
        }
        if self.verbose {
            command.push("-v");
        }
        command
    }
}

/// Status report text, or the version message when the controller is unsupported
pub async fn report(session: &Session, args: &StatusArgs) -> Result<String> {
    let resolved = match session.gate(&args.selector).await? {
        Gate::Ready(resolved) => resolved,
        Gate::Unsupported(message) => return Ok(message),
    };

    let output = session
        .kubectl
        .exec(
            &resolved.pod,
            resolved.roles.controller_container(),
            &args.helper_command(),
        )
        .await?;
    Ok(trim_report(&output).to_string())
}

pub async fn run(session: &Session, args: StatusArgs) -> Result<()> {
    println!("{}", report(session, &args).await?);
    Ok(())
}
