//! `kubectl netscaler conf` - running NetScaler configuration

use clap::Args;
use netscaler_common::Selector;

use crate::Result;

use super::{plugin_command, Gate, Session};

#[derive(Args, Debug)]
pub struct ConfArgs {
    #[command(flatten)]
    pub selector: Selector,
}

pub async fn run(session: &Session, args: ConfArgs) -> Result<()> {
    let resolved = match session.gate(&args.selector).await? {
        Gate::Ready(resolved) => resolved,
        Gate::Unsupported(message) => {
            print!("{}", message);
            return Ok(());
        }
    };

    let result = session
        .kubectl
        .exec(
            &resolved.pod,
            resolved.roles.controller_container(),
            &plugin_command("conf"),
        )
        .await;

    // partial config is still worth showing before the error
    let shown = match &result {
        Ok(output) => Some(output.as_str()),
        Err(e) => e.partial_output(),
    };
    if let Some(output) = shown.filter(|o| !o.is_empty()) {
        print!("\n{}", output);
    }
    result?;
    Ok(())
}
