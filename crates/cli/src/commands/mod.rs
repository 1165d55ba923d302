mod check;
mod serve;
mod tools;

use crate::cli::{Cli, Commands};
use crate::config::AgentConfig;
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let mut config = AgentConfig::load(cli.config.as_deref())?;

	match cli.command {
		Commands::Serve { host, port } => {
			if let Some(host) = host {
				config.host = host;
			}
			if let Some(port) = port {
				config.port = port;
			}
			serve::run(&config).await?
		}
		Commands::Tools => tools::run(&config),
		Commands::CheckTarget { target } => check::run(&target)?,
	}

	Ok(())
}
