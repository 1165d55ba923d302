use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::error::Result;
use crate::server;

pub async fn run(config: &AgentConfig) -> Result<()> {
	server::serve(config, shutdown_signal()).await
}

async fn shutdown_signal() {
	match tokio::signal::ctrl_c().await {
		Ok(()) => info!(target = "scout.server", "shutdown requested"),
		Err(err) => {
			warn!(target = "scout.server", error = %err, "failed to listen for ctrl-c; running until killed");
			std::future::pending::<()>().await;
		}
	}
}
