//! Seam between a session and whatever actually runs a job.

use async_trait::async_trait;
use scout_runtime::{CancelSignal, EventSender, JobEngine, Target, Tool, ToolLocator};
use tracing::info;

use crate::config::AgentConfig;

#[async_trait]
pub trait ToolExecutor: Send + Sync {
	/// Whether `tool` resolves right now without installing anything.
	fn is_available(&self, tool: Tool) -> bool;

	/// Runs one admitted job to completion.
	///
	/// Implementations emit `Start` first and exactly one terminal event last.
	/// `events` is dropped on return, which ends the session's forwarder.
	async fn execute(&self, tool: Tool, target: Target, events: EventSender, cancel: CancelSignal);
}

/// Runs jobs as local subprocesses through the runtime job pipeline.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
	engine: JobEngine,
}

impl LocalExecutor {
	pub fn new(engine: JobEngine) -> Self {
		Self { engine }
	}

	pub fn from_config(config: &AgentConfig) -> Self {
		Self::new(JobEngine::new(config.locator(), config.runner_limits(), config.install_step_timeout()))
	}

	pub fn locator(&self) -> &ToolLocator {
		self.engine.locator()
	}
}

#[async_trait]
impl ToolExecutor for LocalExecutor {
	fn is_available(&self, tool: Tool) -> bool {
		self.locator().is_available(tool.spec().executable)
	}

	async fn execute(&self, tool: Tool, target: Target, events: EventSender, cancel: CancelSignal) {
		let outcome = self.engine.run(tool.spec(), &target, &events, cancel).await;
		info!(target = "scout.job", tool = tool.name(), outcome = ?outcome, "job finished");
	}
}
