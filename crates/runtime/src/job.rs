//! End-to-end lifecycle of one admitted job.
//!
//! `Start` is emitted first, install progress (if any) follows as `Output`,
//! then the runner streams the tool's output and emits the terminal event.

use std::time::Duration;

use tracing::{info, warn};

use crate::event::{CancelSignal, EventSender, JobEvent, emit};
use crate::installer::Installer;
use crate::locate::ToolLocator;
use crate::redact::redacted;
use crate::runner::{ProcessRunner, RunOutcome, RunnerLimits};
use crate::target::Target;
use crate::tools::ToolSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
	/// Tool missing and no install candidate made it resolvable.
	Unavailable,
	Finished(RunOutcome),
}

#[derive(Debug, Clone)]
pub struct JobEngine {
	installer: Installer,
	runner: ProcessRunner,
}

impl JobEngine {
	pub fn new(locator: ToolLocator, limits: RunnerLimits, install_step_timeout: Duration) -> Self {
		Self {
			installer: Installer::new(locator, install_step_timeout),
			runner: ProcessRunner::new(limits),
		}
	}

	pub fn locator(&self) -> &ToolLocator {
		self.installer.locator()
	}

	pub async fn run(&self, spec: &ToolSpec, target: &Target, events: &EventSender, cancel: CancelSignal) -> JobOutcome {
		let command = spec.command(target);
		let line = command.display_line();
		info!(target = "scout.job", tool = spec.name, command = %redacted(&line), "job admitted");
		emit(events, JobEvent::Start { command: line }).await;

		if cancel.is_cancelled() {
			emit(events, JobEvent::error("Job cancelled: connection closed")).await;
			return JobOutcome::Finished(RunOutcome::Cancelled);
		}

		if !self.installer.ensure_available(spec, events).await {
			warn!(target = "scout.job", tool = spec.name, "tool unavailable after install attempts");
			let message = format!("Tool \"{}\" not found and could not be installed. Please install it manually.", spec.name);
			emit(events, JobEvent::error(message)).await;
			return JobOutcome::Unavailable;
		}

		let command = match self.locator().resolve(spec.executable) {
			Some(path) => command.with_program(path),
			None => command,
		};

		JobOutcome::Finished(self.runner.run(&command, events, cancel).await)
	}
}
