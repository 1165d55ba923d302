//! Auto-installation of missing tools.
//!
//! Candidates are fixed, developer-authored argv lists from the registry.
//! Nothing derived from a request is ever passed to an install step, and no
//! step goes through a shell.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Result, RuntimeError};
use crate::event::{EventSender, JobEvent, emit};
use crate::locate::ToolLocator;
use crate::process;
use crate::tools::{InstallCandidate, ToolSpec};

const DETAIL_LIMIT: usize = 512;

#[derive(Debug, Clone)]
pub struct Installer {
	locator: ToolLocator,
	step_timeout: Duration,
	work_dir: Option<PathBuf>,
}

impl Installer {
	pub fn new(locator: ToolLocator, step_timeout: Duration) -> Self {
		Self {
			locator,
			step_timeout,
			work_dir: None,
		}
	}

	/// Runs install steps from `dir` instead of the agent's working directory.
	pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.work_dir = Some(dir.into());
		self
	}

	pub fn locator(&self) -> &ToolLocator {
		&self.locator
	}

	/// Makes `spec.executable` resolvable, installing it if needed.
	///
	/// Progress for each candidate is reported as `Output` events. Returns
	/// `false` once every candidate for this platform has been tried.
	pub async fn ensure_available(&self, spec: &ToolSpec, events: &EventSender) -> bool {
		if self.locator.is_available(spec.executable) {
			return true;
		}

		let name = spec.name;
		info!(target = "scout.install", tool = name, "tool missing; trying install candidates");
		emit(events, JobEvent::output(format!("{name} not found. Attempting to install..."))).await;

		for (index, candidate) in spec.install_candidates().enumerate() {
			let method = index + 1;
			emit(events, JobEvent::output(format!("Method {method}: Trying {candidate}"))).await;

			let result = self.run_candidate(candidate).await;
			let available = self.locator.is_available(spec.executable);

			match (result, available) {
				(_, true) => {
					info!(target = "scout.install", tool = name, method, "tool installed");
					emit(events, JobEvent::output(format!("{name} installed successfully"))).await;
					return true;
				}
				(Ok(()), false) => {
					warn!(target = "scout.install", tool = name, method, "install succeeded but tool is not resolvable");
					emit(events, JobEvent::output(format!("{name} installed but not found on PATH"))).await;
				}
				(Err(err), false) => {
					warn!(target = "scout.install", tool = name, method, error = %err, "install method failed");
					emit(events, JobEvent::output(format!("Method {method} failed: {err}"))).await;
				}
			}
		}

		emit(events, JobEvent::output(format!("Failed to install {name} with all methods"))).await;
		false
	}

	async fn run_candidate(&self, candidate: &InstallCandidate) -> Result<()> {
		for step in candidate.steps {
			self.run_step(step).await?;
		}
		Ok(())
	}

	async fn run_step(&self, argv: &[&str]) -> Result<()> {
		let (program, args) = argv.split_first().ok_or(RuntimeError::EmptyCommand)?;
		let rendered = argv.join(" ");

		let mut cmd = Command::new(program);
		cmd.args(args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		if let Some(dir) = &self.work_dir {
			cmd.current_dir(dir);
		}

		let output = tokio::time::timeout(self.step_timeout, cmd.output())
			.await
			.map_err(|_| RuntimeError::StepTimeout {
				command: rendered.clone(),
				timeout: self.step_timeout,
			})?
			.map_err(|source| RuntimeError::Spawn {
				program: program.to_string(),
				source,
			})?;

		if output.status.success() {
			return Ok(());
		}

		let stderr = String::from_utf8_lossy(&output.stderr);
		let stdout = String::from_utf8_lossy(&output.stdout);
		let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
		Err(RuntimeError::StepFailed {
			command: rendered,
			code: process::exit_code(output.status),
			detail: clip(detail, DETAIL_LIMIT),
		})
	}
}

fn clip(text: &str, limit: usize) -> String {
	if text.len() <= limit {
		return text.to_string();
	}
	let mut end = limit;
	while !text.is_char_boundary(end) {
		end -= 1;
	}
	format!("{}...", &text[..end])
}

#[cfg(test)]
mod tests {
	use tokio::sync::mpsc;

	use super::*;
	use crate::tools::Platform;

	#[test]
	fn clip_respects_char_boundaries() {
		assert_eq!(clip("short", 10), "short");
		assert_eq!(clip("ééé", 3), "é...");
	}

	#[cfg(unix)]
	mod unix {
		use super::*;

		async fn drain(mut rx: mpsc::Receiver<JobEvent>) -> Vec<String> {
			let mut lines = Vec::new();
			while let Some(event) = rx.recv().await {
				match event {
					JobEvent::Output { line } => lines.push(line),
					other => panic!("installer emitted non-output event {other:?}"),
				}
			}
			lines
		}

		#[tokio::test]
		async fn present_tool_is_a_silent_noop() {
			static SH: ToolSpec = ToolSpec {
				name: "sh",
				executable: "sh",
				args: &["-c", "{target}"],
				description: "shell",
				install: &[InstallCandidate::any(&[&["false"]])],
			};
			let installer = Installer::new(ToolLocator::default(), Duration::from_secs(5));
			let (tx, rx) = mpsc::channel(16);
			assert!(installer.ensure_available(&SH, &tx).await);
			drop(tx);
			assert!(drain(rx).await.is_empty());
		}

		#[tokio::test]
		async fn exhausting_candidates_reports_each_failure() {
			static GHOST: ToolSpec = ToolSpec {
				name: "scout-ghost",
				executable: "scout-ghost-not-installed",
				args: &["{target}"],
				description: "never installable",
				install: &[
					InstallCandidate::any(&[&["false"]]),
					InstallCandidate::any(&[&["scout-no-such-package-manager", "install"]]),
					InstallCandidate {
						platform: Platform::Windows,
						steps: &[&["choco", "install", "ghost"]],
					},
				],
			};
			let installer = Installer::new(ToolLocator::default(), Duration::from_secs(5));
			let (tx, rx) = mpsc::channel(16);
			assert!(!installer.ensure_available(&GHOST, &tx).await);
			drop(tx);

			let lines = drain(rx).await;
			assert_eq!(lines.first().map(String::as_str), Some("scout-ghost not found. Attempting to install..."));
			assert!(lines.iter().any(|l| l.starts_with("Method 1 failed: `false` exited with code 1")));
			assert!(lines.iter().any(|l| l.starts_with("Method 2 failed: failed to spawn scout-no-such-package-manager")));
			assert!(!lines.iter().any(|l| l.contains("choco")), "windows candidate should be skipped: {lines:?}");
			assert_eq!(lines.last().map(String::as_str), Some("Failed to install scout-ghost with all methods"));
		}

		#[tokio::test]
		async fn failed_step_short_circuits_and_next_candidate_installs() {
			static FAKE: ToolSpec = ToolSpec {
				name: "scout-fake",
				executable: "scout-fake-tool",
				args: &["{target}"],
				description: "installed by the test",
				install: &[
					InstallCandidate::any(&[&["false"], &["sh", "-c", "printf '#!/bin/sh\\n' > scout-fake-tool; chmod +x scout-fake-tool"]]),
					InstallCandidate::any(&[&["sh", "-c", "printf '#!/bin/sh\\n' > scout-fake-tool; chmod +x scout-fake-tool"]]),
				],
			};

			let dir = tempfile::tempdir().unwrap();
			let locator = ToolLocator::new(vec![dir.path().to_path_buf()]);
			let installer = Installer::new(locator, Duration::from_secs(5)).with_work_dir(dir.path());
			let (tx, rx) = mpsc::channel(16);
			assert!(installer.ensure_available(&FAKE, &tx).await);
			drop(tx);

			let lines = drain(rx).await;
			assert!(lines.iter().any(|l| l.starts_with("Method 1 failed")));
			assert!(lines.iter().any(|l| l.starts_with("Method 2: Trying sh -c")));
			assert_eq!(lines.last().map(String::as_str), Some("scout-fake installed successfully"));
		}
	}
}
