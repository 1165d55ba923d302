//! Subprocess execution with bounded, incremental output relay.
//!
//! The runner spawns one argv (never a shell), merges stdout and stderr into a
//! single line stream, and relays lines as [`JobEvent::Output`] while watching
//! a wall-clock budget and the session's cancellation signal. Every call ends
//! with exactly one terminal event.

use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::event::{CancelSignal, EventSender, JobEvent, emit};
use crate::process;
use crate::redact::redacted;
use crate::tools::ToolCommand;

const READ_CHUNK: usize = 8 * 1024;
const LINE_QUEUE: usize = 64;

#[derive(Debug, Clone)]
pub struct RunnerLimits {
	/// Wall-clock budget for the whole process.
	pub timeout: Duration,
	/// Longest wait for a single line before the budget is re-checked.
	pub read_tick: Duration,
	/// Time allowed between termination request (or EOF) and forced kill.
	pub exit_grace: Duration,
	/// Aggregate bytes relayed per job.
	pub max_output_bytes: usize,
	/// Longest line relayed; the remainder of a longer line is discarded.
	pub max_line_bytes: usize,
}

impl Default for RunnerLimits {
	fn default() -> Self {
		Self {
			timeout: Duration::from_secs(300),
			read_tick: Duration::from_secs(1),
			exit_grace: Duration::from_secs(5),
			max_output_bytes: 10 * 1024 * 1024,
			max_line_bytes: 1024 * 1024,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
	Completed { return_code: i32 },
	SpawnFailed,
	TimedOut,
	Cancelled,
}

#[derive(Debug, Clone, Copy)]
enum Stop {
	TimedOut,
	Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
	limits: RunnerLimits,
}

impl ProcessRunner {
	pub fn new(limits: RunnerLimits) -> Self {
		Self { limits }
	}

	/// Runs `command` to completion, emitting `Output*` then one terminal event.
	pub async fn run(&self, command: &ToolCommand, events: &EventSender, mut cancel: CancelSignal) -> RunOutcome {
		let mut cmd = Command::new(&command.program);
		cmd.args(&command.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);
		process::isolate_process_group(&mut cmd);

		let mut child = match cmd.spawn() {
			Ok(child) => child,
			Err(err) => {
				warn!(target = "scout.job", tool = %command.label, error = %err, "failed to spawn tool");
				let message = if err.kind() == std::io::ErrorKind::NotFound {
					format!("Tool \"{}\" not found. Please install it first.", command.label)
				} else {
					format!("Execution error: {err}")
				};
				emit(events, JobEvent::error(message)).await;
				return RunOutcome::SpawnFailed;
			}
		};

		let pid = child.id();
		info!(target = "scout.job", tool = %command.label, pid = ?pid, "process started");

		let (line_tx, mut line_rx) = mpsc::channel(LINE_QUEUE);
		let mut pumps = JoinSet::new();
		if let Some(stdout) = child.stdout.take() {
			pumps.spawn(pump_lines(stdout, line_tx.clone(), self.limits.max_line_bytes));
		}
		if let Some(stderr) = child.stderr.take() {
			pumps.spawn(pump_lines(stderr, line_tx.clone(), self.limits.max_line_bytes));
		}
		drop(line_tx);

		let started = Instant::now();
		let mut budget = OutputBudget::new(self.limits.max_output_bytes);
		let mut stopped = None;

		loop {
			if started.elapsed() >= self.limits.timeout {
				warn!(target = "scout.job", tool = %command.label, pid = ?pid, "process exceeded its time budget; terminating");
				request_stop(&mut child, pid);
				stopped = Some(Stop::TimedOut);
				break;
			}

			let next = tokio::select! {
				biased;
				_ = cancel.cancelled() => {
					info!(target = "scout.job", tool = %command.label, pid = ?pid, "job cancelled; terminating");
					request_stop(&mut child, pid);
					stopped = Some(Stop::Cancelled);
					break;
				}
				next = tokio::time::timeout(self.limits.read_tick, line_rx.recv()) => next,
			};

			let raw = match next {
				Err(_) => continue,
				Ok(None) => break,
				Ok(Some(raw)) => raw,
			};

			let text = String::from_utf8_lossy(&raw);
			let line = text.trim();
			if line.is_empty() {
				continue;
			}

			match budget.admit(line.len()) {
				Admit::Relay => {
					debug!(target = "scout.job", tool = %command.label, line = %redacted(line), "output");
					emit(events, JobEvent::output(line)).await;
				}
				Admit::Exhausted => {
					warn!(target = "scout.job", tool = %command.label, limit = budget.limit, "output limit reached");
					let notice = format!("Output size limit of {} bytes exceeded; further output suppressed", budget.limit);
					emit(events, JobEvent::output(notice)).await;
				}
				Admit::Discard => {}
			}
		}

		// Unblocks pumps stuck on a full queue after an early stop.
		drop(line_rx);
		let return_code = self.reap(&mut child, pid, &command.label).await;
		pumps.abort_all();

		match stopped {
			Some(Stop::TimedOut) => {
				let message = format!("Process timeout after {} seconds", format_secs(self.limits.timeout));
				emit(events, JobEvent::error(message)).await;
				RunOutcome::TimedOut
			}
			Some(Stop::Cancelled) => {
				emit(events, JobEvent::error("Job cancelled: connection closed")).await;
				RunOutcome::Cancelled
			}
			None => {
				info!(target = "scout.job", tool = %command.label, pid = ?pid, return_code, "process finished");
				emit(
					events,
					JobEvent::Complete {
						return_code,
						success: return_code == 0,
					},
				)
				.await;
				RunOutcome::Completed { return_code }
			}
		}
	}

	async fn reap(&self, child: &mut Child, pid: Option<u32>, label: &str) -> i32 {
		match tokio::time::timeout(self.limits.exit_grace, child.wait()).await {
			Ok(Ok(status)) => process::exit_code(status),
			Ok(Err(err)) => {
				warn!(target = "scout.job", tool = %label, error = %err, "failed to await process exit");
				-1
			}
			Err(_) => {
				warn!(target = "scout.job", tool = %label, pid = ?pid, "process ignored termination; killing");
				if let Some(pid) = pid {
					process::kill_group(pid);
				}
				let _ = child.start_kill();
				let _ = child.wait().await;
				-1
			}
		}
	}
}

fn request_stop(child: &mut Child, pid: Option<u32>) {
	if !pid.is_some_and(process::terminate_group) {
		let _ = child.start_kill();
	}
}

fn format_secs(d: Duration) -> String {
	if d.subsec_nanos() == 0 { d.as_secs().to_string() } else { format!("{:.1}", d.as_secs_f64()) }
}

async fn pump_lines<R>(mut reader: R, tx: mpsc::Sender<Vec<u8>>, max_line: usize)
where
	R: AsyncRead + Unpin,
{
	let mut splitter = LineSplitter::new(max_line);
	let mut chunk = vec![0u8; READ_CHUNK];
	loop {
		let n = match reader.read(&mut chunk).await {
			Ok(0) => break,
			Ok(n) => n,
			Err(err) => {
				debug!(target = "scout.job", error = %err, "output pipe read failed");
				break;
			}
		};
		for line in splitter.push(&chunk[..n]) {
			if tx.send(line).await.is_err() {
				return;
			}
		}
	}
	if let Some(rest) = splitter.finish() {
		let _ = tx.send(rest).await;
	}
}

/// Splits a byte stream on `\n`, capping each line at `max_line` bytes.
#[derive(Debug)]
struct LineSplitter {
	buf: Vec<u8>,
	max_line: usize,
	discarding: bool,
}

impl LineSplitter {
	fn new(max_line: usize) -> Self {
		Self {
			buf: Vec::new(),
			max_line,
			discarding: false,
		}
	}

	fn push(&mut self, mut data: &[u8]) -> Vec<Vec<u8>> {
		let mut lines = Vec::new();
		while let Some(pos) = data.iter().position(|&b| b == b'\n') {
			self.append(&data[..pos]);
			lines.push(std::mem::take(&mut self.buf));
			self.discarding = false;
			data = &data[pos + 1..];
		}
		self.append(data);
		lines
	}

	fn append(&mut self, bytes: &[u8]) {
		if self.discarding {
			return;
		}
		let room = self.max_line.saturating_sub(self.buf.len());
		if bytes.len() > room {
			self.buf.extend_from_slice(&bytes[..room]);
			self.discarding = true;
		} else {
			self.buf.extend_from_slice(bytes);
		}
	}

	fn finish(self) -> Option<Vec<u8>> {
		(!self.buf.is_empty()).then_some(self.buf)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admit {
	Relay,
	Exhausted,
	Discard,
}

#[derive(Debug)]
struct OutputBudget {
	limit: usize,
	used: usize,
	exhausted: bool,
}

impl OutputBudget {
	fn new(limit: usize) -> Self {
		Self {
			limit,
			used: 0,
			exhausted: false,
		}
	}

	fn admit(&mut self, len: usize) -> Admit {
		if self.exhausted {
			return Admit::Discard;
		}
		if self.used + len > self.limit {
			self.exhausted = true;
			return Admit::Exhausted;
		}
		self.used += len;
		Admit::Relay
	}
}
