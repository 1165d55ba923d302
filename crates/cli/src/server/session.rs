//! Lifecycle of one connected client.
//!
//! A [`Session`] owns the origin's connection lease, a session token, the
//! sender half of the outbound queue, and a [`JoinSet`] with every job it
//! dispatched. Jobs push their events onto the same outbound queue, which a
//! single writer task drains, so each job's events reach the client in the
//! order they were produced.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::FutureExt;
use rand::RngCore;
use rand::rngs::OsRng;
use scout_protocol::{ClientMessage, ExecuteTool, ServerMessage};
use scout_runtime::{CancelHandle, CancelSignal, JobEvent, Target, Tool, cancel_pair};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::AgentState;
use super::executor::ToolExecutor;
use crate::logging::redacted;
use crate::policy::{ConnectionLease, Denial, JobPermit, Tier};

const JOB_EVENT_QUEUE: usize = 64;

pub const WELCOME_MESSAGE: &str = "Scout agent connected";

/// Random per-connection token. Never logged.
pub struct SessionToken(String);

impl SessionToken {
	pub fn generate() -> Self {
		let mut bytes = [0u8; 32];
		OsRng.fill_bytes(&mut bytes);
		Self(URL_SAFE_NO_PAD.encode(bytes))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for SessionToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SessionToken(..)")
	}
}

pub struct Session {
	origin: String,
	token: SessionToken,
	lease: ConnectionLease,
	state: AgentState,
	outbound: mpsc::Sender<ServerMessage>,
	jobs: JoinSet<()>,
	cancel: CancelHandle,
	signal: CancelSignal,
}

impl Session {
	/// Registers a connection from `origin` with the policy guard.
	pub fn open(state: AgentState, origin: String, outbound: mpsc::Sender<ServerMessage>) -> Result<Self, Denial> {
		let lease = state.guard.open_connection(&origin)?;
		let (cancel, signal) = cancel_pair();
		info!(target = "scout.session", origin = %origin, "client connected");

		Ok(Self {
			origin,
			token: SessionToken::generate(),
			lease,
			state,
			outbound,
			jobs: JoinSet::new(),
			cancel,
			signal,
		})
	}

	pub fn token(&self) -> &SessionToken {
		&self.token
	}

	pub async fn welcome(&self) {
		self.send(ServerMessage::Welcome {
			message: WELCOME_MESSAGE.to_string(),
			available_tools: Tool::names(),
		})
		.await;
	}

	/// Handles one inbound text frame.
	///
	/// Checks run in a fixed order: size, rate, decode, then (for job
	/// requests) fields, allow-list, target grammar and job admission. The
	/// first failing check answers with an `error` message and nothing after
	/// it runs.
	pub async fn handle_text(&mut self, text: &str) {
		self.reap_finished();
		if !self.admit_frame(text.len()).await {
			return;
		}

		match ClientMessage::from_json(text) {
			Ok(ClientMessage::Ping) => self.send(ServerMessage::Pong { timestamp: unix_timestamp() }).await,
			Ok(ClientMessage::ExecuteTool(request)) => self.execute(request).await,
			Err(err) => {
				debug!(target = "scout.session", origin = %self.origin, error = %err, "undecodable message");
				self.send_error(err.to_string()).await;
			}
		}
	}

	pub async fn handle_binary(&mut self, len: usize) {
		if self.admit_frame(len).await {
			self.send_error("Binary messages are not supported").await;
		}
	}

	async fn admit_frame(&self, len: usize) -> bool {
		let limit = self.state.settings.max_message_bytes;
		if len > limit {
			warn!(target = "scout.session", origin = %self.origin, len, limit, "message too large");
			self.send_error("Message too large").await;
			return false;
		}

		if let Err(denial) = self.state.guard.admit_action(&self.origin) {
			warn!(target = "scout.session", origin = %self.origin, %denial, "action rejected");
			self.send_error(denial.to_string()).await;
			return false;
		}
		true
	}

	async fn execute(&mut self, request: ExecuteTool) {
		let Some((tool_name, raw_target)) = request.tool_and_target() else {
			self.send_error("Missing tool or target parameter").await;
			return;
		};

		let tool = match Tool::from_str(tool_name) {
			Ok(tool) => tool,
			Err(err) => {
				warn!(target = "scout.session", origin = %self.origin, tool = %redacted(tool_name), "tool not allowed");
				self.send_error(err.to_string()).await;
				return;
			}
		};

		let target = match Target::parse(raw_target) {
			Ok(target) => target,
			Err(reason) => {
				warn!(
					target = "scout.session",
					origin = %self.origin,
					scan_target = %redacted(raw_target),
					%reason,
					"invalid target"
				);
				self.send_error("Invalid target format").await;
				return;
			}
		};

		let user = match request.user_id.as_deref().filter(|id| !id.is_empty()) {
			Some(id) => id.to_string(),
			None => format!("origin:{}", self.origin),
		};
		let tier = Tier::from_label(request.tier.as_deref());

		let permit = match self.state.guard.admit_job(&user, tier) {
			Ok(permit) => permit,
			Err(denial) => {
				info!(target = "scout.session", user = %user, %tier, %denial, "job rejected");
				self.send_error(denial.to_string()).await;
				return;
			}
		};

		info!(
			target = "scout.session",
			origin = %self.origin,
			user = %user,
			%tier,
			tool = tool.name(),
			scan_target = %redacted(target.as_str()),
			"dispatching job"
		);
		self.jobs.spawn(run_job(
			Arc::clone(&self.state.executor),
			tool,
			target,
			permit,
			self.outbound.clone(),
			self.signal.clone(),
		));
	}

	/// Tears the session down after the socket closed.
	///
	/// With cancel-on-disconnect, in-flight jobs are signalled and given the
	/// drain grace to finish before they are aborted. Otherwise they are
	/// detached and run to completion with nobody listening.
	pub async fn close(mut self) {
		let pending = self.jobs.len();
		if self.state.settings.cancel_on_disconnect {
			self.cancel.cancel();
			let grace = self.state.settings.job_drain_grace;
			let jobs = &mut self.jobs;
			let drained = tokio::time::timeout(grace, async {
				while let Some(result) = jobs.join_next().await {
					log_job_result(result);
				}
			})
			.await;
			if drained.is_err() {
				warn!(target = "scout.session", origin = %self.origin, "jobs still running after grace; aborting");
				self.jobs.shutdown().await;
			}
		} else {
			self.jobs.detach_all();
		}

		self.lease.release();
		info!(target = "scout.session", origin = %self.origin, pending, "client disconnected");
	}

	fn reap_finished(&mut self) {
		while let Some(result) = self.jobs.try_join_next() {
			log_job_result(result);
		}
	}

	async fn send(&self, message: ServerMessage) {
		if self.outbound.send(message).await.is_err() {
			debug!(target = "scout.session", origin = %self.origin, "outbound queue closed");
		}
	}

	async fn send_error(&self, message: impl Into<String>) {
		self.send(ServerMessage::error(message)).await;
	}
}

fn log_job_result(result: Result<(), tokio::task::JoinError>) {
	if let Err(err) = result {
		if !err.is_cancelled() {
			error!(target = "scout.job", error = %err, "job task failed");
		}
	}
}

/// Runs one job and relays its events.
///
/// The relay keeps draining after the client is gone so the runner never
/// blocks on a full queue. The permit is held until both halves finish.
async fn run_job(
	executor: Arc<dyn ToolExecutor>,
	tool: Tool,
	target: Target,
	permit: JobPermit,
	outbound: mpsc::Sender<ServerMessage>,
	cancel: CancelSignal,
) {
	let _permit = permit;
	let (events, mut rx) = mpsc::channel::<JobEvent>(JOB_EVENT_QUEUE);
	let tool_name = tool.name();
	let target_value = target.as_str().to_string();
	let relay = outbound.clone();

	let forward = async move {
		let mut connected = true;
		let mut terminated = false;
		while let Some(event) = rx.recv().await {
			terminated |= event.is_terminal();
			if connected && relay.send(job_message(tool_name, &target_value, event)).await.is_err() {
				connected = false;
			}
		}
		terminated
	};
	let execute = AssertUnwindSafe(executor.execute(tool, target, events, cancel)).catch_unwind();

	let (result, terminated) = tokio::join!(execute, forward);
	if result.is_err() {
		error!(target = "scout.job", tool = tool_name, "executor panicked");
		if !terminated {
			let _ = outbound.send(ServerMessage::error("Execution error: job failed unexpectedly")).await;
		}
	}
}

fn job_message(tool: &str, target: &str, event: JobEvent) -> ServerMessage {
	match event {
		JobEvent::Start { command } => ServerMessage::Start {
			tool: tool.to_string(),
			target: target.to_string(),
			command,
		},
		JobEvent::Output { line } => ServerMessage::Output {
			tool: tool.to_string(),
			line,
		},
		JobEvent::Complete { return_code, success } => ServerMessage::Complete {
			tool: tool.to_string(),
			target: target.to_string(),
			return_code,
			success,
		},
		JobEvent::Error { message } => ServerMessage::Error { message },
	}
}

fn unix_timestamp() -> f64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|elapsed| elapsed.as_secs_f64())
		.unwrap_or_default()
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;
	use crate::policy::{ManualClock, PolicyGuard, PolicyLimits};
	use crate::server::SessionSettings;
	use crate::server::executor::fake::{FakeExecutor, Script};

	struct Harness {
		session: Session,
		rx: mpsc::Receiver<ServerMessage>,
		guard: PolicyGuard,
		executor: FakeExecutor,
		clock: Arc<ManualClock>,
	}

	fn settings() -> SessionSettings {
		SessionSettings {
			max_message_bytes: 1024,
			ping_interval: Duration::from_secs(30),
			ping_timeout: Duration::from_secs(10),
			cancel_on_disconnect: true,
			job_drain_grace: Duration::from_secs(2),
			trust_forwarded_headers: true,
		}
	}

	fn harness_with(script: Script, limits: PolicyLimits, settings: SessionSettings) -> Harness {
		let clock = Arc::new(ManualClock::new());
		let guard = PolicyGuard::with_clock(limits, clock.clone());
		let executor = FakeExecutor::new(script);
		let state = AgentState::new(guard.clone(), Arc::new(executor.clone()), settings);
		let (tx, rx) = mpsc::channel(64);
		let session = Session::open(state, "10.0.0.7".into(), tx).unwrap();
		Harness {
			session,
			rx,
			guard,
			executor,
			clock,
		}
	}

	fn harness(script: Script) -> Harness {
		harness_with(script, PolicyLimits::default(), settings())
	}

	async fn next(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
		tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("timed out waiting for a message")
			.expect("outbound closed")
	}

	fn execute(tool: &str, target: &str) -> String {
		format!(r#"{{"type":"execute_tool","tool":"{tool}","target":"{target}","user_id":"alice","tier":"elite"}}"#)
	}

	#[tokio::test]
	async fn welcome_lists_allowed_tools() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session.welcome().await;
		match next(&mut h.rx).await {
			ServerMessage::Welcome { message, available_tools } => {
				assert_eq!(message, WELCOME_MESSAGE);
				assert_eq!(available_tools, vec!["subfinder", "nmap", "gobuster", "ffuf", "nuclei", "amass"]);
			}
			other => panic!("expected welcome, got {other:?}"),
		}
		assert!(!h.session.token().as_str().is_empty());
	}

	#[tokio::test]
	async fn ping_answers_with_pong() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session.handle_text(r#"{"type":"ping"}"#).await;
		match next(&mut h.rx).await {
			ServerMessage::Pong { timestamp } => assert!(timestamp > 1_600_000_000.0),
			other => panic!("expected pong, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn disallowed_tool_never_reaches_the_executor() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session.handle_text(&execute("rm", "example.com")).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Tool \"rm\" is not allowed"));
		assert!(h.executor.calls().is_empty());
		assert_eq!(h.guard.in_flight("alice"), 0);
	}

	#[tokio::test]
	async fn invalid_target_is_rejected_before_admission() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session.handle_text(&execute("nmap", "example.com;id")).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Invalid target format"));
		assert!(h.executor.calls().is_empty());

		// No tier budget was spent on the rejected request.
		assert_eq!(h.guard.remaining_delay("alice", Tier::Essential), Duration::ZERO);
	}

	#[tokio::test]
	async fn missing_fields_and_bad_json_are_reported() {
		let mut h = harness(Script::Succeed(vec![]));

		h.session.handle_text(r#"{"type":"execute_tool","tool":"nmap"}"#).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Missing tool or target parameter"));

		h.session.handle_text("{not json").await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Invalid JSON format"));

		h.session.handle_text(r#"{"type":"shutdown"}"#).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Unknown message type"));
	}

	#[tokio::test]
	async fn oversized_and_binary_frames_are_refused() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session.handle_text(&"x".repeat(2048)).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Message too large"));

		h.session.handle_binary(16).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Binary messages are not supported"));
	}

	#[tokio::test]
	async fn rate_limit_applies_to_every_frame() {
		let limits = PolicyLimits {
			rate_limit: 3,
			..PolicyLimits::default()
		};
		let mut h = harness_with(Script::Succeed(vec![]), limits, settings());

		// Opening the session used one slot.
		for _ in 0..2 {
			h.session.handle_text(r#"{"type":"ping"}"#).await;
			assert!(matches!(next(&mut h.rx).await, ServerMessage::Pong { .. }));
		}
		h.session.handle_text(r#"{"type":"ping"}"#).await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Rate limit exceeded"));

		h.clock.advance(Duration::from_secs(61));
		h.session.handle_text(r#"{"type":"ping"}"#).await;
		assert!(matches!(next(&mut h.rx).await, ServerMessage::Pong { .. }));
	}

	#[tokio::test]
	async fn job_events_are_relayed_in_order() {
		let mut h = harness(Script::Succeed(vec!["22/tcp open", "80/tcp open"]));
		h.session.handle_text(&execute("nmap", "192.168.1.0/24")).await;

		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::Start {
				tool: "nmap".into(),
				target: "192.168.1.0/24".into(),
				command: "nmap 192.168.1.0/24".into(),
			}
		);
		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::Output {
				tool: "nmap".into(),
				line: "22/tcp open".into(),
			}
		);
		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::Output {
				tool: "nmap".into(),
				line: "80/tcp open".into(),
			}
		);
		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::Complete {
				tool: "nmap".into(),
				target: "192.168.1.0/24".into(),
				return_code: 0,
				success: true,
			}
		);
		assert_eq!(h.executor.calls(), vec![(Tool::Nmap, "192.168.1.0/24".to_string())]);
	}

	#[tokio::test]
	async fn concurrency_cap_is_reported_and_released() {
		let limits = PolicyLimits {
			max_concurrent_jobs: 1,
			..PolicyLimits::default()
		};
		let mut h = harness_with(Script::WaitForCancel, limits, settings());

		h.session.handle_text(&execute("ffuf", "https://example.com/FUZZ")).await;
		assert!(matches!(next(&mut h.rx).await, ServerMessage::Start { .. }));

		h.session.handle_text(&execute("ffuf", "https://example.com/FUZZ")).await;
		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::error("Too many concurrent tools running. Max: 1")
		);
		assert_eq!(h.guard.in_flight("alice"), 1);

		h.session.close().await;
		assert_eq!(h.guard.in_flight("alice"), 0);
	}

	#[tokio::test]
	async fn anonymous_jobs_are_keyed_by_origin() {
		let mut h = harness(Script::Succeed(vec![]));
		h.session
			.handle_text(r#"{"type":"execute_tool","tool":"subfinder","target":"example.com"}"#)
			.await;
		while !matches!(next(&mut h.rx).await, ServerMessage::Complete { .. }) {}

		assert!(h.guard.remaining_delay("origin:10.0.0.7", Tier::Essential) > Duration::ZERO);
		h.session
			.handle_text(r#"{"type":"execute_tool","tool":"subfinder","target":"example.com"}"#)
			.await;
		match next(&mut h.rx).await {
			ServerMessage::Error { message } => assert!(message.starts_with("Please wait"), "{message}"),
			other => panic!("expected tier delay error, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn close_cancels_jobs_and_releases_the_origin() {
		let mut h = harness(Script::WaitForCancel);
		assert_eq!(h.guard.connections("10.0.0.7"), 1);

		h.session.handle_text(&execute("amass", "example.com")).await;
		assert!(matches!(next(&mut h.rx).await, ServerMessage::Start { .. }));

		h.session.close().await;
		assert_eq!(next(&mut h.rx).await, ServerMessage::error("Job cancelled: connection closed"));
		assert_eq!(h.guard.connections("10.0.0.7"), 0);
		assert_eq!(h.guard.in_flight("alice"), 0);
	}

	#[tokio::test]
	async fn repeated_sessions_restore_connection_count() {
		let guard = PolicyGuard::new(PolicyLimits::default());
		let executor: Arc<dyn ToolExecutor> = Arc::new(FakeExecutor::new(Script::Succeed(vec![])));
		let state = AgentState::new(guard.clone(), executor, settings());

		for _ in 0..3 {
			let (tx, _rx) = mpsc::channel(4);
			let session = Session::open(state.clone(), "10.0.0.9".into(), tx).unwrap();
			assert_eq!(guard.connections("10.0.0.9"), 1);
			session.close().await;
			assert_eq!(guard.connections("10.0.0.9"), 0);
		}
	}

	#[tokio::test]
	async fn executor_panic_still_ends_the_job() {
		let mut h = harness(Script::Panic);
		h.session.handle_text(&execute("nuclei", "example.com")).await;

		assert!(matches!(next(&mut h.rx).await, ServerMessage::Start { .. }));
		assert_eq!(
			next(&mut h.rx).await,
			ServerMessage::error("Execution error: job failed unexpectedly")
		);
		h.session.close().await;
		assert_eq!(h.guard.in_flight("alice"), 0);
	}

	#[tokio::test]
	async fn detached_jobs_outlive_the_session() {
		let settings = SessionSettings {
			cancel_on_disconnect: false,
			..settings()
		};
		let mut h = harness_with(Script::WaitForCancel, PolicyLimits::default(), settings);
		h.session.handle_text(&execute("gobuster", "https://example.com")).await;
		assert!(matches!(next(&mut h.rx).await, ServerMessage::Start { .. }));

		h.session.close().await;
		assert_eq!(h.guard.connections("10.0.0.7"), 0);
		assert_eq!(h.guard.in_flight("alice"), 1);
	}
}
