//! WebSocket front end.
//!
//! One axum route at `/` upgrades to a WebSocket. Each connection becomes a
//! [`Session`]; a dedicated writer task owns the sink half of the socket and
//! drains the session's outbound queue, interleaving keep-alive pings. A peer
//! that sends nothing, not even a pong, for one ping interval plus the ping
//! timeout is treated as gone and its session is closed.

pub mod executor;
pub mod session;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{ConnectInfo, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use scout_protocol::ServerMessage;
use scout_runtime::Tool;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use executor::{LocalExecutor, ToolExecutor};
pub use session::Session;

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::policy::{Denial, PolicyGuard};

/// Close code sent when a connection is refused by policy ("try again later").
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

const OUTBOUND_QUEUE: usize = 256;

/// Appended to an `output` line cut short to fit the outbound size limit.
pub const TRUNCATION_MARKER: &str = " [line truncated]";

#[derive(Debug, Clone)]
pub struct SessionSettings {
	pub max_message_bytes: usize,
	pub ping_interval: Duration,
	/// How long past a ping the peer may stay silent before the session ends.
	pub ping_timeout: Duration,
	pub cancel_on_disconnect: bool,
	/// How long a closing session waits for cancelled jobs before aborting them.
	pub job_drain_grace: Duration,
	pub trust_forwarded_headers: bool,
}

/// Shared by every connection.
#[derive(Clone)]
pub struct AgentState {
	pub guard: PolicyGuard,
	pub executor: Arc<dyn ToolExecutor>,
	pub settings: Arc<SessionSettings>,
}

impl AgentState {
	pub fn new(guard: PolicyGuard, executor: Arc<dyn ToolExecutor>, settings: SessionSettings) -> Self {
		Self {
			guard,
			executor,
			settings: Arc::new(settings),
		}
	}

	pub fn from_config(config: &AgentConfig) -> Self {
		Self::new(
			PolicyGuard::new(config.policy_limits()),
			Arc::new(LocalExecutor::from_config(config)),
			config.session_settings(),
		)
	}
}

/// Binds the configured address and serves until `shutdown` resolves.
pub async fn serve(config: &AgentConfig, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
	let addr = config.bind_addr();
	let listener = TcpListener::bind(&addr)
		.await
		.map_err(|source| AgentError::Bind { addr: addr.clone(), source })?;

	let state = AgentState::from_config(config);
	report_tool_availability(state.executor.as_ref());
	info!(target = "scout.server", addr = %listener.local_addr()?, "agent listening");

	serve_on(listener, state, shutdown).await
}

/// Serves on an already bound listener.
pub async fn serve_on(listener: TcpListener, state: AgentState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
	axum::serve(listener, router(state).into_make_service_with_connect_info::<SocketAddr>())
		.with_graceful_shutdown(shutdown)
		.await?;
	info!(target = "scout.server", "agent stopped");
	Ok(())
}

pub fn router(state: AgentState) -> Router {
	Router::new().route("/", get(ws_handler)).with_state(state)
}

fn report_tool_availability(executor: &dyn ToolExecutor) {
	for tool in Tool::ALL {
		if executor.is_available(tool) {
			info!(target = "scout.server", tool = tool.name(), "tool available");
		} else {
			info!(target = "scout.server", tool = tool.name(), "tool not found; will be auto-installed when needed");
		}
	}
}

/// Identity used for per-origin limits: the first `X-Forwarded-For` entry,
/// else `X-Real-IP`, else the peer address.
pub fn client_origin(headers: &HeaderMap, peer: SocketAddr) -> String {
	let header = |name: &str| {
		headers
			.get(name)
			.and_then(|value| value.to_str().ok())
			.map(str::trim)
			.filter(|value| !value.is_empty())
	};

	header("x-forwarded-for")
		.and_then(|list| list.split(',').next())
		.map(str::trim)
		.filter(|value| !value.is_empty())
		.or_else(|| header("x-real-ip"))
		.map(str::to_string)
		.unwrap_or_else(|| peer.ip().to_string())
}

async fn ws_handler(
	ws: WebSocketUpgrade,
	ConnectInfo(peer): ConnectInfo<SocketAddr>,
	headers: HeaderMap,
	State(state): State<AgentState>,
) -> impl IntoResponse {
	let origin = if state.settings.trust_forwarded_headers {
		client_origin(&headers, peer)
	} else {
		peer.ip().to_string()
	};

	// The transport cap sits above the per-message limit so oversized
	// messages still get an error reply instead of a dropped connection.
	let transport_limit = state.settings.max_message_bytes.saturating_mul(2);
	ws.max_message_size(transport_limit)
		.max_frame_size(transport_limit)
		.on_upgrade(move |socket| handle_socket(socket, origin, state))
}

async fn handle_socket(socket: WebSocket, origin: String, state: AgentState) {
	let settings = Arc::clone(&state.settings);
	let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);

	let mut session = match Session::open(state, origin.clone(), outbound_tx) {
		Ok(session) => session,
		Err(denial) => {
			reject(socket, &origin, &denial).await;
			return;
		}
	};

	let (sink, mut stream) = socket.split();
	let writer = tokio::spawn(write_loop(sink, outbound_rx, settings.max_message_bytes, settings.ping_interval));
	session.welcome().await;

	let idle_limit = settings.ping_interval + settings.ping_timeout;
	let mut deadline = Instant::now() + idle_limit;
	loop {
		let frame = tokio::select! {
			frame = stream.next() => frame,
			_ = tokio::time::sleep_until(deadline) => {
				warn!(target = "scout.server", origin = %origin, idle_secs = idle_limit.as_secs(), "peer stopped answering pings");
				break;
			}
		};
		let Some(frame) = frame else { break };
		deadline = Instant::now() + idle_limit;

		match frame {
			Ok(Message::Text(text)) => session.handle_text(text.as_str()).await,
			Ok(Message::Binary(data)) => session.handle_binary(data.len()).await,
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				debug!(target = "scout.server", origin = %origin, error = %err, "websocket read failed");
				break;
			}
		}
	}

	session.close().await;
	// A peer that stopped reading can leave the writer parked on a full socket.
	writer.abort();
}

async fn reject(mut socket: WebSocket, origin: &str, denial: &Denial) {
	warn!(target = "scout.server", origin, reason = %denial, "connection rejected");
	let frame = CloseFrame {
		code: CLOSE_TRY_AGAIN_LATER,
		reason: denial.to_string().into(),
	};
	let _ = socket.send(Message::Close(Some(frame))).await;
}

/// Sole writer of a connection. Ends when every sender is gone or the
/// socket stops accepting frames.
async fn write_loop(
	mut sink: SplitSink<WebSocket, Message>,
	mut outbound: mpsc::Receiver<ServerMessage>,
	max_bytes: usize,
	ping_interval: Duration,
) {
	let mut keepalive = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);
	keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

	loop {
		let frame = tokio::select! {
			message = outbound.recv() => match message {
				Some(message) => match encode(&message, max_bytes) {
					Some(json) => Message::Text(json.into()),
					None => continue,
				},
				None => break,
			},
			_ = keepalive.tick() => Message::Ping(Default::default()),
		};

		if let Err(err) = sink.send(frame).await {
			debug!(target = "scout.server", error = %err, "websocket write failed");
			break;
		}
	}

	let _ = sink.close().await;
}

/// Serializes `message`, cutting an oversized `output` line down to fit
/// `max_bytes`. Any other oversized message is dropped.
fn encode(message: &ServerMessage, max_bytes: usize) -> Option<String> {
	let json = match serde_json::to_string(message) {
		Ok(json) => json,
		Err(err) => {
			warn!(target = "scout.server", error = %err, "failed to encode outbound message");
			return None;
		}
	};
	if json.len() <= max_bytes {
		return Some(json);
	}

	if let ServerMessage::Output { tool, line } = message {
		if let Some(fitted) = truncate_output(tool, line, json.len(), max_bytes) {
			debug!(target = "scout.server", size = json.len(), limit = max_bytes, "truncated oversized output line");
			return Some(fitted);
		}
	}
	warn!(target = "scout.server", size = json.len(), limit = max_bytes, "dropping oversized outbound message");
	None
}

/// Drops characters from the end of `line` until the re-encoded message,
/// marker included, is at most `max_bytes`.
fn truncate_output(tool: &str, line: &str, encoded_len: usize, max_bytes: usize) -> Option<String> {
	let excess = encoded_len - max_bytes + TRUNCATION_MARKER.len();
	let mut removed = 0;
	let mut end = line.len();
	for (idx, ch) in line.char_indices().rev() {
		if removed >= excess {
			break;
		}
		removed += escaped_len(ch);
		end = idx;
	}
	if removed < excess {
		return None;
	}

	let cut = ServerMessage::Output {
		tool: tool.to_string(),
		line: format!("{}{TRUNCATION_MARKER}", &line[..end]),
	};
	serde_json::to_string(&cut).ok().filter(|json| json.len() <= max_bytes)
}

/// Bytes `ch` occupies inside a JSON string literal.
fn escaped_len(ch: char) -> usize {
	match ch {
		'"' | '\\' | '\n' | '\r' | '\t' | '\u{08}' | '\u{0c}' => 2,
		ch if (ch as u32) < 0x20 => 6,
		ch => ch.len_utf8(),
	}
}

#[cfg(test)]
mod tests {
	use axum::http::HeaderValue;

	use super::*;

	fn peer() -> SocketAddr {
		"192.0.2.10:54321".parse().unwrap()
	}

	#[test]
	fn origin_prefers_first_forwarded_entry() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.5, 10.0.0.1"));
		headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
		assert_eq!(client_origin(&headers, peer()), "203.0.113.5");
	}

	#[test]
	fn origin_falls_back_to_real_ip_then_peer() {
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-for", HeaderValue::from_static(" , "));
		headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
		assert_eq!(client_origin(&headers, peer()), "198.51.100.2");

		assert_eq!(client_origin(&HeaderMap::new(), peer()), "192.0.2.10");
	}

	fn output(line: String) -> ServerMessage {
		ServerMessage::Output { tool: "nmap".into(), line }
	}

	fn decoded_line(json: &str) -> String {
		match serde_json::from_str::<ServerMessage>(json).unwrap() {
			ServerMessage::Output { line, .. } => line,
			other => panic!("expected output, got {other:?}"),
		}
	}

	#[test]
	fn oversized_non_output_messages_are_dropped() {
		assert!(encode(&ServerMessage::error("ok"), 1024).is_some());
		assert!(encode(&ServerMessage::error("x".repeat(2048)), 1024).is_none());
	}

	#[test]
	fn output_line_at_the_default_cap_is_delivered() {
		let config = AgentConfig::default();
		let line = "x".repeat(config.process.max_line_bytes);
		let json = encode(&output(line), config.limits.max_message_bytes).unwrap();

		assert!(json.len() <= config.limits.max_message_bytes);
		let delivered = decoded_line(&json);
		assert!(delivered.ends_with(TRUNCATION_MARKER));
		assert!(delivered.starts_with("xxxx"));
	}

	#[test]
	fn escape_heavy_output_is_truncated_to_fit() {
		let max = 1024 * 1024;
		let line = "\"".repeat(600 * 1024);
		let json = encode(&output(line), max).unwrap();

		assert!(json.len() <= max);
		let delivered = decoded_line(&json);
		assert!(delivered.ends_with(TRUNCATION_MARKER));
		assert!(delivered.trim_end_matches(TRUNCATION_MARKER).chars().all(|ch| ch == '"'));
	}

	#[test]
	fn truncation_keeps_multibyte_characters_whole() {
		let line = "é\u{1}".repeat(200);
		let json = encode(&output(line), 256).unwrap();

		assert!(json.len() <= 256);
		let delivered = decoded_line(&json);
		let body = delivered.trim_end_matches(TRUNCATION_MARKER);
		assert!(!body.is_empty());
		assert!(body.chars().all(|ch| ch == 'é' || ch == '\u{1}'));
	}
}
