//! Outbound messages emitted by the agent.

use serde::{Deserialize, Serialize};

/// Messages the agent sends to a connected client.
///
/// For a single job the agent emits `Start`, any number of `Output`, then
/// exactly one of `Complete` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	Welcome {
		message: String,
		available_tools: Vec<String>,
	},
	Start {
		tool: String,
		target: String,
		command: String,
	},
	Output {
		tool: String,
		line: String,
	},
	Complete {
		tool: String,
		target: String,
		return_code: i32,
		success: bool,
	},
	Error {
		message: String,
	},
	Pong {
		timestamp: f64,
	},
}

impl ServerMessage {
	pub fn error(message: impl Into<String>) -> Self {
		Self::Error { message: message.into() }
	}
}
