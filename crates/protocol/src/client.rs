//! Inbound messages sent by a requester.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages a client may send to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// Run one allow-listed tool against one target.
	ExecuteTool(ExecuteTool),
	/// Keep-alive probe answered with `pong`.
	Ping,
}

/// Payload of an `execute_tool` request.
///
/// `tool` and `target` are optional on the wire so that a request missing
/// either one decodes and can be answered with a precise error instead of a
/// generic parse failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteTool {
	#[serde(default)]
	pub tool: Option<String>,
	#[serde(default)]
	pub target: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tier: Option<String>,
}

impl ExecuteTool {
	/// Returns `(tool, target)` when both are present and non-empty.
	pub fn tool_and_target(&self) -> Option<(&str, &str)> {
		let tool = self.tool.as_deref().filter(|t| !t.is_empty())?;
		let target = self.target.as_deref().filter(|t| !t.is_empty())?;
		Some((tool, target))
	}
}

/// Reasons an inbound frame could not be turned into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
	#[error("Invalid JSON format")]
	InvalidJson,
	#[error("Unknown message type")]
	MissingType,
	#[error("Unknown message type")]
	UnknownType(String),
	#[error("Malformed message: {0}")]
	Malformed(String),
}

impl ClientMessage {
	/// Decodes one text frame.
	///
	/// Distinguishes frames that are not JSON at all from JSON objects with an
	/// unknown or missing `type`, and from known types with bad field shapes.
	pub fn from_json(text: &str) -> Result<Self, DecodeError> {
		let value: Value = serde_json::from_str(text).map_err(|_| DecodeError::InvalidJson)?;

		match value.get("type").and_then(Value::as_str) {
			Some("execute_tool" | "ping") => serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string())),
			Some(other) => Err(DecodeError::UnknownType(other.to_string())),
			None => Err(DecodeError::MissingType),
		}
	}
}
