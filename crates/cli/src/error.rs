use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
	#[error("failed to parse config {path}: {source}")]
	ConfigParse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("invalid config: {0}")]
	InvalidConfig(String),

	#[error("failed to bind {addr}: {source}")]
	Bind {
		addr: String,
		#[source]
		source: std::io::Error,
	},

	#[error("target rejected: {0}")]
	TargetRejected(#[from] scout_runtime::InvalidTarget),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Anyhow(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AgentError>;
