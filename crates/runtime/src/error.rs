use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error("install step has no program")]
	EmptyCommand,

	#[error("failed to spawn {program}: {source}")]
	Spawn {
		program: String,
		#[source]
		source: std::io::Error,
	},

	#[error("`{command}` exited with code {code}: {detail}")]
	StepFailed { command: String, code: i32, detail: String },

	#[error("`{command}` did not finish within {}s", timeout.as_secs())]
	StepTimeout { command: String, timeout: Duration },
}
