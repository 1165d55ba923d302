//! Agent configuration.
//!
//! Loaded from JSON, either the file given with `--config` or
//! `<config dir>/scout/agent.json` when it exists. Every field has a default,
//! so a partial file only overrides what it names.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use scout_runtime::{RunnerLimits, ToolLocator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::policy::{PolicyLimits, TierDelays};
use crate::server::SessionSettings;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 13337;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
	pub host: String,
	pub port: u16,
	pub limits: LimitsConfig,
	pub process: ProcessConfig,
	pub tier_delays: TierDelays,
	/// Extra directories searched for tool executables after `PATH`.
	pub tool_paths: Vec<PathBuf>,
	pub ping_interval_secs: u64,
	/// Seconds a peer may stay silent after a ping before it is dropped.
	pub ping_timeout_secs: u64,
	pub cancel_on_disconnect: bool,
	/// Derive the client origin from `X-Forwarded-For` / `X-Real-IP`.
	pub trust_forwarded_headers: bool,
}

impl Default for AgentConfig {
	fn default() -> Self {
		Self {
			host: DEFAULT_HOST.to_string(),
			port: DEFAULT_PORT,
			limits: LimitsConfig::default(),
			process: ProcessConfig::default(),
			tier_delays: TierDelays::default(),
			tool_paths: Vec::new(),
			ping_interval_secs: 30,
			ping_timeout_secs: 10,
			cancel_on_disconnect: true,
			trust_forwarded_headers: true,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
	pub max_message_bytes: usize,
	pub max_connections_per_origin: usize,
	pub rate_limit_window_secs: u64,
	pub rate_limit_requests: usize,
	pub max_concurrent_jobs: usize,
}

impl Default for LimitsConfig {
	fn default() -> Self {
		Self {
			max_message_bytes: 1024 * 1024,
			max_connections_per_origin: 5,
			rate_limit_window_secs: 60,
			rate_limit_requests: 10,
			max_concurrent_jobs: 3,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
	pub timeout_secs: u64,
	pub read_tick_ms: u64,
	pub exit_grace_secs: u64,
	pub max_output_bytes: usize,
	pub max_line_bytes: usize,
	pub install_step_timeout_secs: u64,
}

impl Default for ProcessConfig {
	fn default() -> Self {
		Self {
			timeout_secs: 300,
			read_tick_ms: 1000,
			exit_grace_secs: 5,
			max_output_bytes: 10 * 1024 * 1024,
			max_line_bytes: 1024 * 1024,
			install_step_timeout_secs: 600,
		}
	}
}

impl AgentConfig {
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("scout").join("agent.json"))
	}

	/// Loads `path`, or the default location if it exists, or the defaults.
	///
	/// An explicitly given path must exist.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => match Self::default_path().filter(|p| p.is_file()) {
				Some(path) => path,
				None => {
					debug!(target = "scout.config", "no config file; using defaults");
					return Ok(Self::default());
				}
			},
		};

		let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read config {}", path.display()))?;
		let config: Self = serde_json::from_str(&text).map_err(|source| AgentError::ConfigParse {
			path: path.clone(),
			source,
		})?;
		config.validate()?;
		debug!(target = "scout.config", path = %path.display(), "loaded config");
		Ok(config)
	}

	pub fn validate(&self) -> Result<()> {
		let limits = &self.limits;
		let process = &self.process;
		let zero = [
			("limits.max_message_bytes", limits.max_message_bytes == 0),
			("limits.rate_limit_window_secs", limits.rate_limit_window_secs == 0),
			("limits.rate_limit_requests", limits.rate_limit_requests == 0),
			("limits.max_concurrent_jobs", limits.max_concurrent_jobs == 0),
			("limits.max_connections_per_origin", limits.max_connections_per_origin == 0),
			("process.timeout_secs", process.timeout_secs == 0),
			("process.read_tick_ms", process.read_tick_ms == 0),
			("process.exit_grace_secs", process.exit_grace_secs == 0),
			("process.max_line_bytes", process.max_line_bytes == 0),
			("process.install_step_timeout_secs", process.install_step_timeout_secs == 0),
			("ping_interval_secs", self.ping_interval_secs == 0),
			("ping_timeout_secs", self.ping_timeout_secs == 0),
		];
		if let Some((field, _)) = zero.iter().find(|(_, is_zero)| *is_zero) {
			return Err(AgentError::InvalidConfig(format!("{field} must be greater than zero")));
		}
		if process.max_line_bytes > process.max_output_bytes {
			return Err(AgentError::InvalidConfig(
				"process.max_line_bytes must not exceed process.max_output_bytes".into(),
			));
		}
		Ok(())
	}

	pub fn bind_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}

	pub fn policy_limits(&self) -> PolicyLimits {
		PolicyLimits {
			max_connections_per_origin: self.limits.max_connections_per_origin,
			rate_window: Duration::from_secs(self.limits.rate_limit_window_secs),
			rate_limit: self.limits.rate_limit_requests,
			max_concurrent_jobs: self.limits.max_concurrent_jobs,
			tier_delays: self.tier_delays.clone(),
		}
	}

	pub fn runner_limits(&self) -> RunnerLimits {
		RunnerLimits {
			timeout: Duration::from_secs(self.process.timeout_secs),
			read_tick: Duration::from_millis(self.process.read_tick_ms),
			exit_grace: Duration::from_secs(self.process.exit_grace_secs),
			max_output_bytes: self.process.max_output_bytes,
			max_line_bytes: self.process.max_line_bytes,
		}
	}

	pub fn install_step_timeout(&self) -> Duration {
		Duration::from_secs(self.process.install_step_timeout_secs)
	}

	pub fn locator(&self) -> ToolLocator {
		ToolLocator::with_default_dirs(self.tool_paths.iter().cloned())
	}

	pub fn session_settings(&self) -> SessionSettings {
		SessionSettings {
			max_message_bytes: self.limits.max_message_bytes,
			ping_interval: Duration::from_secs(self.ping_interval_secs),
			ping_timeout: Duration::from_secs(self.ping_timeout_secs),
			cancel_on_disconnect: self.cancel_on_disconnect,
			// Jobs get the runner's own grace to exit, plus a margin for the
			// terminal event to reach the writer.
			job_drain_grace: Duration::from_secs(self.process.exit_grace_secs) + Duration::from_secs(2),
			trust_forwarded_headers: self.trust_forwarded_headers,
		}
	}
}
