//! Admission control for connections, actions and jobs.
//!
//! All mutable state sits in one [`GuardState`] behind a single mutex, so
//! every check-then-record sequence is atomic with respect to other
//! connections. Admission hands out RAII guards ([`ConnectionLease`],
//! [`JobPermit`]) that give their slot back when dropped, whichever way the
//! owning task ends.

mod clock;
mod tier;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

pub use clock::{Clock, ManualClock, SystemClock};
pub use tier::{Tier, TierDelays};

#[derive(Debug, Clone)]
pub struct PolicyLimits {
	pub max_connections_per_origin: usize,
	pub rate_window: Duration,
	pub rate_limit: usize,
	pub max_concurrent_jobs: usize,
	pub tier_delays: TierDelays,
}

impl Default for PolicyLimits {
	fn default() -> Self {
		Self {
			max_connections_per_origin: 5,
			rate_window: Duration::from_secs(60),
			rate_limit: 10,
			max_concurrent_jobs: 3,
			tier_delays: TierDelays::default(),
		}
	}
}

/// Why an admission was refused. The `Display` text is sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Denial {
	#[error("Too many connections")]
	TooManyConnections { limit: usize },

	#[error("Rate limit exceeded")]
	RateLimited { retry_after: Duration },

	#[error("Too many concurrent tools running. Max: {limit}")]
	TooManyJobs { limit: usize },

	#[error("Please wait {:.1} more seconds before running another tool ({tier} tier)", .remaining.as_secs_f64())]
	TierDelay { tier: Tier, remaining: Duration },
}

/// Per-process admission bookkeeping.
#[derive(Debug, Default)]
pub struct GuardState {
	connections: HashMap<String, usize>,
	actions: HashMap<String, VecDeque<Instant>>,
	in_flight: HashMap<String, usize>,
	last_dispatch: HashMap<String, Instant>,
}

impl GuardState {
	fn admit_action(&mut self, origin: &str, now: Instant, limits: &PolicyLimits) -> Result<(), Denial> {
		let window = self.actions.entry(origin.to_string()).or_default();
		while window.front().is_some_and(|t| now.saturating_duration_since(*t) >= limits.rate_window) {
			window.pop_front();
		}

		if window.len() >= limits.rate_limit {
			let retry_after = window
				.front()
				.map(|oldest| limits.rate_window.saturating_sub(now.saturating_duration_since(*oldest)))
				.unwrap_or(limits.rate_window);
			return Err(Denial::RateLimited { retry_after });
		}

		window.push_back(now);
		Ok(())
	}

	fn remaining_delay(&self, user: &str, tier: Tier, now: Instant, limits: &PolicyLimits) -> Duration {
		let delay = limits.tier_delays.delay(tier);
		match self.last_dispatch.get(user) {
			Some(last) => delay.saturating_sub(now.saturating_duration_since(*last)),
			None => Duration::ZERO,
		}
	}

	/// Forgets origins and users with nothing left to limit.
	fn sweep(&mut self, now: Instant, limits: &PolicyLimits) {
		self.actions.retain(|_, window| {
			window.back().is_some_and(|t| now.saturating_duration_since(*t) < limits.rate_window)
		});

		let longest_delay = [Tier::Essential, Tier::Professional, Tier::Teams, Tier::Enterprise, Tier::Elite]
			.into_iter()
			.map(|tier| limits.tier_delays.delay(tier))
			.max()
			.unwrap_or_default();
		self.last_dispatch
			.retain(|_, last| now.saturating_duration_since(*last) < longest_delay);
	}
}

#[derive(Debug, Clone)]
pub struct PolicyGuard {
	limits: PolicyLimits,
	clock: Arc<dyn Clock>,
	state: Arc<Mutex<GuardState>>,
}

impl PolicyGuard {
	pub fn new(limits: PolicyLimits) -> Self {
		Self::with_clock(limits, Arc::new(SystemClock))
	}

	pub fn with_clock(limits: PolicyLimits, clock: Arc<dyn Clock>) -> Self {
		Self {
			limits,
			clock,
			state: Arc::new(Mutex::new(GuardState::default())),
		}
	}

	pub fn limits(&self) -> &PolicyLimits {
		&self.limits
	}

	/// Admits a new connection from `origin`.
	///
	/// Checks the per-origin connection cap, then counts the connection as one
	/// action against the origin's rate window.
	pub fn open_connection(&self, origin: &str) -> Result<ConnectionLease, Denial> {
		let now = self.clock.now();
		let mut state = self.state.lock();
		state.sweep(now, &self.limits);

		let open = state.connections.get(origin).copied().unwrap_or(0);
		if open >= self.limits.max_connections_per_origin {
			debug!(target = "scout.policy", origin, open, "connection cap reached");
			return Err(Denial::TooManyConnections {
				limit: self.limits.max_connections_per_origin,
			});
		}

		state.admit_action(origin, now, &self.limits)?;
		*state.connections.entry(origin.to_string()).or_default() += 1;

		Ok(ConnectionLease {
			origin: origin.to_string(),
			state: Arc::clone(&self.state),
			released: false,
		})
	}

	/// Records one inbound action for `origin` if its window has room.
	pub fn admit_action(&self, origin: &str) -> Result<(), Denial> {
		let now = self.clock.now();
		let result = self.state.lock().admit_action(origin, now, &self.limits);
		if let Err(denial) = &result {
			debug!(target = "scout.policy", origin, %denial, "action denied");
		}
		result
	}

	/// Admits a job for `user`: concurrency cap first, then the tier spacing.
	///
	/// Nothing is recorded on denial. On admission the user's in-flight count
	/// and last-dispatch time are updated together.
	pub fn admit_job(&self, user: &str, tier: Tier) -> Result<JobPermit, Denial> {
		let now = self.clock.now();
		let mut state = self.state.lock();

		let running = state.in_flight.get(user).copied().unwrap_or(0);
		if running >= self.limits.max_concurrent_jobs {
			return Err(Denial::TooManyJobs {
				limit: self.limits.max_concurrent_jobs,
			});
		}

		let remaining = state.remaining_delay(user, tier, now, &self.limits);
		if !remaining.is_zero() {
			return Err(Denial::TierDelay { tier, remaining });
		}

		*state.in_flight.entry(user.to_string()).or_default() += 1;
		state.last_dispatch.insert(user.to_string(), now);

		Ok(JobPermit {
			user: user.to_string(),
			state: Arc::clone(&self.state),
		})
	}

	pub fn connections(&self, origin: &str) -> usize {
		self.state.lock().connections.get(origin).copied().unwrap_or(0)
	}

	pub fn in_flight(&self, user: &str) -> usize {
		self.state.lock().in_flight.get(user).copied().unwrap_or(0)
	}

	/// Time `user` must still wait before a job at `tier` is admitted.
	pub fn remaining_delay(&self, user: &str, tier: Tier) -> Duration {
		let now = self.clock.now();
		self.state.lock().remaining_delay(user, tier, now, &self.limits)
	}
}

/// One admitted connection. Dropping it frees the origin's slot.
#[derive(Debug)]
pub struct ConnectionLease {
	origin: String,
	state: Arc<Mutex<GuardState>>,
	released: bool,
}

impl ConnectionLease {
	/// Frees the slot now. Later calls, and the eventual drop, do nothing.
	pub fn release(&mut self) {
		if std::mem::replace(&mut self.released, true) {
			return;
		}
		let mut state = self.state.lock();
		if let Some(count) = state.connections.get_mut(&self.origin) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				state.connections.remove(&self.origin);
			}
		}
	}
}

impl Drop for ConnectionLease {
	fn drop(&mut self) {
		self.release();
	}
}

/// One admitted job. Dropping it frees the user's concurrency slot.
#[derive(Debug)]
pub struct JobPermit {
	user: String,
	state: Arc<Mutex<GuardState>>,
}

impl Drop for JobPermit {
	fn drop(&mut self) {
		let mut state = self.state.lock();
		if let Some(count) = state.in_flight.get_mut(&self.user) {
			*count = count.saturating_sub(1);
			if *count == 0 {
				state.in_flight.remove(&self.user);
			}
		}
	}
}
