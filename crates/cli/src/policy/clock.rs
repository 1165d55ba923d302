//! Time source for the policy guard.

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub trait Clock: Send + Sync + fmt::Debug {
	fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> Instant {
		Instant::now()
	}
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
	base: Instant,
	offset: Mutex<Duration>,
}

impl ManualClock {
	pub fn new() -> Self {
		Self {
			base: Instant::now(),
			offset: Mutex::new(Duration::ZERO),
		}
	}

	pub fn advance(&self, by: Duration) {
		*self.offset.lock() += by;
	}
}

impl Default for ManualClock {
	fn default() -> Self {
		Self::new()
	}
}

impl Clock for ManualClock {
	fn now(&self) -> Instant {
		self.base + *self.offset.lock()
	}
}
