//! Subscription tiers and their minimum spacing between job dispatches.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
	#[default]
	Essential,
	Professional,
	Teams,
	Enterprise,
	Elite,
}

impl Tier {
	/// Parses a client-supplied tier label. Absent or unrecognized labels map
	/// to [`Tier::Essential`], the most restrictive tier.
	pub fn from_label(label: Option<&str>) -> Self {
		match label.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
			Some("professional") => Tier::Professional,
			Some("teams") => Tier::Teams,
			Some("enterprise") => Tier::Enterprise,
			Some("elite") => Tier::Elite,
			_ => Tier::Essential,
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Tier::Essential => "essential",
			Tier::Professional => "professional",
			Tier::Teams => "teams",
			Tier::Enterprise => "enterprise",
			Tier::Elite => "elite",
		}
	}
}

impl fmt::Display for Tier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Minimum seconds between two dispatches by the same user, per tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierDelays {
	pub essential: u64,
	pub professional: u64,
	pub teams: u64,
	pub enterprise: u64,
	pub elite: u64,
}

impl Default for TierDelays {
	fn default() -> Self {
		Self {
			essential: 5,
			professional: 3,
			teams: 2,
			enterprise: 1,
			elite: 0,
		}
	}
}

impl TierDelays {
	pub fn delay(&self, tier: Tier) -> Duration {
		let secs = match tier {
			Tier::Essential => self.essential,
			Tier::Professional => self.professional,
			Tier::Teams => self.teams,
			Tier::Enterprise => self.enterprise,
			Tier::Elite => self.elite,
		};
		Duration::from_secs(secs)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_and_missing_tiers_are_essential() {
		assert_eq!(Tier::from_label(None), Tier::Essential);
		assert_eq!(Tier::from_label(Some("platinum")), Tier::Essential);
		assert_eq!(Tier::from_label(Some("")), Tier::Essential);
	}

	#[test]
	fn labels_are_case_insensitive() {
		assert_eq!(Tier::from_label(Some("Elite")), Tier::Elite);
		assert_eq!(Tier::from_label(Some(" teams ")), Tier::Teams);
	}

	#[test]
	fn default_delays() {
		let delays = TierDelays::default();
		assert_eq!(delays.delay(Tier::Essential), Duration::from_secs(5));
		assert_eq!(delays.delay(Tier::Professional), Duration::from_secs(3));
		assert_eq!(delays.delay(Tier::Teams), Duration::from_secs(2));
		assert_eq!(delays.delay(Tier::Enterprise), Duration::from_secs(1));
		assert_eq!(delays.delay(Tier::Elite), Duration::ZERO);
	}

	#[test]
	fn partial_table_keeps_defaults() {
		let delays: TierDelays = serde_json::from_str(r#"{"essential": 10}"#).unwrap();
		assert_eq!(delays.essential, 10);
		assert_eq!(delays.teams, 2);
	}
}
