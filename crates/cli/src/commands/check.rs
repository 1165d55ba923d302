use scout_runtime::{Target, TargetKind};

use crate::error::Result;

/// Prints the verdict for `raw`; a rejected target is an error.
pub fn run(raw: &str) -> Result<()> {
	match Target::parse(raw) {
		Ok(target) => {
			println!("accepted: {} ({})", target, kind_label(target.kind()));
			Ok(())
		}
		Err(reason) => {
			println!("rejected: {reason}");
			Err(reason.into())
		}
	}
}

fn kind_label(kind: TargetKind) -> &'static str {
	match kind {
		TargetKind::Domain => "domain",
		TargetKind::Ipv4 => "ipv4",
		TargetKind::Cidr => "cidr",
		TargetKind::Url => "url",
	}
}

#[cfg(test)]
mod tests {
	use scout_runtime::InvalidTarget;

	use super::*;
	use crate::error::AgentError;

	#[test]
	fn accepted_target_is_ok() {
		assert!(run("example.com").is_ok());
		assert!(run("10.0.0.0/8").is_ok());
	}

	#[test]
	fn rejected_target_carries_the_reason() {
		match run("example.com|id") {
			Err(AgentError::TargetRejected(InvalidTarget::DeniedCharacter('|'))) => {}
			other => panic!("unexpected result {other:?}"),
		}
	}
}
