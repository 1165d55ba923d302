//! Tracing subscriber setup.
//!
//! Log lines go to stderr so `tools` and `check-target` keep stdout clean.
//! `RUST_LOG` always wins over the verbosity flag.

use tracing_subscriber::EnvFilter;

pub use scout_runtime::redact::redacted;

fn default_directives(verbose: u8) -> &'static str {
	match verbose {
		0 => "warn,scout=info",
		1 => "info",
		2 => "info,scout=debug",
		_ => "debug,scout=trace",
	}
}

pub fn init_logging(verbose: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(true)
		.try_init();
}
