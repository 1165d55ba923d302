//! Redaction of credential-looking text before it reaches the log.
//!
//! Only log output is redacted. Tool output relayed to the requesting client
//! is sent unchanged.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

pub const REDACTED: &str = "[REDACTED]";

const MARKERS: &[&str] = &[
	"password=",
	"token=",
	"secret=",
	"api_key=",
	"auth_key=",
	"private_key",
	"access_token",
	"refresh_token",
	"jwt_token",
	"session_key",
	"encryption_key",
	"master_key",
];

const INDICATORS: &[&str] = &["token", "key", "secret", "password"];

static BEARER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)bearer\s+[A-Za-z0-9\-_.=]+").expect("bearer regex should compile"));

static KEY_SHAPED: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(r"[a-zA-Z0-9]{32,}|[A-Za-z0-9+/]{40,}={0,2}").expect("key-shape regex should compile"));

/// Returns `true` when `text` looks like it carries a credential.
pub fn is_sensitive(text: &str) -> bool {
	let lowered = text.to_ascii_lowercase();
	if MARKERS.iter().any(|m| lowered.contains(m)) || BEARER.is_match(text) {
		return true;
	}
	KEY_SHAPED.is_match(text) && INDICATORS.iter().any(|i| lowered.contains(i))
}

/// Display adapter that prints `[REDACTED]` in place of sensitive text.
#[derive(Debug, Clone, Copy)]
pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if is_sensitive(self.0) { f.write_str(REDACTED) } else { f.write_str(self.0) }
	}
}

pub fn redacted(text: &str) -> Redacted<'_> {
	Redacted(text)
}
