//! Scan target validation.
//!
//! Tool arguments are passed to the child as discrete argv entries and never
//! through a shell, so this module is the only barrier between request data
//! and a command line. A [`Target`] can only be obtained through
//! [`Target::parse`]; [`crate::ToolSpec::command`] accepts nothing else.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub const MAX_TARGET_LEN: usize = 255;

/// Characters never needed by a domain, IPv4 address, CIDR range or plain URL.
///
/// Control characters and all whitespace are rejected separately.
const DENIED_CHARS: &[char] = &[
	';', '&', '|', '`', '$', '(', ')', '<', '>', '"', '\'', '\\', '!', '@', '#', '%', '^', '*', '+', '=', '[', ']', '{', '}', '~', '?', ',',
];

/// Lowercase substrings rejected anywhere in the target.
const DENIED_PATTERNS: &[&str] = &["../", "..\\", "..", "%2e%2e", "%00", "<script", "javascript:", "data:", "file:"];

const LABEL: &str = r"[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?";
const OCTET: &str = r"(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)";

fn domain_body() -> String {
	format!(r"{LABEL}(?:\.{LABEL})*\.[a-zA-Z]{{2,}}")
}

fn ipv4_body() -> String {
	format!(r"(?:{OCTET}\.){{3}}{OCTET}")
}

static DOMAIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(&format!("^{}$", domain_body())).expect("domain regex should compile"));

static IPV4: LazyLock<Regex> = LazyLock::new(|| Regex::new(&format!("^{}$", ipv4_body())).expect("ipv4 regex should compile"));

static CIDR: LazyLock<Regex> =
	LazyLock::new(|| Regex::new(&format!(r"^{}/(?:3[0-2]|[12]?[0-9])$", ipv4_body())).expect("cidr regex should compile"));

static URL: LazyLock<Regex> = LazyLock::new(|| {
	Regex::new(&format!(r"^https?://{}(?::(?P<port>[0-9]{{1,5}}))?(?:/.*)?$", domain_body())).expect("url regex should compile")
});

/// Which grammar a target matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
	Domain,
	Ipv4,
	Cidr,
	Url,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTarget {
	#[error("target is empty")]
	Empty,
	#[error("target is {0} characters long (max {MAX_TARGET_LEN})")]
	TooLong(usize),
	#[error("target contains disallowed character {0:?}")]
	DeniedCharacter(char),
	#[error("target contains disallowed sequence {0:?}")]
	DeniedPattern(&'static str),
	#[error("target port is out of range")]
	PortOutOfRange,
	#[error("target is not a domain, IPv4 address, CIDR range or http(s) URL")]
	UnrecognizedFormat,
}

/// A target that passed validation and may be substituted into tool arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
	value: String,
	kind: TargetKind,
}

impl Target {
	pub fn parse(raw: &str) -> Result<Self, InvalidTarget> {
		let kind = classify(raw)?;
		Ok(Self { value: raw.to_string(), kind })
	}

	pub fn as_str(&self) -> &str {
		&self.value
	}

	pub fn kind(&self) -> TargetKind {
		self.kind
	}
}

impl fmt::Display for Target {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.value)
	}
}

/// Returns `true` when `target` is safe to hand to a tool.
pub fn validate(target: &str) -> bool {
	classify(target).is_ok()
}

fn classify(target: &str) -> Result<TargetKind, InvalidTarget> {
	if target.is_empty() {
		return Err(InvalidTarget::Empty);
	}

	let len = target.chars().count();
	if len > MAX_TARGET_LEN {
		return Err(InvalidTarget::TooLong(len));
	}

	if let Some(c) = target.chars().find(|c| c.is_control() || c.is_whitespace() || DENIED_CHARS.contains(c)) {
		return Err(InvalidTarget::DeniedCharacter(c));
	}

	let lowered = target.to_ascii_lowercase();
	if let Some(pattern) = DENIED_PATTERNS.iter().find(|p| lowered.contains(**p)) {
		return Err(InvalidTarget::DeniedPattern(pattern));
	}

	if DOMAIN.is_match(target) {
		return Ok(TargetKind::Domain);
	}
	if IPV4.is_match(target) {
		return Ok(TargetKind::Ipv4);
	}
	if CIDR.is_match(target) {
		return Ok(TargetKind::Cidr);
	}
	if let Some(caps) = URL.captures(target) {
		if let Some(port) = caps.name("port") {
			match port.as_str().parse::<u16>() {
				Ok(p) if p > 0 => {}
				_ => return Err(InvalidTarget::PortOutOfRange),
			}
		}
		return Ok(TargetKind::Url);
	}

	Err(InvalidTarget::UnrecognizedFormat)
}
