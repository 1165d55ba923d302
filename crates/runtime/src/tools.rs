//! Closed registry of executable tools.
//!
//! Only the variants of [`Tool`] can ever be executed. Request strings are
//! parsed into a variant at the boundary; anything else is rejected before a
//! path lookup happens.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

use crate::target::Target;

pub const TARGET_PLACEHOLDER: &str = "{target}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
	Subfinder,
	Nmap,
	Gobuster,
	Ffuf,
	Nuclei,
	Amass,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Tool \"{0}\" is not allowed")]
pub struct UnknownTool(pub String);

impl Tool {
	pub const ALL: [Tool; 6] = [Tool::Subfinder, Tool::Nmap, Tool::Gobuster, Tool::Ffuf, Tool::Nuclei, Tool::Amass];

	pub fn name(self) -> &'static str {
		self.spec().name
	}

	pub fn spec(self) -> &'static ToolSpec {
		match self {
			Tool::Subfinder => &SUBFINDER,
			Tool::Nmap => &NMAP,
			Tool::Gobuster => &GOBUSTER,
			Tool::Ffuf => &FFUF,
			Tool::Nuclei => &NUCLEI,
			Tool::Amass => &AMASS,
		}
	}

	pub fn names() -> Vec<String> {
		Self::ALL.iter().map(|t| t.name().to_string()).collect()
	}
}

impl FromStr for Tool {
	type Err = UnknownTool;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL.into_iter().find(|t| t.name() == s).ok_or_else(|| UnknownTool(s.to_string()))
	}
}

impl fmt::Display for Tool {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

/// Platform an install candidate is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
	Any,
	Unix,
	Windows,
}

impl Platform {
	pub fn matches_current(self) -> bool {
		match self {
			Platform::Any => true,
			Platform::Unix => cfg!(unix),
			Platform::Windows => cfg!(windows),
		}
	}
}

/// One installation method: an ordered list of argv vectors.
///
/// Steps run in order and the first non-zero exit aborts the candidate.
#[derive(Debug, Clone, Copy)]
pub struct InstallCandidate {
	pub platform: Platform,
	pub steps: &'static [&'static [&'static str]],
}

impl InstallCandidate {
	pub const fn any(steps: &'static [&'static [&'static str]]) -> Self {
		Self { platform: Platform::Any, steps }
	}

	pub const fn unix(steps: &'static [&'static [&'static str]]) -> Self {
		Self { platform: Platform::Unix, steps }
	}

	pub const fn windows(steps: &'static [&'static [&'static str]]) -> Self {
		Self { platform: Platform::Windows, steps }
	}
}

impl fmt::Display for InstallCandidate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let rendered: Vec<String> = self.steps.iter().map(|step| step.join(" ")).collect();
		f.write_str(&rendered.join(" && "))
	}
}

/// Immutable description of how to run and install one tool.
#[derive(Debug)]
pub struct ToolSpec {
	pub name: &'static str,
	pub executable: &'static str,
	pub args: &'static [&'static str],
	pub description: &'static str,
	pub install: &'static [InstallCandidate],
}

impl ToolSpec {
	/// Builds the argv for `target`, substituting the placeholder in each argument.
	pub fn command(&self, target: &Target) -> ToolCommand {
		ToolCommand {
			label: self.name.to_string(),
			program: PathBuf::from(self.executable),
			args: self.args.iter().map(|arg| arg.replace(TARGET_PLACEHOLDER, target.as_str())).collect(),
		}
	}

	/// Install candidates applicable to the running platform, in order.
	pub fn install_candidates(&self) -> impl Iterator<Item = &InstallCandidate> {
		self.install.iter().filter(|c| c.platform.matches_current())
	}
}

/// A fully resolved argv ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
	/// Name reported in user-facing messages.
	pub label: String,
	pub program: PathBuf,
	pub args: Vec<String>,
}

impl ToolCommand {
	pub fn with_program(mut self, program: PathBuf) -> Self {
		self.program = program;
		self
	}

	/// Space-joined rendering for the `start` event and logs. Never executed.
	pub fn display_line(&self) -> String {
		let mut line = self.program.display().to_string();
		for arg in &self.args {
			line.push(' ');
			line.push_str(arg);
		}
		line
	}
}

const WORDLIST: &str = "/usr/share/wordlists/common.txt";

static SUBFINDER: ToolSpec = ToolSpec {
	name: "subfinder",
	executable: "subfinder",
	args: &["-d", TARGET_PLACEHOLDER, "-silent"],
	description: "Fast passive subdomain discovery tool",
	install: &[
		InstallCandidate::windows(&[&["powershell", "-Command", "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest"]]),
		InstallCandidate::windows(&[&["cmd", "/c", "go install -v github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest"]]),
		InstallCandidate::any(&[&["go", "install", "-v", "github.com/projectdiscovery/subfinder/v2/cmd/subfinder@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/projectdiscovery/subfinder@latest"]]),
	],
};

static NMAP: ToolSpec = ToolSpec {
	name: "nmap",
	executable: "nmap",
	args: &["-sS", "-sV", "-O", "-p", "21,22,23,25,53,80,110,143,443,993,995,3306,3389,5432,8080,8443", TARGET_PLACEHOLDER],
	description: "Network discovery and port scanning",
	install: &[
		InstallCandidate::windows(&[&["choco", "install", "nmap", "-y"]]),
		InstallCandidate::windows(&[&["winget", "install", "Nmap.Nmap"]]),
		InstallCandidate::windows(&[&["scoop", "install", "nmap"]]),
		InstallCandidate::unix(&[&["apt", "update"], &["apt", "install", "-y", "nmap"]]),
		InstallCandidate::unix(&[&["yum", "install", "-y", "nmap"]]),
		InstallCandidate::unix(&[&["dnf", "install", "-y", "nmap"]]),
		InstallCandidate::unix(&[&["brew", "install", "nmap"]]),
	],
};

static GOBUSTER: ToolSpec = ToolSpec {
	name: "gobuster",
	executable: "gobuster",
	args: &["dir", "-u", TARGET_PLACEHOLDER, "-w", WORDLIST],
	description: "Directory and file brute-forcer",
	install: &[
		InstallCandidate::windows(&[&["powershell", "-Command", "go install github.com/OJ/gobuster/v3@latest"]]),
		InstallCandidate::windows(&[&["cmd", "/c", "go install github.com/OJ/gobuster/v3@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/OJ/gobuster/v3@latest"]]),
		InstallCandidate::unix(&[&["apt", "install", "-y", "gobuster"]]),
	],
};

static FFUF: ToolSpec = ToolSpec {
	name: "ffuf",
	executable: "ffuf",
	args: &["-u", "{target}/FUZZ", "-w", WORDLIST],
	description: "Fast web fuzzer",
	install: &[
		InstallCandidate::windows(&[&["powershell", "-Command", "go install github.com/ffuf/ffuf@latest"]]),
		InstallCandidate::windows(&[&["cmd", "/c", "go install github.com/ffuf/ffuf@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/ffuf/ffuf@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/ffuf/ffuf@v1.5.0"]]),
		InstallCandidate::unix(&[&["apt", "install", "-y", "ffuf"]]),
	],
};

static NUCLEI: ToolSpec = ToolSpec {
	name: "nuclei",
	executable: "nuclei",
	args: &["-u", TARGET_PLACEHOLDER, "-silent"],
	description: "Fast vulnerability scanner",
	install: &[
		InstallCandidate::windows(&[&["powershell", "-Command", "go install -v github.com/projectdiscovery/nuclei/v2/cmd/nuclei@latest"]]),
		InstallCandidate::windows(&[&["cmd", "/c", "go install -v github.com/projectdiscovery/nuclei/v2/cmd/nuclei@latest"]]),
		InstallCandidate::any(&[&["go", "install", "-v", "github.com/projectdiscovery/nuclei/v2/cmd/nuclei@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/projectdiscovery/nuclei@latest"]]),
	],
};

static AMASS: ToolSpec = ToolSpec {
	name: "amass",
	executable: "amass",
	args: &["enum", "-d", TARGET_PLACEHOLDER],
	description: "In-depth attack surface mapping",
	install: &[
		InstallCandidate::windows(&[&["powershell", "-Command", "go install -v github.com/owasp-amass/amass/v3/...@latest"]]),
		InstallCandidate::windows(&[&["cmd", "/c", "go install -v github.com/owasp-amass/amass/v3/...@latest"]]),
		InstallCandidate::any(&[&["go", "install", "-v", "github.com/owasp-amass/amass/v3/...@latest"]]),
		InstallCandidate::any(&[&["go", "install", "github.com/owasp-amass/amass@latest"]]),
	],
};
