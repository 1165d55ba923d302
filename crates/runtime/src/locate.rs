//! Executable discovery on `PATH` plus configured extra directories.

use std::path::PathBuf;

/// Resolves tool executables.
///
/// `go install` drops binaries in the Go bin directory, which is frequently
/// not on `PATH` for a desktop session; extra directories cover that case.
#[derive(Debug, Clone, Default)]
pub struct ToolLocator {
	extra_dirs: Vec<PathBuf>,
}

impl ToolLocator {
	pub fn new(extra_dirs: Vec<PathBuf>) -> Self {
		Self { extra_dirs }
	}

	/// Locator searching `PATH`, the Go bin directory, then `extra_dirs`.
	pub fn with_default_dirs(extra_dirs: impl IntoIterator<Item = PathBuf>) -> Self {
		let mut dirs: Vec<PathBuf> = go_bin_dir().into_iter().collect();
		for dir in extra_dirs {
			if !dirs.contains(&dir) {
				dirs.push(dir);
			}
		}
		Self::new(dirs)
	}

	pub fn extra_dirs(&self) -> &[PathBuf] {
		&self.extra_dirs
	}

	pub fn resolve(&self, executable: &str) -> Option<PathBuf> {
		if let Ok(path) = which::which(executable) {
			return Some(path);
		}

		if self.extra_dirs.is_empty() {
			return None;
		}

		let search = std::env::join_paths(&self.extra_dirs).ok()?;
		let cwd = std::env::current_dir().ok()?;
		which::which_in(executable, Some(search), cwd).ok()
	}

	pub fn is_available(&self, executable: &str) -> bool {
		self.resolve(executable).is_some()
	}
}

/// `$GOBIN`, else `$GOPATH/bin`, else `~/go/bin`.
pub fn go_bin_dir() -> Option<PathBuf> {
	if let Some(gobin) = std::env::var_os("GOBIN").filter(|v| !v.is_empty()) {
		return Some(PathBuf::from(gobin));
	}
	if let Some(gopath) = std::env::var_os("GOPATH").filter(|v| !v.is_empty()) {
		let first = std::env::split_paths(&gopath).next()?;
		return Some(first.join("bin"));
	}
	dirs::home_dir().map(|home| home.join("go").join("bin"))
}
