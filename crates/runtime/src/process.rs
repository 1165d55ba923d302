//! Process-group lifecycle helpers shared by the runner and installer.

use std::process::ExitStatus;

use tokio::process::Command;

/// Places the child in its own process group so a signal reaches everything it spawns.
pub fn isolate_process_group(cmd: &mut Command) {
	#[cfg(unix)]
	{
		cmd.process_group(0);
	}

	#[cfg(windows)]
	{
		const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
		cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
	}

	#[cfg(not(any(unix, windows)))]
	{
		let _ = cmd;
	}
}

/// Asks the process group led by `pid` to exit. Returns `false` when no signal was delivered.
pub fn terminate_group(pid: u32) -> bool {
	signal_group(pid, Signal::Terminate)
}

/// Forcibly kills the process group led by `pid`.
pub fn kill_group(pid: u32) -> bool {
	signal_group(pid, Signal::Kill)
}

/// Exit code of a finished child; signal deaths map to `-1`.
pub fn exit_code(status: ExitStatus) -> i32 {
	status.code().unwrap_or(-1)
}

#[derive(Debug, Clone, Copy)]
enum Signal {
	Terminate,
	Kill,
}

fn signal_group(pid: u32, signal: Signal) -> bool {
	#[cfg(unix)]
	{
		// pid 0 would address our own group.
		let Ok(pgid) = libc::pid_t::try_from(pid) else {
			return false;
		};
		if pgid <= 0 {
			return false;
		}

		let signo = match signal {
			Signal::Terminate => libc::SIGTERM,
			Signal::Kill => libc::SIGKILL,
		};
		// SAFETY: kill(2) with a negative pid only signals the process group; no memory is touched.
		unsafe { libc::kill(-pgid, signo) == 0 }
	}

	#[cfg(not(unix))]
	{
		let _ = (pid, signal);
		false
	}
}
