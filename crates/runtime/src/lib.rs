//! Execution core of the scout agent.
//!
//! Everything between an admitted request and the events relayed back to the
//! requester lives here: target validation, the closed tool registry, binary
//! location, auto-installation, and the subprocess runner.

pub mod error;
pub mod event;
pub mod installer;
pub mod job;
pub mod locate;
pub mod process;
pub mod redact;
pub mod runner;
pub mod target;
pub mod tools;

pub use error::{Result, RuntimeError};
pub use event::{CancelHandle, CancelSignal, EventSender, JobEvent, cancel_pair};
pub use installer::Installer;
pub use job::{JobEngine, JobOutcome};
pub use locate::ToolLocator;
pub use runner::{ProcessRunner, RunnerLimits};
pub use target::{InvalidTarget, Target, TargetKind, validate};
pub use tools::{InstallCandidate, Platform, Tool, ToolCommand, ToolSpec, UnknownTool};
