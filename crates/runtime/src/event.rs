//! Job lifecycle events and the cancellation signal shared with job tasks.

use tokio::sync::{mpsc, watch};

/// Events produced while a job runs.
///
/// A job emits `Start`, then zero or more `Output`, then exactly one terminal
/// event (`Complete` or `Error`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
	Start { command: String },
	Output { line: String },
	Complete { return_code: i32, success: bool },
	Error { message: String },
}

impl JobEvent {
	pub fn output(line: impl Into<String>) -> Self {
		Self::Output { line: line.into() }
	}

	pub fn error(message: impl Into<String>) -> Self {
		Self::Error { message: message.into() }
	}

	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Complete { .. } | Self::Error { .. })
	}
}

/// Bounded channel the runtime emits into; a slow consumer back-pressures the runner.
pub type EventSender = mpsc::Sender<JobEvent>;

/// Sends an event, ignoring a consumer that has already gone away.
pub(crate) async fn emit(events: &EventSender, event: JobEvent) {
	let _ = events.send(event).await;
}

/// Owner side of a cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
	pub fn cancel(&self) {
		let _ = self.0.send(true);
	}
}

/// Observer side of a cancellation signal, cloned into every job of a session.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
	/// A signal that never fires.
	pub fn never() -> Self {
		let (_, rx) = watch::channel(false);
		Self(rx)
	}

	pub fn is_cancelled(&self) -> bool {
		*self.0.borrow()
	}

	/// Resolves once cancellation is requested; pends forever if the handle is
	/// dropped without cancelling.
	pub async fn cancelled(&mut self) {
		loop {
			if *self.0.borrow_and_update() {
				return;
			}
			if self.0.changed().await.is_err() {
				std::future::pending::<()>().await;
			}
		}
	}
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
	let (tx, rx) = watch::channel(false);
	(CancelHandle(tx), CancelSignal(rx))
}
