//! Event ordering of the full job pipeline against real subprocesses.
#![cfg(unix)]

use std::time::Duration;

use scout_runtime::{CancelSignal, InstallCandidate, JobEngine, JobEvent, JobOutcome, RunnerLimits, Target, ToolLocator, ToolSpec};
use scout_runtime::runner::RunOutcome;
use tokio::sync::mpsc;

static ECHO: ToolSpec = ToolSpec {
	name: "echo-scan",
	executable: "sh",
	args: &["-c", "echo scanning {target}; echo done >&2"],
	description: "prints its target",
	install: &[],
};

static FAILING: ToolSpec = ToolSpec {
	name: "failing-scan",
	executable: "sh",
	args: &["-c", "echo {target} unreachable; exit 2"],
	description: "exits non-zero",
	install: &[],
};

static MISSING: ToolSpec = ToolSpec {
	name: "missing-scan",
	executable: "scout-missing-scan-binary",
	args: &["{target}"],
	description: "never installed",
	install: &[InstallCandidate::any(&[&["false"]])],
};

fn engine() -> JobEngine {
	let limits = RunnerLimits {
		timeout: Duration::from_secs(10),
		read_tick: Duration::from_millis(50),
		exit_grace: Duration::from_millis(500),
		..RunnerLimits::default()
	};
	JobEngine::new(ToolLocator::default(), limits, Duration::from_secs(5))
}

async fn run(spec: &ToolSpec, target: &str) -> (JobOutcome, Vec<JobEvent>) {
	let target = Target::parse(target).expect("test target should be valid");
	let (tx, mut rx) = mpsc::channel(64);
	let outcome = engine().run(spec, &target, &tx, CancelSignal::never()).await;
	drop(tx);

	let mut events = Vec::new();
	while let Some(event) = rx.recv().await {
		events.push(event);
	}
	(outcome, events)
}

fn assert_lifecycle(events: &[JobEvent]) {
	assert!(matches!(events.first(), Some(JobEvent::Start { .. })), "first event must be start: {events:?}");
	let (last, middle) = events[1..].split_last().expect("a terminal event must follow start");
	assert!(last.is_terminal(), "last event must be terminal: {events:?}");
	assert!(
		middle.iter().all(|e| matches!(e, JobEvent::Output { .. })),
		"only output may sit between start and terminal: {events:?}"
	);
}

#[tokio::test]
async fn successful_job_streams_between_start_and_complete() {
	let (outcome, events) = run(&ECHO, "example.com").await;

	assert_eq!(outcome, JobOutcome::Finished(RunOutcome::Completed { return_code: 0 }));
	assert_lifecycle(&events);
	assert_eq!(
		events[0],
		JobEvent::Start {
			command: "sh -c echo scanning {target}; echo done >&2".replace("{target}", "example.com")
		}
	);
	assert!(events.contains(&JobEvent::output("scanning example.com")));
	assert!(events.contains(&JobEvent::output("done")));
	assert_eq!(
		events.last(),
		Some(&JobEvent::Complete {
			return_code: 0,
			success: true
		})
	);
}

#[tokio::test]
async fn non_zero_exit_completes_unsuccessfully() {
	let (outcome, events) = run(&FAILING, "10.0.0.0/24").await;

	assert_eq!(outcome, JobOutcome::Finished(RunOutcome::Completed { return_code: 2 }));
	assert_lifecycle(&events);
	assert!(events.contains(&JobEvent::output("10.0.0.0/24 unreachable")));
	assert_eq!(
		events.last(),
		Some(&JobEvent::Complete {
			return_code: 2,
			success: false
		})
	);
}

#[tokio::test]
async fn unavailable_tool_reports_install_progress_then_error() {
	let (outcome, events) = run(&MISSING, "example.com").await;

	assert_eq!(outcome, JobOutcome::Unavailable);
	assert_lifecycle(&events);
	assert!(events.iter().any(|e| matches!(e, JobEvent::Output { line } if line.starts_with("Method 1 failed"))));
	assert_eq!(
		events.last(),
		Some(&JobEvent::error(
			"Tool \"missing-scan\" not found and could not be installed. Please install it manually."
		))
	);
}
