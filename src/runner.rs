//! Runs one workload container and tears it down on every exit path.
//!
//! The runner walks `Idle → Starting → Streaming → Stopping → Done`, with
//! `Failed` reachable from `Starting` and `Streaming`. Once a
//! [`ContainerHandle`] exists, stop and remove are attempted exactly once
//! before [`WorkloadRunner::run_until`] returns, whether streaming finished,
//! returned an error, panicked, or was interrupted. No error crosses the
//! runner boundary; everything is reported through the [`Logger`] and the
//! returned [`RunReport`].

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::pin;

use futures::{FutureExt, StreamExt};
use tokio::signal;
use tracing::{debug, warn};

use crate::engine::{ContainerEngine, ContainerHandle, EngineError};
use crate::forward::{LineSplitter, emit};
use crate::logger::{DeliveryReport, Logger};
use crate::workload::WorkloadSpec;

const STOPPED_AND_REMOVED: &str = "Container stopped and removed.";
const ALREADY_REMOVING: &str = "Container is already in the process of being removed.";
const MAX_EXIT_STATUS: i64 = 255;

/// Lifecycle phase of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RunPhase {
    /// Nothing has happened yet.
    Idle,
    /// The container is being created and started.
    Starting,
    /// Output is being forwarded.
    Streaming,
    /// The container is being stopped and removed.
    Stopping,
    /// The run finished and the container was released.
    Done,
    /// The run failed to start or the workload failed.
    Failed,
}

/// Why a run ended in [`RunPhase::Failed`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RunFailure {
    /// The container could not be started.
    Start(EngineError),
    /// The workload ran but signalled failure.
    Workload {
        /// Exit status, when the engine reported one.
        exit_code: Option<i64>,
        /// Description of the failure.
        message: String,
    },
    /// Streaming failed for another reason, including a panic.
    Unexpected(String),
}

/// How teardown ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TeardownOutcome {
    /// Stop and remove both succeeded.
    Removed,
    /// The engine was already removing the container, or it was gone.
    AlreadyRemoving,
    /// Stop or remove failed; the first failure is kept.
    Failed(EngineError),
}

/// Summary of one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunReport {
    /// Terminal phase.
    pub phase: RunPhase,
    /// Workload lines handed to the logger.
    pub lines_forwarded: u64,
    /// Workload exit status, when it was observed.
    pub exit_code: Option<i64>,
    /// Failure that moved the run to [`RunPhase::Failed`].
    pub failure: Option<RunFailure>,
    /// Teardown result; `None` when no container was started.
    pub teardown: Option<TeardownOutcome>,
    /// `true` when an interruption ended streaming.
    pub interrupted: bool,
    /// Log delivery totals, filled in once the logger is flushed.
    pub delivery: DeliveryReport,
}

impl RunReport {
    const fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            lines_forwarded: 0,
            exit_code: None,
            failure: None,
            teardown: None,
            interrupted: false,
            delivery: DeliveryReport {
                delivered: 0,
                dropped: 0,
                batches: 0,
            },
        }
    }

    /// Process exit status for this run.
    ///
    /// Always 0 unless `propagate` is set, in which case the workload's exit
    /// status is returned, or 1 when the run failed without one. Non-zero
    /// statuses are clamped to `1..=255` so they survive the process exit.
    #[must_use]
    pub fn exit_status(&self, propagate: bool) -> i32 {
        if !propagate {
            return 0;
        }
        match (self.exit_code, &self.failure) {
            (Some(0), _) | (None, None) => 0,
            (Some(code), _) => i32::try_from(code.clamp(1, MAX_EXIT_STATUS)).unwrap_or(1),
            (None, Some(_)) => 1,
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        debug!(from = ?self.phase, to = ?phase, "run phase changed");
        self.phase = phase;
    }
}

enum StreamEnd {
    Finished(Result<i64, EngineError>),
    Panicked(String),
    Interrupted,
}

/// Drives a single workload through a [`ContainerEngine`].
#[derive(Debug)]
pub struct WorkloadRunner<E> {
    engine: E,
}

impl<E: ContainerEngine> WorkloadRunner<E> {
    /// Creates a runner backed by `engine`.
    #[must_use]
    pub const fn new(engine: E) -> Self {
        Self { engine }
    }

    /// Runs `spec` until its output ends or the process receives SIGINT or
    /// SIGTERM.
    pub async fn run(&self, spec: &WorkloadSpec, logger: &Logger) -> RunReport {
        self.run_until(spec, logger, shutdown_signal()).await
    }

    /// Runs `spec`, ending streaming early when `interrupt` resolves.
    ///
    /// `interrupt` is polled from the moment the run begins. When it resolves
    /// while the container is starting, the start is allowed to finish and
    /// the container goes straight to teardown.
    pub async fn run_until<F>(&self, spec: &WorkloadSpec, logger: &Logger, interrupt: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let mut report = RunReport::new();
        let mut interrupt = pin!(interrupt);

        report.enter(RunPhase::Starting);
        let mut start = self.engine.start(spec);
        let (started, interrupted) = tokio::select! {
            biased;
            () = interrupt.as_mut() => (start.await, true),
            started = &mut start => (started, false),
        };
        report.interrupted = interrupted;
        let handle = match started {
            Ok(handle) => handle,
            Err(err) => {
                logger.error(format!("Error running container: {err}")).await;
                report.failure = Some(RunFailure::Start(err));
                report.enter(RunPhase::Failed);
                return report;
            }
        };
        logger
            .info(format!("Started container with command: {}", spec.command))
            .await;

        let end = if interrupted {
            StreamEnd::Interrupted
        } else {
            report.enter(RunPhase::Streaming);
            let mut splitter = LineSplitter::new();
            let end = {
                let body = AssertUnwindSafe(self.stream(
                    &handle,
                    logger,
                    &mut splitter,
                    &mut report.lines_forwarded,
                ))
                .catch_unwind();
                tokio::select! {
                    biased;
                    () = interrupt.as_mut() => StreamEnd::Interrupted,
                    outcome = body => match outcome {
                        Ok(result) => StreamEnd::Finished(result),
                        Err(payload) => StreamEnd::Panicked(panic_message(payload.as_ref())),
                    },
                }
            };
            if let Some(line) = splitter.finish() {
                emit(logger, line).await;
                report.lines_forwarded += 1;
            }
            end
        };
        record_stream_end(end, &mut report, logger).await;

        report.enter(RunPhase::Stopping);
        report.teardown = Some(self.teardown(handle, logger).await);
        report.enter(if report.failure.is_some() {
            RunPhase::Failed
        } else {
            RunPhase::Done
        });
        report
    }

    /// Forwards complete lines until the output closes, then waits for the
    /// exit status. An unterminated fragment stays in `splitter`.
    async fn stream(
        &self,
        handle: &ContainerHandle,
        logger: &Logger,
        splitter: &mut LineSplitter,
        lines_forwarded: &mut u64,
    ) -> Result<i64, EngineError> {
        let mut output = self.engine.output(handle);
        while let Some(chunk) = output.next().await {
            for line in splitter.push(&chunk?) {
                emit(logger, line).await;
                *lines_forwarded += 1;
            }
        }
        self.engine.wait(handle).await
    }

    async fn teardown(&self, handle: ContainerHandle, logger: &Logger) -> TeardownOutcome {
        let stop_error = match self.engine.stop(&handle).await {
            Ok(()) => None,
            Err(err) if err.is_teardown_conflict() => {
                debug!(container = %handle.id, error = %err, "container already going away");
                logger.info(ALREADY_REMOVING).await;
                return TeardownOutcome::AlreadyRemoving;
            }
            Err(err) => {
                logger
                    .error(format!("Error stopping/removing container: {err}"))
                    .await;
                Some(err)
            }
        };

        match (self.engine.remove(handle).await, stop_error) {
            (Ok(()), None) => {
                logger.info(STOPPED_AND_REMOVED).await;
                TeardownOutcome::Removed
            }
            (Ok(()), Some(err)) => TeardownOutcome::Failed(err),
            (Err(err), stop_error) if err.is_teardown_conflict() => {
                logger.info(ALREADY_REMOVING).await;
                stop_error.map_or(TeardownOutcome::AlreadyRemoving, TeardownOutcome::Failed)
            }
            (Err(err), stop_error) => {
                logger
                    .error(format!("Error stopping/removing container: {err}"))
                    .await;
                TeardownOutcome::Failed(stop_error.unwrap_or(err))
            }
        }
    }
}

async fn record_stream_end(end: StreamEnd, report: &mut RunReport, logger: &Logger) {
    match end {
        StreamEnd::Finished(Ok(0)) => report.exit_code = Some(0),
        StreamEnd::Finished(Ok(code)) => {
            let message = format!("container exited with status {code}");
            logger.error(format!("Error running container: {message}")).await;
            report.exit_code = Some(code);
            report.failure = Some(RunFailure::Workload {
                exit_code: Some(code),
                message,
            });
        }
        StreamEnd::Finished(Err(EngineError::Workload { exit_code, message })) => {
            logger.error(format!("Error running container: {message}")).await;
            report.exit_code = exit_code;
            report.failure = Some(RunFailure::Workload { exit_code, message });
        }
        StreamEnd::Finished(Err(err)) => {
            logger.error(format!("Unexpected error: {err}")).await;
            report.failure = Some(RunFailure::Unexpected(err.to_string()));
        }
        StreamEnd::Panicked(message) => {
            let message = format!("output forwarding panicked: {message}");
            logger.error(format!("Unexpected error: {message}")).await;
            report.failure = Some(RunFailure::Unexpected(message));
        }
        StreamEnd::Interrupted => {
            logger.info("Interrupted; stopping container.").await;
            report.interrupted = true;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|msg| (*msg).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic"))
}

/// Resolves on Ctrl+C, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::sink::LogLevel;
    use crate::test_support::{
        EngineCall, RecordingSink, ScriptedEngine, StreamEnding, sample_destination, sample_spec,
    };
    use rstest::{fixture, rstest};

    struct Harness {
        engine: ScriptedEngine,
        sink: Arc<RecordingSink>,
    }

    impl Harness {
        async fn run(&self) -> RunReport {
            self.run_until(std::future::pending()).await
        }

        async fn run_until(&self, interrupt: impl Future<Output = ()>) -> RunReport {
            let logger = Logger::spawn(Arc::clone(&self.sink), sample_destination());
            let runner = WorkloadRunner::new(self.engine.clone());
            let report = runner.run_until(&sample_spec(), &logger, interrupt).await;
            logger.flush().await;
            report
        }
    }

    #[fixture]
    fn harness() -> Harness {
        Harness {
            engine: ScriptedEngine::new(),
            sink: Arc::new(RecordingSink::new()),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn successful_run_tears_down_once_after_last_line(harness: Harness) {
        harness.engine.push_lines(&["one", "two", "three"]);

        let report = harness.run().await;

        assert_eq!(report.phase, RunPhase::Done);
        assert_eq!(report.lines_forwarded, 3);
        assert_eq!(report.teardown, Some(TeardownOutcome::Removed));
        assert_eq!(
            harness.engine.journal(),
            vec![
                EngineCall::Start,
                EngineCall::Chunk,
                EngineCall::Chunk,
                EngineCall::Chunk,
                EngineCall::Wait,
                EngineCall::Stop,
                EngineCall::Remove,
            ]
        );
        assert_eq!(harness.sink.workload_lines(), vec!["one", "two", "three"]);
        assert_eq!(harness.engine.started(), vec![sample_spec()]);
        let infos = harness.sink.diagnostics_at(LogLevel::Info);
        assert_eq!(
            infos,
            vec![
                String::from("Started container with command: echo hello"),
                String::from(STOPPED_AND_REMOVED),
            ]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn start_failure_skips_teardown(harness: Harness) {
        harness.engine.fail_start(EngineError::ImageNotFound {
            image: String::from("alpine"),
        });

        let report = harness.run().await;

        assert_eq!(report.phase, RunPhase::Failed);
        assert!(matches!(report.failure, Some(RunFailure::Start(_))));
        assert_eq!(report.teardown, None);
        assert_eq!(harness.engine.stop_calls(), 0);
        assert_eq!(harness.engine.remove_calls(), 0);
        assert!(harness.sink.workload_lines().is_empty());
        assert_eq!(
            harness.sink.diagnostics_at(LogLevel::Error),
            vec![String::from("Error running container: image alpine not found")]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn non_zero_exit_is_a_workload_failure(harness: Harness) {
        harness.engine.push_lines(&["partial"]);
        harness.engine.exit_with(3);

        let report = harness.run().await;

        assert_eq!(report.phase, RunPhase::Failed);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.teardown, Some(TeardownOutcome::Removed));
        assert_eq!(
            harness.sink.diagnostics_at(LogLevel::Error),
            vec![String::from(
                "Error running container: container exited with status 3"
            )]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn unexpected_stream_errors_still_tear_down(harness: Harness) {
        harness.engine.push_lines(&["before"]);
        harness.engine.push_stream_error(EngineError::Stream {
            message: String::from("connection reset"),
        });

        let report = harness.run().await;

        assert!(matches!(report.failure, Some(RunFailure::Unexpected(_))));
        assert_eq!(harness.engine.stop_calls(), 1);
        assert_eq!(harness.engine.remove_calls(), 1);
        let errors = harness.sink.diagnostics_at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|msg| msg.starts_with("Unexpected error:")));
    }

    #[rstest]
    #[tokio::test]
    async fn panics_while_streaming_still_tear_down(harness: Harness) {
        harness.engine.push_lines(&["before"]);
        harness.engine.end_stream_with(StreamEnding::Panic);

        let report = harness.run().await;

        assert_eq!(report.phase, RunPhase::Failed);
        assert!(
            matches!(&report.failure, Some(RunFailure::Unexpected(msg)) if msg.contains("scripted output stream panicked")),
            "failure: {:?}",
            report.failure
        );
        assert_eq!(harness.engine.stop_calls(), 1);
        assert_eq!(harness.engine.remove_calls(), 1);
        assert_eq!(harness.sink.workload_lines(), vec!["before"]);
    }

    #[rstest]
    #[tokio::test]
    async fn interruption_tears_down_exactly_once(harness: Harness) {
        harness.engine.push_lines(&["tick"]);
        harness.engine.end_stream_with(StreamEnding::Hang);

        let report = harness
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.phase, RunPhase::Done);
        assert_eq!(harness.engine.stop_calls(), 1);
        assert_eq!(harness.engine.remove_calls(), 1);
        assert_eq!(harness.sink.workload_lines(), vec!["tick"]);
    }

    #[rstest]
    #[tokio::test]
    async fn trailing_fragment_survives_a_stream_error(harness: Harness) {
        harness.engine.push_chunk(b"first\nsecond-no-newline");
        harness.engine.push_stream_error(EngineError::Stream {
            message: String::from("connection reset"),
        });

        let report = harness.run().await;

        assert_eq!(report.lines_forwarded, 2);
        assert_eq!(
            harness.sink.workload_lines(),
            vec!["first", "second-no-newline"]
        );
        assert!(matches!(report.failure, Some(RunFailure::Unexpected(_))));
    }

    #[rstest]
    #[tokio::test]
    async fn trailing_fragment_survives_an_interruption(harness: Harness) {
        harness.engine.push_chunk(b"tick\npartial");
        harness.engine.end_stream_with(StreamEnding::Hang);

        let report = harness
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.lines_forwarded, 2);
        assert_eq!(harness.sink.workload_lines(), vec!["tick", "partial"]);
    }

    #[rstest]
    #[tokio::test]
    async fn interruption_while_starting_goes_straight_to_teardown(harness: Harness) {
        harness.engine.delay_start(Duration::from_millis(200));
        harness.engine.push_lines(&["never streamed"]);

        let report = harness
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.phase, RunPhase::Done);
        assert_eq!(report.teardown, Some(TeardownOutcome::Removed));
        assert_eq!(
            harness.engine.journal(),
            vec![EngineCall::Start, EngineCall::Stop, EngineCall::Remove]
        );
        assert!(harness.sink.workload_lines().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn interruption_during_a_failed_start_skips_teardown(harness: Harness) {
        harness.engine.delay_start(Duration::from_millis(100));
        harness.engine.fail_start(EngineError::ImageNotFound {
            image: String::from("alpine"),
        });

        let report = harness
            .run_until(tokio::time::sleep(Duration::from_millis(10)))
            .await;

        assert!(report.interrupted);
        assert_eq!(report.phase, RunPhase::Failed);
        assert_eq!(report.teardown, None);
        assert_eq!(harness.engine.stop_calls(), 0);
    }

    #[rstest]
    #[case(EngineError::RemovalInProgress { id: String::from("scripted-1") })]
    #[case(EngineError::NotFound { id: String::from("scripted-1") })]
    #[tokio::test]
    async fn removal_race_is_informational(harness: Harness, #[case] conflict: EngineError) {
        harness.engine.fail_remove(conflict);

        let report = harness.run().await;

        assert_eq!(report.phase, RunPhase::Done);
        assert_eq!(report.teardown, Some(TeardownOutcome::AlreadyRemoving));
        assert!(harness.sink.diagnostics_at(LogLevel::Error).is_empty());
        assert!(
            harness
                .sink
                .diagnostics_at(LogLevel::Info)
                .contains(&String::from(ALREADY_REMOVING))
        );
    }

    #[rstest]
    #[tokio::test]
    async fn stop_conflict_skips_remove(harness: Harness) {
        harness.engine.fail_stop(EngineError::NotFound {
            id: String::from("scripted-1"),
        });

        let report = harness.run().await;

        assert_eq!(report.teardown, Some(TeardownOutcome::AlreadyRemoving));
        assert_eq!(harness.engine.stop_calls(), 1);
        assert_eq!(harness.engine.remove_calls(), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn stop_failure_still_attempts_remove(harness: Harness) {
        let failure = EngineError::Api {
            message: String::from("daemon busy"),
        };
        harness.engine.fail_stop(failure.clone());

        let report = harness.run().await;

        assert_eq!(report.teardown, Some(TeardownOutcome::Failed(failure)));
        assert_eq!(harness.engine.remove_calls(), 1);
        assert_eq!(
            harness.sink.diagnostics_at(LogLevel::Error),
            vec![String::from(
                "Error stopping/removing container: engine error: daemon busy"
            )]
        );
    }

    #[rstest]
    #[case(false, Some(3), false, 0)]
    #[case(true, Some(3), true, 3)]
    #[case(true, Some(0), false, 0)]
    #[case(true, None, true, 1)]
    #[case(true, None, false, 0)]
    #[case(true, Some(256), true, 255)]
    #[case(true, Some(i64::MAX), true, 255)]
    #[case(true, Some(-1), true, 1)]
    fn exit_status_is_opt_in(
        #[case] propagate: bool,
        #[case] exit_code: Option<i64>,
        #[case] failed: bool,
        #[case] expected: i32,
    ) {
        let mut report = RunReport::new();
        report.exit_code = exit_code;
        report.failure = failed.then(|| RunFailure::Unexpected(String::from("boom")));

        assert_eq!(report.exit_status(propagate), expected);
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
