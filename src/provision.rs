//! Idempotent provisioning of the remote log destination.
//!
//! Provisioning failures never abort a run: the group or stream may already
//! satisfy the need even when a create call is refused (for example when the
//! credentials may append but not create).

use std::sync::Arc;

use crate::logger::Logger;
use crate::sink::{LogDestination, LogSink, SinkError};

/// Result of one create-if-absent call.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StepOutcome {
    /// The resource was created by this call.
    Created,
    /// The resource already existed.
    AlreadyExisted,
    /// The create call failed for another reason.
    Failed(SinkError),
}

impl StepOutcome {
    fn from_result(result: Result<(), SinkError>) -> Self {
        match result {
            Ok(()) => Self::Created,
            Err(SinkError::AlreadyExists { .. }) => Self::AlreadyExisted,
            Err(err) => Self::Failed(err),
        }
    }
}

/// Outcome of provisioning a destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionOutcome {
    /// Log group creation outcome.
    pub group: StepOutcome,
    /// Log stream creation outcome.
    pub stream: StepOutcome,
}

/// Creates the log group and then the log stream, treating "already exists"
/// as success. Both calls are always attempted.
pub async fn create_if_absent<S>(sink: &S, destination: &LogDestination) -> ProvisionOutcome
where
    S: LogSink + ?Sized,
{
    let group = StepOutcome::from_result(sink.create_log_group(&destination.group).await);
    let stream = StepOutcome::from_result(
        sink.create_log_stream(&destination.group, &destination.stream)
            .await,
    );
    ProvisionOutcome { group, stream }
}

/// Ensures a log destination exists and hands out loggers bound to it.
#[derive(Debug)]
pub struct Provisioner<S> {
    sink: Arc<S>,
}

impl<S: LogSink> Provisioner<S> {
    /// Creates a provisioner backed by `sink`.
    #[must_use]
    pub const fn new(sink: Arc<S>) -> Self {
        Self { sink }
    }

    /// Provisions `destination` and returns a [`Logger`] bound to it.
    ///
    /// The group and stream are created before the logger starts delivering,
    /// so the provisioning diagnostics themselves land in the new stream.
    /// Calling this twice for the same destination is harmless.
    pub async fn ensure(&self, destination: &LogDestination) -> Logger {
        let outcome = create_if_absent(self.sink.as_ref(), destination).await;
        let logger = Logger::spawn(Arc::clone(&self.sink), destination.clone());

        report(&logger, "log group", &destination.group, &outcome.group).await;
        report(
            &logger,
            "log stream",
            &format!("{}/{}", destination.group, destination.stream),
            &outcome.stream,
        )
        .await;

        logger
    }
}

async fn report(logger: &Logger, kind: &str, name: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::Created => logger.info(format!("Created {kind} {name}")).await,
        StepOutcome::AlreadyExisted => logger.info(format!("Using existing {kind} {name}")).await,
        StepOutcome::Failed(err) => {
            logger
                .error(format!("Could not create {kind}: {err}"))
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::LogLevel;
    use crate::test_support::{RecordingSink, SAMPLE_GROUP, sample_destination};

    #[tokio::test]
    async fn ensure_creates_group_then_stream() {
        let sink = Arc::new(RecordingSink::new());
        let provisioner = Provisioner::new(Arc::clone(&sink));

        let logger = provisioner.ensure(&sample_destination()).await;
        logger.flush().await;

        assert_eq!(sink.create_group_calls(), 1);
        assert_eq!(sink.create_stream_calls(), 1);
        assert!(sink.diagnostics_at(LogLevel::Error).is_empty());
    }

    #[tokio::test]
    async fn ensure_twice_tolerates_existing_resources() {
        let sink = Arc::new(RecordingSink::new());
        let provisioner = Provisioner::new(Arc::clone(&sink));
        let destination = sample_destination();

        provisioner.ensure(&destination).await.flush().await;
        let second = provisioner.ensure(&destination).await;
        second.flush().await;

        assert!(sink.diagnostics_at(LogLevel::Error).is_empty());
        let infos = sink.diagnostics_at(LogLevel::Info);
        assert!(
            infos.iter().any(|msg| msg.contains("Using existing log group")),
            "infos: {infos:?}"
        );
        assert!(
            infos.iter().any(|msg| msg.contains("Using existing log stream")),
            "infos: {infos:?}"
        );
    }

    #[tokio::test]
    async fn other_failures_are_logged_and_not_fatal() {
        let sink = Arc::new(RecordingSink::new());
        sink.deny_group_creation();
        let provisioner = Provisioner::new(Arc::clone(&sink));

        let logger = provisioner.ensure(&sample_destination()).await;
        logger.workload("still delivered").await;
        logger.flush().await;

        let errors = sink.diagnostics_at(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors.iter().all(|msg| msg.starts_with("Could not create log group")));
        assert_eq!(sink.workload_lines(), vec![String::from("still delivered")]);
    }

    #[tokio::test]
    async fn create_if_absent_reports_each_step() {
        let sink = RecordingSink::new();
        sink.existing_group(SAMPLE_GROUP);

        let outcome = create_if_absent(&sink, &sample_destination()).await;

        assert_eq!(outcome.group, StepOutcome::AlreadyExisted);
        assert_eq!(outcome.stream, StepOutcome::Created);
    }
}
