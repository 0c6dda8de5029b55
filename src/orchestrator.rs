//! Top-level run sequence: provision the sink, run the workload, flush.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use crate::config::RunSettings;
use crate::engine::ContainerEngine;
use crate::provision::Provisioner;
use crate::runner::{RunReport, WorkloadRunner, shutdown_signal};
use crate::sink::LogSink;

/// Executes one run against a log sink and a container engine.
///
/// There are no retries at this level. Provisioning problems are logged and
/// tolerated, and the runner contains its own failures, so a run always
/// produces a [`RunReport`].
#[derive(Debug)]
pub struct RunOrchestrator<S, E> {
    provisioner: Provisioner<S>,
    runner: WorkloadRunner<E>,
}

impl<S, E> RunOrchestrator<S, E>
where
    S: LogSink,
    E: ContainerEngine,
{
    /// Creates a new orchestrator.
    #[must_use]
    pub const fn new(sink: Arc<S>, engine: E) -> Self {
        Self {
            provisioner: Provisioner::new(sink),
            runner: WorkloadRunner::new(engine),
        }
    }

    /// Runs the whole sequence, tearing the container down on SIGINT or
    /// SIGTERM.
    pub async fn execute(&self, settings: &RunSettings) -> RunReport {
        self.execute_until(settings, shutdown_signal()).await
    }

    /// Runs the whole sequence, ending streaming early when `interrupt`
    /// resolves.
    pub async fn execute_until<F>(&self, settings: &RunSettings, interrupt: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let logger = self.provisioner.ensure(&settings.destination).await;
        let mut report = self
            .runner
            .run_until(&settings.spec, &logger, interrupt)
            .await;
        report.delivery = logger.flush().await;
        info!(
            phase = ?report.phase,
            lines = report.lines_forwarded,
            delivered = report.delivery.delivered,
            dropped = report.delivery.dropped,
            "run finished"
        );
        report
    }
}
