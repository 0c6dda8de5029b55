//! Shared fixtures for run BDD scenarios.

use std::sync::{Arc, Mutex, PoisonError};

use dockwatch::test_support::{RecordingSink, ScriptedEngine, sample_destination};
use dockwatch::{RunReport, RunSettings, WorkloadCommand, WorkloadSpec};
use rstest::fixture;

#[derive(Clone, Debug)]
pub struct RunContext {
    pub engine: ScriptedEngine,
    pub sink: Arc<RecordingSink>,
    pub outcome: Arc<Mutex<Option<RunReport>>>,
}

impl RunContext {
    pub fn record(&self, report: RunReport) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    pub fn report(&self) -> Option<RunReport> {
        self.outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[fixture]
pub fn run_context() -> RunContext {
    RunContext {
        engine: ScriptedEngine::new(),
        sink: Arc::new(RecordingSink::new()),
        outcome: Arc::new(Mutex::new(None)),
    }
}

pub fn settings(image: &str, command: &str) -> RunSettings {
    let command = WorkloadCommand::from_command_line(command)
        .unwrap_or_else(|err| panic!("scenario command should split: {err}"));
    RunSettings {
        spec: WorkloadSpec::builder()
            .image(image)
            .command(command)
            .build()
            .unwrap_or_else(|err| panic!("scenario workload should be valid: {err}")),
        destination: sample_destination(),
        propagate_exit_code: false,
    }
}
