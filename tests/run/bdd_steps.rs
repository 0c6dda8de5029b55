//! BDD step definitions for the `dockwatch` run workflow.

use std::sync::Arc;

use dockwatch::test_support::{SAMPLE_GROUP, SAMPLE_STREAM};
use dockwatch::{EngineError, LogLevel, RunOrchestrator};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{RunContext, settings};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a reachable engine whose workload prints \"{lines}\"")]
fn workload_prints(run_context: RunContext, lines: String) -> RunContext {
    let lines: Vec<&str> = lines.split(',').map(str::trim).collect();
    run_context.engine.push_lines(&lines);
    run_context
}

#[given("an engine that rejects the image")]
fn engine_rejects_image(run_context: RunContext) -> RunContext {
    run_context.engine.fail_start(EngineError::ImageNotFound {
        image: String::from("does-not-exist"),
    });
    run_context
}

#[given("the workload fails after its output")]
fn workload_fails(run_context: RunContext) -> RunContext {
    run_context.engine.push_stream_error(EngineError::Workload {
        exit_code: Some(1),
        message: String::from("workload exited with status 1"),
    });
    run_context
}

#[given("a log destination that already exists")]
fn destination_exists(run_context: RunContext) -> RunContext {
    run_context.sink.existing_group(SAMPLE_GROUP);
    run_context.sink.existing_stream(SAMPLE_GROUP, SAMPLE_STREAM);
    run_context
}

#[given("the engine is already removing the container")]
fn engine_already_removing(run_context: RunContext) -> RunContext {
    run_context
        .engine
        .fail_remove(EngineError::RemovalInProgress {
            id: String::from("scripted-1"),
        });
    run_context
}

#[when("I run image \"{image}\" with command \"{command}\"")]
fn run_workload(
    run_context: RunContext,
    image: String,
    command: String,
) -> Result<RunContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator =
        RunOrchestrator::new(Arc::clone(&run_context.sink), run_context.engine.clone());
    let settings = settings(&image, &command);

    let report = runtime.block_on(async {
        orchestrator
            .execute_until(&settings, std::future::pending())
            .await
    });
    run_context.record(report);
    Ok(run_context)
}

#[then("the sink received the workload lines \"{lines}\"")]
fn sink_received_lines(run_context: &RunContext, lines: String) -> Result<(), StepError> {
    let expected: Vec<String> = lines.split(',').map(|line| line.trim().to_owned()).collect();
    let actual = run_context.sink.workload_lines();
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected workload lines {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the sink received no workload lines")]
fn sink_received_nothing(run_context: &RunContext) -> Result<(), StepError> {
    let actual = run_context.sink.workload_lines();
    if actual.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no workload lines, got {actual:?}"
        )))
    }
}

#[then("exactly one teardown was attempted")]
fn one_teardown(run_context: &RunContext) -> Result<(), StepError> {
    let stops = run_context.engine.stop_calls();
    let removes = run_context.engine.remove_calls();
    if stops == 1 && removes == 1 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected one stop and one remove, got {stops} and {removes}"
        )))
    }
}

#[then("no teardown was attempted")]
fn no_teardown(run_context: &RunContext) -> Result<(), StepError> {
    let stops = run_context.engine.stop_calls();
    let removes = run_context.engine.remove_calls();
    let report_teardown = run_context.report().and_then(|report| report.teardown);
    if stops == 0 && removes == 0 && report_teardown.is_none() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no teardown, got {stops} stops, {removes} removes, report {report_teardown:?}"
        )))
    }
}

#[then("no error diagnostics were logged")]
fn no_errors(run_context: &RunContext) -> Result<(), StepError> {
    let errors = run_context.sink.diagnostics_at(LogLevel::Error);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no error diagnostics, got {errors:?}"
        )))
    }
}

#[then("exactly {count:usize} error diagnostic was logged")]
fn error_count(run_context: &RunContext, count: usize) -> Result<(), StepError> {
    let errors = run_context.sink.diagnostics_at(LogLevel::Error);
    if errors.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} error diagnostics, got {errors:?}"
        )))
    }
}

#[then("an info diagnostic mentions \"{text}\"")]
fn info_mentions(run_context: &RunContext, text: String) -> Result<(), StepError> {
    let infos = run_context.sink.diagnostics_at(LogLevel::Info);
    if infos.iter().any(|message| message.contains(&text)) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected an info diagnostic containing '{text}', got {infos:?}"
        )))
    }
}
