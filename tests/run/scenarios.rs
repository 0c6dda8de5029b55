//! BDD scenarios for the run workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{RunContext, run_context};

#[scenario(
    path = "tests/features/run.feature",
    name = "Forward a single line and tear down once"
)]
fn scenario_forward_single_line(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Reject an unknown image without teardown"
)]
fn scenario_reject_unknown_image(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Runtime error after two lines still tears down"
)]
fn scenario_runtime_error_mid_stream(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Existing log destination is reused"
)]
fn scenario_existing_destination(run_context: RunContext) {
    let _ = run_context;
}

#[scenario(
    path = "tests/features/run.feature",
    name = "Removal race is reported as informational"
)]
fn scenario_removal_race(run_context: RunContext) {
    let _ = run_context;
}
