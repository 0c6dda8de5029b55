//! Core library for the `dockwatch` container log forwarder.
//!
//! A run provisions a CloudWatch Logs group and stream, starts one container,
//! forwards every line of its output to that stream in order, and stops and
//! removes the container on every exit path. The container engine and the log
//! sink sit behind the [`ContainerEngine`] and [`LogSink`] traits so the run
//! sequence can be exercised without Docker or AWS.

pub mod config;
pub mod engine;
pub mod forward;
pub mod logger;
pub mod orchestrator;
pub mod provision;
pub mod runner;
pub mod sink;
pub mod test_support;
pub mod workload;

pub use config::{CONFIG_PATH_ENV, ConfigError, RunConfig, RunOverrides, RunSettings};
pub use engine::{
    ContainerEngine, ContainerHandle, DockerEngine, DockerEngineConfig, EngineError,
};
pub use forward::{LineSplitter, emit};
pub use logger::{DeliveryReport, Logger};
pub use orchestrator::RunOrchestrator;
pub use provision::{ProvisionOutcome, Provisioner, StepOutcome, create_if_absent};
pub use runner::{RunFailure, RunPhase, RunReport, TeardownOutcome, WorkloadRunner};
pub use sink::{
    CloudWatchSink, LogDestination, LogLevel, LogRecord, LogSink, RecordOrigin, SinkCredentials,
    SinkError,
};
pub use workload::{WorkloadCommand, WorkloadError, WorkloadSpec, WorkloadSpecBuilder};
