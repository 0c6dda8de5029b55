//! Binary entry point for the `dockwatch` CLI.

use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dockwatch::{
    CloudWatchSink, ConfigError, DockerEngine, DockerEngineConfig, EngineError,
    RunConfig, RunOrchestrator, RunOverrides, RunSettings,
};

mod cli;

use cli::Cli;

const DEFAULT_LOG_FILTER: &str = "dockwatch=info";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to connect to the container engine: {0}")]
    Engine(#[from] EngineError),
}

impl CliError {
    const fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Engine(_) => 1,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let config = match &cli.config {
        Some(path) => RunConfig::load_from_path(path)?,
        None => RunConfig::load_without_cli_args()?,
    };
    let settings = config.with_overrides(overrides_from(cli)).resolve()?;
    execute(settings).await
}

async fn execute(settings: RunSettings) -> Result<i32, CliError> {
    let sink = Arc::new(CloudWatchSink::new(&settings.destination));
    let engine = DockerEngine::connect(DockerEngineConfig::default())?;
    let orchestrator = RunOrchestrator::new(sink, engine);

    let report = orchestrator.execute(&settings).await;
    Ok(report.exit_status(settings.propagate_exit_code))
}

fn overrides_from(cli: Cli) -> RunOverrides {
    RunOverrides {
        docker_image: cli.docker_image,
        bash_command: cli.bash_command,
        aws_cloudwatch_group: cli.aws_cloudwatch_group,
        aws_cloudwatch_stream: cli.aws_cloudwatch_stream,
        aws_access_key_id: cli.aws_access_key_id,
        aws_secret_access_key: cli.aws_secret_access_key,
        aws_region: cli.aws_region,
        propagate_exit_code: cli.propagate_exit_code,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn flags_become_overrides() {
        let cli = Cli::parse_from([
            "dockwatch",
            "--docker-image",
            "busybox",
            "--bash-command",
            "echo hi",
            "--propagate-exit-code",
            "--config",
            "config.json",
        ]);

        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("config.json")));
        let overrides = overrides_from(cli);

        assert_eq!(overrides.docker_image.as_deref(), Some("busybox"));
        assert_eq!(overrides.bash_command.as_deref(), Some("echo hi"));
        assert_eq!(overrides.aws_region, None);
        assert!(overrides.propagate_exit_code);
    }

    #[rstest]
    #[case(CliError::Config(ConfigError::MissingField(String::from("x"))), 2)]
    #[case(CliError::Engine(EngineError::Api { message: String::from("x") }), 1)]
    fn errors_map_to_exit_codes(#[case] err: CliError, #[case] expected: i32) {
        assert_eq!(err.exit_code(), expected);
    }

    #[test]
    fn write_error_writes_cli_error() {
        let mut buf = Vec::new();
        let err = CliError::Config(ConfigError::MissingField(String::from(
            "missing AWS region",
        )));
        write_error(&mut buf, &err);
        let rendered = String::from_utf8(buf).expect("utf8");
        assert!(
            rendered.contains("missing configuration field: missing AWS region"),
            "rendered: {rendered}"
        );
    }
}
