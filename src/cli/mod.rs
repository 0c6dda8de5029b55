//! Command-line interface definitions for the `dockwatch` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use std::path::PathBuf;

use clap::Parser;

/// Top-level CLI for the `dockwatch` binary.
///
/// Every value can also come from `DOCKWATCH_*` environment variables or a
/// configuration file; flags given here take precedence over both.
#[derive(Debug, Parser)]
#[command(
    name = "dockwatch",
    version,
    about = "Run a container and forward its output to CloudWatch Logs"
)]
pub(crate) struct Cli {
    /// Configuration file (TOML, JSON or YAML) to load instead of the
    /// discovered `dockwatch.toml`. A `config.json` in the working directory
    /// is only read when named here.
    #[arg(long, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    /// Image to run, for example `alpine:3`.
    #[arg(long, value_name = "IMAGE")]
    pub(crate) docker_image: Option<String>,
    /// Command line run in the container, split with shell quoting rules.
    /// Use `sh -c '...'` when shell operators are needed.
    #[arg(long, value_name = "COMMAND")]
    pub(crate) bash_command: Option<String>,
    /// CloudWatch log group receiving the output.
    #[arg(long, value_name = "GROUP")]
    pub(crate) aws_cloudwatch_group: Option<String>,
    /// CloudWatch log stream receiving the output.
    #[arg(long, value_name = "STREAM")]
    pub(crate) aws_cloudwatch_stream: Option<String>,
    /// AWS access key identifier.
    #[arg(long, value_name = "KEY_ID")]
    pub(crate) aws_access_key_id: Option<String>,
    /// AWS secret access key.
    #[arg(long, value_name = "SECRET")]
    pub(crate) aws_secret_access_key: Option<String>,
    /// AWS region hosting the log group.
    #[arg(long, value_name = "REGION")]
    pub(crate) aws_region: Option<String>,
    /// Exit with the workload's status instead of 0.
    #[arg(long)]
    pub(crate) propagate_exit_code: bool,
}
