//! Configuration loading via `ortho-config`.
//!
//! [`RunConfig`] merges defaults, a configuration file and `DOCKWATCH_*`
//! environment variables. Explicit command-line values are layered on top
//! through [`RunOverrides`], so the overall precedence is
//! override > environment > file > default. Every field is optional while
//! loading; [`RunConfig::resolve`] reports the first required field that is
//! still missing.

use std::ffi::OsString;
use std::path::Path;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::sink::{LogDestination, SinkCredentials};
use crate::workload::{WorkloadCommand, WorkloadSpec};

/// Name of the environment variable that points at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "DOCKWATCH_CONFIG_PATH";

const CONFIG_FILE_NAME: &str = "dockwatch.toml";

/// Run settings derived from configuration files and environment variables.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "DOCKWATCH",
    discovery(
        app_name = "dockwatch",
        env_var = "DOCKWATCH_CONFIG_PATH",
        config_file_name = "dockwatch.toml",
        dotfile_name = ".dockwatch.toml",
        project_file_name = "dockwatch.toml"
    )
)]
pub struct RunConfig {
    /// Image to run, for example `alpine:3`.
    pub docker_image: Option<String>,
    /// Command line run in the container. It is split into arguments with
    /// shell quoting rules; no shell is started.
    pub bash_command: Option<String>,
    /// CloudWatch log group receiving the output.
    pub aws_cloudwatch_group: Option<String>,
    /// CloudWatch log stream receiving the output.
    pub aws_cloudwatch_stream: Option<String>,
    /// AWS access key identifier.
    pub aws_access_key_id: Option<String>,
    /// AWS secret access key.
    pub aws_secret_access_key: Option<String>,
    /// Optional AWS session token for temporary credentials.
    pub aws_session_token: Option<String>,
    /// AWS region hosting the log group.
    pub aws_region: Option<String>,
    /// Optional CloudWatch Logs endpoint, used with local emulators.
    pub aws_endpoint_url: Option<String>,
    /// Exit with the workload's status instead of 0.
    #[ortho_config(default = false)]
    pub propagate_exit_code: bool,
}

/// Explicit values supplied on the command line.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunOverrides {
    /// Overrides [`RunConfig::docker_image`].
    pub docker_image: Option<String>,
    /// Overrides [`RunConfig::bash_command`].
    pub bash_command: Option<String>,
    /// Overrides [`RunConfig::aws_cloudwatch_group`].
    pub aws_cloudwatch_group: Option<String>,
    /// Overrides [`RunConfig::aws_cloudwatch_stream`].
    pub aws_cloudwatch_stream: Option<String>,
    /// Overrides [`RunConfig::aws_access_key_id`].
    pub aws_access_key_id: Option<String>,
    /// Overrides [`RunConfig::aws_secret_access_key`].
    pub aws_secret_access_key: Option<String>,
    /// Overrides [`RunConfig::aws_region`].
    pub aws_region: Option<String>,
    /// Forces [`RunConfig::propagate_exit_code`] on when set.
    pub propagate_exit_code: bool,
}

/// Fully validated inputs for one run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunSettings {
    /// Workload to execute.
    pub spec: WorkloadSpec,
    /// Destination receiving the output.
    pub destination: LogDestination,
    /// Exit with the workload's status instead of 0.
    pub propagate_exit_code: bool,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    file_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, file_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            file_key,
        }
    }
}

const DOCKER_IMAGE: FieldMetadata =
    FieldMetadata::new("container image", "DOCKWATCH_DOCKER_IMAGE", "docker_image");
const BASH_COMMAND: FieldMetadata =
    FieldMetadata::new("workload command", "DOCKWATCH_BASH_COMMAND", "bash_command");
const LOG_GROUP: FieldMetadata = FieldMetadata::new(
    "CloudWatch log group",
    "DOCKWATCH_AWS_CLOUDWATCH_GROUP",
    "aws_cloudwatch_group",
);
const LOG_STREAM: FieldMetadata = FieldMetadata::new(
    "CloudWatch log stream",
    "DOCKWATCH_AWS_CLOUDWATCH_STREAM",
    "aws_cloudwatch_stream",
);
const ACCESS_KEY_ID: FieldMetadata = FieldMetadata::new(
    "AWS access key ID",
    "DOCKWATCH_AWS_ACCESS_KEY_ID",
    "aws_access_key_id",
);
const SECRET_ACCESS_KEY: FieldMetadata = FieldMetadata::new(
    "AWS secret access key",
    "DOCKWATCH_AWS_SECRET_ACCESS_KEY",
    "aws_secret_access_key",
);
const REGION: FieldMetadata = FieldMetadata::new("AWS region", "DOCKWATCH_AWS_REGION", "aws_region");

impl RunConfig {
    fn require_field<'a>(
        value: Option<&'a str>,
        metadata: &FieldMetadata,
    ) -> Result<&'a str, ConfigError> {
        match value.map(str::trim) {
            Some(present) if !present.is_empty() => Ok(present),
            _ => Err(ConfigError::MissingField(format!(
                "missing {}: pass --{}, set {} or add {} to {CONFIG_FILE_NAME}",
                metadata.description,
                metadata.file_key.replace('_', "-"),
                metadata.env_var,
                metadata.file_key
            ))),
        }
    }

    fn optional_field(value: Option<&str>) -> Option<String> {
        value
            .map(str::trim)
            .filter(|present| !present.is_empty())
            .map(str::to_owned)
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("dockwatch")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Loads configuration from `path` instead of the discovered files.
    /// Environment variables still override values from the file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when `path` cannot be read or the merge
    /// fails.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::load_from_iter([
            OsString::from("dockwatch"),
            OsString::from("--config-path"),
            path.as_os_str().to_owned(),
        ])
        .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Applies explicit command-line values on top of the loaded ones.
    #[must_use]
    pub fn with_overrides(mut self, overrides: RunOverrides) -> Self {
        let RunOverrides {
            docker_image,
            bash_command,
            aws_cloudwatch_group,
            aws_cloudwatch_stream,
            aws_access_key_id,
            aws_secret_access_key,
            aws_region,
            propagate_exit_code,
        } = overrides;

        self.docker_image = docker_image.or(self.docker_image);
        self.bash_command = bash_command.or(self.bash_command);
        self.aws_cloudwatch_group = aws_cloudwatch_group.or(self.aws_cloudwatch_group);
        self.aws_cloudwatch_stream = aws_cloudwatch_stream.or(self.aws_cloudwatch_stream);
        self.aws_access_key_id = aws_access_key_id.or(self.aws_access_key_id);
        self.aws_secret_access_key = aws_secret_access_key.or(self.aws_secret_access_key);
        self.aws_region = aws_region.or(self.aws_region);
        self.propagate_exit_code |= propagate_exit_code;
        self
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via flags, environment
    /// variables, or configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first required field
    /// that is missing or blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Validates the configuration and converts it into [`RunSettings`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is missing
    /// and [`ConfigError::Invalid`] when the workload is rejected.
    pub fn resolve(&self) -> Result<RunSettings, ConfigError> {
        let image = Self::require_field(self.docker_image.as_deref(), &DOCKER_IMAGE)?;
        let command = Self::require_field(self.bash_command.as_deref(), &BASH_COMMAND)?;
        let group = Self::require_field(self.aws_cloudwatch_group.as_deref(), &LOG_GROUP)?;
        let stream = Self::require_field(self.aws_cloudwatch_stream.as_deref(), &LOG_STREAM)?;
        let access_key_id =
            Self::require_field(self.aws_access_key_id.as_deref(), &ACCESS_KEY_ID)?;
        let secret_access_key =
            Self::require_field(self.aws_secret_access_key.as_deref(), &SECRET_ACCESS_KEY)?;
        let region = Self::require_field(self.aws_region.as_deref(), &REGION)?;

        let command = WorkloadCommand::from_command_line(command)
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        let spec = WorkloadSpec::builder()
            .image(image)
            .command(command)
            .build()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;

        Ok(RunSettings {
            spec,
            destination: LogDestination {
                group: group.to_owned(),
                stream: stream.to_owned(),
                region: region.to_owned(),
                credentials: SinkCredentials {
                    access_key_id: access_key_id.to_owned(),
                    secret_access_key: secret_access_key.to_owned(),
                    session_token: Self::optional_field(self.aws_session_token.as_deref()),
                },
                endpoint_url: Self::optional_field(self.aws_endpoint_url.as_deref()),
            },
            propagate_exit_code: self.propagate_exit_code,
        })
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a present value was rejected.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
