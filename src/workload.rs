//! Workload description handed to the container engine.

use std::fmt;

use shell_escape::unix::escape;
use thiserror::Error;

/// Command executed inside the workload container.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WorkloadCommand {
    /// A shell snippet run through `sh -c`.
    Shell(String),
    /// An argument vector passed to the image entrypoint verbatim.
    Args(Vec<String>),
}

impl WorkloadCommand {
    /// Splits `line` into an argument vector with POSIX shell quoting rules.
    /// No shell runs inside the container, so operators such as `;` or `&&`
    /// are passed through as plain arguments.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::CommandLine`] when the quoting is unbalanced.
    pub fn from_command_line(line: &str) -> Result<Self, WorkloadError> {
        shlex::split(line)
            .map(Self::Args)
            .ok_or_else(|| WorkloadError::CommandLine(line.to_owned()))
    }

    /// Returns the argument vector the engine should place in the container
    /// `Cmd` field.
    #[must_use]
    pub fn to_argv(&self) -> Vec<String> {
        match self {
            Self::Shell(script) => vec![
                String::from("sh"),
                String::from("-c"),
                script.clone(),
            ],
            Self::Args(args) => args.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Shell(script) => script.trim().is_empty(),
            Self::Args(args) => args.iter().all(|arg| arg.trim().is_empty()),
        }
    }
}

impl fmt::Display for WorkloadCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(script) => f.write_str(script),
            Self::Args(args) => {
                let mut first = true;
                for arg in args {
                    if first {
                        first = false;
                    } else {
                        f.write_str(" ")?;
                    }
                    f.write_str(escape(arg.as_str().into()).as_ref())?;
                }
                Ok(())
            }
        }
    }
}

/// Immutable description of the single container to run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadSpec {
    /// Image reference, for example `alpine` or `docker.io/library/alpine:3`.
    pub image: String,
    /// Command to execute inside the container.
    pub command: WorkloadCommand,
}

impl WorkloadSpec {
    /// Starts a builder for a [`WorkloadSpec`].
    #[must_use]
    pub fn builder() -> WorkloadSpecBuilder {
        WorkloadSpecBuilder::new()
    }

    /// Validates the spec.
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Validation`] when the image or command is
    /// empty.
    pub fn validate(&self) -> Result<(), WorkloadError> {
        if self.image.is_empty() {
            return Err(WorkloadError::Validation("image".to_owned()));
        }
        if self.command.is_blank() {
            return Err(WorkloadError::Validation("command".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`WorkloadSpec`] that trims inputs and validates on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WorkloadSpecBuilder {
    image: String,
    command: Option<WorkloadCommand>,
}

impl WorkloadSpecBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the image reference.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the command.
    #[must_use]
    pub fn command(mut self, command: WorkloadCommand) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets a shell command run through `sh -c`.
    #[must_use]
    pub fn shell(mut self, script: impl Into<String>) -> Self {
        self.command = Some(WorkloadCommand::Shell(script.into()));
        self
    }

    /// Sets an argument vector passed to the image entrypoint.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(WorkloadCommand::Args(
            args.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Builds and validates the [`WorkloadSpec`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkloadError::Validation`] when the image or command is
    /// missing or blank.
    pub fn build(self) -> Result<WorkloadSpec, WorkloadError> {
        let command = match self.command {
            Some(WorkloadCommand::Shell(script)) => WorkloadCommand::Shell(script.trim().to_owned()),
            Some(WorkloadCommand::Args(args)) => WorkloadCommand::Args(args),
            None => return Err(WorkloadError::Validation("command".to_owned())),
        };
        let spec = WorkloadSpec {
            image: self.image.trim().to_owned(),
            command,
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// Errors raised while describing a workload.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WorkloadError {
    /// Raised when a required field is missing or blank.
    #[error("missing or empty workload field: {0}")]
    Validation(String),
    /// Raised when a command line cannot be split into arguments.
    #[error("unbalanced quoting in command line: {0}")]
    CommandLine(String),
}
