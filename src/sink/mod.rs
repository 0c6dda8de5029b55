//! Remote log sink abstraction.
//!
//! A sink is an append-only destination identified by a log group and a log
//! stream. Creation calls are expected to be idempotent: callers treat
//! [`SinkError::AlreadyExists`] as success.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

mod cloudwatch;

pub use cloudwatch::{CloudWatchSink, classify_service_error};

/// Static credentials used to sign sink requests.
#[derive(Clone, Eq, PartialEq)]
pub struct SinkCredentials {
    /// Access key identifier.
    pub access_key_id: String,
    /// Secret access key.
    pub secret_access_key: String,
    /// Optional session token for temporary credentials.
    pub session_token: Option<String>,
}

impl fmt::Debug for SinkCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Identifies exactly one remote log stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogDestination {
    /// Log group name.
    pub group: String,
    /// Log stream name within the group.
    pub stream: String,
    /// Provider region, for example `eu-west-1`.
    pub region: String,
    /// Credentials used for every request.
    pub credentials: SinkCredentials,
    /// Optional endpoint override, used with local emulators.
    pub endpoint_url: Option<String>,
}

/// Severity attached to each record.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    /// Informational message.
    Info,
    /// Recoverable problem.
    Warn,
    /// Failure reported to operators.
    Error,
}

impl LogLevel {
    /// Upper-case label used when rendering diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a record came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RecordOrigin {
    /// A line produced by the workload container.
    Workload,
    /// An operational message emitted by this tool.
    Diagnostic,
}

/// One entry appended to the sink.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LogRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
    /// Record severity.
    pub level: LogLevel,
    /// Record origin.
    pub origin: RecordOrigin,
    /// Message text.
    pub message: String,
}

impl LogRecord {
    /// Creates a record stamped with the current wall-clock time.
    #[must_use]
    pub fn now(level: LogLevel, origin: RecordOrigin, message: impl Into<String>) -> Self {
        Self {
            timestamp_ms: now_millis(),
            level,
            origin,
            message: message.into(),
        }
    }

    /// Renders the text stored in the sink. Workload lines are stored
    /// verbatim; diagnostics carry their level so they can be told apart.
    #[must_use]
    pub fn render(&self) -> String {
        match self.origin {
            RecordOrigin::Workload => self.message.clone(),
            RecordOrigin::Diagnostic => format!("[{}] {}", self.level, self.message),
        }
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
}

/// Errors raised by log sinks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SinkError {
    /// Raised when a group or stream being created already exists.
    #[error("{resource} already exists")]
    AlreadyExists {
        /// Description of the resource, for example `log group app`.
        resource: String,
    },
    /// Raised when the target group or stream does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// Description of the missing resource.
        resource: String,
    },
    /// Raised when the service rejects a request.
    #[error("service error {code}: {message}")]
    Service {
        /// Service error code.
        code: String,
        /// Message returned by the service.
        message: String,
    },
    /// Raised when the request never produced a service response.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

/// Future returned by sink operations.
pub type SinkFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, SinkError>> + Send + 'a>>;

/// Minimal interface implemented by remote log sinks.
pub trait LogSink: Send + Sync + 'static {
    /// Creates the log group.
    fn create_log_group<'a>(&'a self, group: &'a str) -> SinkFuture<'a, ()>;

    /// Creates the log stream inside `group`.
    fn create_log_stream<'a>(&'a self, group: &'a str, stream: &'a str) -> SinkFuture<'a, ()>;

    /// Appends `records` to the stream, in order.
    fn put_log_events<'a>(
        &'a self,
        group: &'a str,
        stream: &'a str,
        records: Vec<LogRecord>,
    ) -> SinkFuture<'a, ()>;
}
