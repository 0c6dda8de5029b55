//! AWS CloudWatch Logs sink.

use aws_sdk_cloudwatchlogs::Client;
use aws_sdk_cloudwatchlogs::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_cloudwatchlogs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cloudwatchlogs::types::InputLogEvent;
use tracing::warn;

use super::{LogDestination, LogRecord, LogSink, SinkError, SinkFuture};

const CREDENTIALS_PROVIDER_NAME: &str = "dockwatch";
const ALREADY_EXISTS_CODE: &str = "ResourceAlreadyExistsException";
const NOT_FOUND_CODE: &str = "ResourceNotFoundException";

/// Log sink writing to CloudWatch Logs with static credentials.
#[derive(Clone, Debug)]
pub struct CloudWatchSink {
    client: Client,
}

impl CloudWatchSink {
    /// Builds a client bound to the destination's region and credentials.
    #[must_use]
    pub fn new(destination: &LogDestination) -> Self {
        let credentials = Credentials::new(
            destination.credentials.access_key_id.clone(),
            destination.credentials.secret_access_key.clone(),
            destination.credentials.session_token.clone(),
            None,
            CREDENTIALS_PROVIDER_NAME,
        );
        let mut builder = aws_sdk_cloudwatchlogs::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(destination.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &destination.endpoint_url {
            builder = builder.endpoint_url(endpoint.clone());
        }
        Self {
            client: Client::from_conf(builder.build()),
        }
    }
}

impl LogSink for CloudWatchSink {
    fn create_log_group<'a>(&'a self, group: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .create_log_group()
                .log_group_name(group)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| translate(&err, &format!("log group {group}")))
        })
    }

    fn create_log_stream<'a>(&'a self, group: &'a str, stream: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            self.client
                .create_log_stream()
                .log_group_name(group)
                .log_stream_name(stream)
                .send()
                .await
                .map(|_| ())
                .map_err(|err| translate(&err, &format!("log stream {group}/{stream}")))
        })
    }

    fn put_log_events<'a>(
        &'a self,
        group: &'a str,
        stream: &'a str,
        records: Vec<LogRecord>,
    ) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let events = records
                .iter()
                .map(|record| {
                    InputLogEvent::builder()
                        .timestamp(record.timestamp_ms)
                        .message(record.render())
                        .build()
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|err| SinkError::Service {
                    code: String::from("InvalidLogEvent"),
                    message: err.to_string(),
                })?;

            let output = self
                .client
                .put_log_events()
                .log_group_name(group)
                .log_stream_name(stream)
                .set_log_events(Some(events))
                .send()
                .await
                .map_err(|err| translate(&err, &format!("log stream {group}/{stream}")))?;

            if let Some(rejected) = output.rejected_log_events_info() {
                warn!(group, stream, rejected = ?rejected, "sink rejected part of a batch");
            }
            Ok(())
        })
    }
}

fn translate<E, R>(err: &SdkError<E, R>, resource: &str) -> SinkError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    match err.as_service_error() {
        Some(service) => classify_service_error(service.code(), service.message(), resource),
        None => SinkError::Transport {
            message: DisplayErrorContext(err).to_string(),
        },
    }
}

/// Maps a CloudWatch Logs error code to a [`SinkError`].
///
/// This is the only place that interprets service error codes; the rest of
/// the crate matches on the typed variants.
#[must_use]
pub fn classify_service_error(
    code: Option<&str>,
    message: Option<&str>,
    resource: &str,
) -> SinkError {
    match code {
        Some(ALREADY_EXISTS_CODE) => SinkError::AlreadyExists {
            resource: resource.to_owned(),
        },
        Some(NOT_FOUND_CODE) => SinkError::NotFound {
            resource: resource.to_owned(),
        },
        other => SinkError::Service {
            code: other.unwrap_or("Unknown").to_owned(),
            message: message.unwrap_or("no message").to_owned(),
        },
    }
}
