//! Explicit logger handle shared by every stage of a run.
//!
//! A [`Logger`] is bound to one [`LogDestination`]. Records are mirrored to the
//! local `tracing` subscriber and queued on a bounded channel that a single
//! background task drains into the sink. The single consumer keeps delivery
//! order equal to emission order, and the bounded queue makes a slow sink slow
//! down the producer instead of growing memory.
//!
//! Emitting never fails: delivery problems are counted in the
//! [`DeliveryReport`] and logged locally.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::sink::{LogDestination, LogLevel, LogRecord, LogSink, RecordOrigin};

mod delivery;

use delivery::DeliveryWorker;
pub use delivery::{MAX_BATCH_BYTES, MAX_BATCH_EVENTS, MAX_EVENT_BYTES, MAX_MESSAGE_BYTES};

/// Default number of records buffered between producers and the sink.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Running totals kept by the delivery task.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DeliveryReport {
    /// Records accepted by the sink.
    pub delivered: u64,
    /// Records dropped after the sink rejected their batch.
    pub dropped: u64,
    /// Successful append calls.
    pub batches: u64,
}

#[derive(Debug)]
enum Command {
    Record(LogRecord),
    Flush(oneshot::Sender<DeliveryReport>),
}

/// Cloneable handle used to emit diagnostics and forward workload lines.
#[derive(Clone, Debug)]
pub struct Logger {
    destination: Arc<LogDestination>,
    sender: mpsc::Sender<Command>,
}

impl Logger {
    /// Spawns the delivery task for `destination` and returns a handle bound
    /// to it. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn spawn<S: LogSink>(sink: Arc<S>, destination: LogDestination) -> Self {
        Self::with_capacity(sink, destination, DEFAULT_QUEUE_CAPACITY)
    }

    /// Same as [`Logger::spawn`] with an explicit queue capacity.
    #[must_use]
    pub fn with_capacity<S: LogSink>(
        sink: Arc<S>,
        destination: LogDestination,
        capacity: usize,
    ) -> Self {
        let destination = Arc::new(destination);
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let worker = DeliveryWorker::new(sink, Arc::clone(&destination), receiver);
        tokio::spawn(worker.run());
        Self {
            destination,
            sender,
        }
    }

    /// Destination this logger writes to.
    #[must_use]
    pub fn destination(&self) -> &LogDestination {
        &self.destination
    }

    /// Emits an informational diagnostic.
    pub async fn info(&self, message: impl Into<String>) {
        self.emit_record(LogRecord::now(
            LogLevel::Info,
            RecordOrigin::Diagnostic,
            message,
        ))
        .await;
    }

    /// Emits an error diagnostic.
    pub async fn error(&self, message: impl Into<String>) {
        self.emit_record(LogRecord::now(
            LogLevel::Error,
            RecordOrigin::Diagnostic,
            message,
        ))
        .await;
    }

    /// Forwards one line of workload output.
    pub async fn workload(&self, line: impl Into<String>) {
        self.emit_record(LogRecord::now(
            LogLevel::Info,
            RecordOrigin::Workload,
            line,
        ))
        .await;
    }

    /// Queues `record` for delivery, waiting for queue capacity.
    pub async fn emit_record(&self, record: LogRecord) {
        mirror(&self.destination, &record);
        if self.sender.send(Command::Record(record)).await.is_err() {
            warn!(
                group = %self.destination.group,
                stream = %self.destination.stream,
                "log delivery task has stopped; record not forwarded"
            );
        }
    }

    /// Waits until every record queued before this call has been handed to
    /// the sink and returns the running totals.
    ///
    /// Best effort: when the delivery task is gone, an empty report is
    /// returned.
    pub async fn flush(&self) -> DeliveryReport {
        let (ack, done) = oneshot::channel();
        if self.sender.send(Command::Flush(ack)).await.is_err() {
            return DeliveryReport::default();
        }
        done.await.unwrap_or_default()
    }
}

fn mirror(destination: &LogDestination, record: &LogRecord) {
    match (record.origin, record.level) {
        (RecordOrigin::Workload, _) => {
            info!(target: "dockwatch::workload", "{}", record.message);
        }
        (RecordOrigin::Diagnostic, LogLevel::Info) => {
            info!(stream = %destination.stream, "{}", record.message);
        }
        (RecordOrigin::Diagnostic, LogLevel::Warn) => {
            warn!(stream = %destination.stream, "{}", record.message);
        }
        (RecordOrigin::Diagnostic, LogLevel::Error) => {
            error!(stream = %destination.stream, "{}", record.message);
        }
    }
}
