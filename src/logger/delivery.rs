//! Background task that batches queued records into sink appends.

use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{Command, DeliveryReport};
use crate::provision::create_if_absent;
use crate::sink::{LogDestination, LogRecord, LogSink, SinkError};

/// Maximum number of events in one append call.
pub const MAX_BATCH_EVENTS: usize = 10_000;
/// Maximum payload of one append call, including per-event overhead.
pub const MAX_BATCH_BYTES: usize = 1_048_576;
/// Maximum size of a single event, including per-event overhead.
pub const MAX_EVENT_BYTES: usize = 262_144;
/// Bytes the sink charges per event on top of the message.
const EVENT_OVERHEAD_BYTES: usize = 26;
/// Longest workload line that fits in one event untruncated.
pub const MAX_MESSAGE_BYTES: usize = MAX_EVENT_BYTES - EVENT_OVERHEAD_BYTES;

#[derive(Debug, Default)]
struct Batch {
    records: Vec<LogRecord>,
    bytes: usize,
}

impl Batch {
    fn fits(&self, size: usize) -> bool {
        self.records.len() < MAX_BATCH_EVENTS && self.bytes + size <= MAX_BATCH_BYTES
    }

    fn push(&mut self, record: LogRecord, size: usize) {
        self.bytes += size;
        self.records.push(record);
    }

    fn take(&mut self) -> Vec<LogRecord> {
        self.bytes = 0;
        mem::take(&mut self.records)
    }
}

pub(super) struct DeliveryWorker<S> {
    sink: Arc<S>,
    destination: Arc<LogDestination>,
    receiver: mpsc::Receiver<Command>,
    pending: Batch,
    report: DeliveryReport,
    last_timestamp_ms: i64,
}

impl<S: LogSink> DeliveryWorker<S> {
    pub(super) fn new(
        sink: Arc<S>,
        destination: Arc<LogDestination>,
        receiver: mpsc::Receiver<Command>,
    ) -> Self {
        Self {
            sink,
            destination,
            receiver,
            pending: Batch::default(),
            report: DeliveryReport::default(),
            last_timestamp_ms: 0,
        }
    }

    /// Drains the queue until every [`super::Logger`] handle is dropped.
    /// Whatever is already queued when a record arrives joins the same batch.
    pub(super) async fn run(mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle(command).await;
            while let Ok(queued) = self.receiver.try_recv() {
                self.handle(queued).await;
            }
            self.deliver_pending().await;
        }
        self.deliver_pending().await;
        debug!(
            delivered = self.report.delivered,
            dropped = self.report.dropped,
            "log delivery finished"
        );
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Record(record) => {
                let prepared = self.prepare(record);
                let size = event_size(&prepared);
                if !self.pending.fits(size) {
                    self.deliver_pending().await;
                }
                self.pending.push(prepared, size);
            }
            Command::Flush(ack) => {
                self.deliver_pending().await;
                if ack.send(self.report).is_err() {
                    debug!("flush requester went away");
                }
            }
        }
    }

    /// Clamps timestamps so a batch is never out of chronological order and
    /// truncates messages the sink would reject as oversized.
    fn prepare(&mut self, mut record: LogRecord) -> LogRecord {
        record.timestamp_ms = record.timestamp_ms.max(self.last_timestamp_ms);
        self.last_timestamp_ms = record.timestamp_ms;

        let size = event_size(&record);
        if size > MAX_EVENT_BYTES {
            let keep = record.message.len().saturating_sub(size - MAX_EVENT_BYTES);
            truncate_at_char_boundary(&mut record.message, keep);
        }
        record
    }

    async fn deliver_pending(&mut self) {
        if self.pending.records.is_empty() {
            return;
        }
        let records = self.pending.take();
        let count = records.len() as u64;

        let result = match self.put(records.clone()).await {
            Err(SinkError::NotFound { resource }) => {
                warn!(%resource, "log destination disappeared; recreating it");
                create_if_absent(self.sink.as_ref(), &self.destination).await;
                self.put(records).await
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.report.delivered += count;
                self.report.batches += 1;
            }
            Err(err) => {
                self.report.dropped += count;
                warn!(
                    group = %self.destination.group,
                    stream = %self.destination.stream,
                    records = count,
                    error = %err,
                    "failed to deliver log batch"
                );
            }
        }
    }

    async fn put(&self, records: Vec<LogRecord>) -> Result<(), SinkError> {
        self.sink
            .put_log_events(&self.destination.group, &self.destination.stream, records)
            .await
    }
}

fn event_size(record: &LogRecord) -> usize {
    record.render().len() + EVENT_OVERHEAD_BYTES
}

fn truncate_at_char_boundary(message: &mut String, max_len: usize) {
    if message.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while cut > 0 && !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message.truncate(cut);
}
