//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, HashSet};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use tokio::sync::{Mutex, MutexGuard};

use crate::engine::{
    ContainerEngine, ContainerHandle, EngineError, EngineFuture, OutputStream,
};
use crate::sink::{
    LogDestination, LogLevel, LogRecord, LogSink, RecordOrigin, SinkCredentials, SinkError,
    SinkFuture,
};
use crate::workload::WorkloadSpec;

/// Log group used by [`sample_destination`].
pub const SAMPLE_GROUP: &str = "dockwatch-tests";
/// Log stream used by [`sample_destination`].
pub const SAMPLE_STREAM: &str = "run-1";

/// Returns a destination pointing at the recording sink's sample stream.
#[must_use]
pub fn sample_destination() -> LogDestination {
    LogDestination {
        group: String::from(SAMPLE_GROUP),
        stream: String::from(SAMPLE_STREAM),
        region: String::from("eu-west-1"),
        credentials: SinkCredentials {
            access_key_id: String::from("AKIDTEST"),
            secret_access_key: String::from("test-secret"),
            session_token: None,
        },
        endpoint_url: None,
    }
}

/// Returns the `alpine` / `echo hello` workload.
///
/// # Panics
///
/// Never in practice; the literal workload always validates.
#[must_use]
pub fn sample_spec() -> WorkloadSpec {
    WorkloadSpec::builder()
        .image("alpine")
        .shell("echo hello")
        .build()
        .unwrap_or_else(|err| panic!("sample spec is valid: {err}"))
}

fn lock<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct SinkState {
    groups: HashSet<String>,
    streams: HashSet<(String, String)>,
    create_group_calls: usize,
    create_stream_calls: usize,
    deny_group_creation: bool,
    failing_puts: usize,
    missing_stream_on_next_put: bool,
    batches: Vec<Vec<LogRecord>>,
}

/// In-memory [`LogSink`] that records every accepted batch.
///
/// Creation calls report [`SinkError::AlreadyExists`] for resources created
/// earlier, mirroring the remote service.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    state: Arc<StdMutex<SinkState>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `group` as already present.
    pub fn existing_group(&self, group: &str) {
        lock(&self.state).groups.insert(group.to_owned());
    }

    /// Marks `stream` in `group` as already present.
    pub fn existing_stream(&self, group: &str, stream: &str) {
        lock(&self.state)
            .streams
            .insert((group.to_owned(), stream.to_owned()));
    }

    /// Makes every group creation fail with an access error.
    pub fn deny_group_creation(&self) {
        lock(&self.state).deny_group_creation = true;
    }

    /// Makes the next `count` appends fail with a service error.
    pub fn fail_next_puts(&self, count: usize) {
        lock(&self.state).failing_puts = count;
    }

    /// Deletes the stream before the next append so it reports
    /// [`SinkError::NotFound`].
    pub fn missing_stream_on_next_put(&self) {
        lock(&self.state).missing_stream_on_next_put = true;
    }

    /// Number of group creation attempts.
    #[must_use]
    pub fn create_group_calls(&self) -> usize {
        lock(&self.state).create_group_calls
    }

    /// Number of stream creation attempts.
    #[must_use]
    pub fn create_stream_calls(&self) -> usize {
        lock(&self.state).create_stream_calls
    }

    /// Sizes of the accepted batches, in order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        lock(&self.state).batches.iter().map(Vec::len).collect()
    }

    /// Every accepted record, in delivery order.
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        lock(&self.state).batches.iter().flatten().cloned().collect()
    }

    /// Messages of the accepted workload records.
    #[must_use]
    pub fn workload_lines(&self) -> Vec<String> {
        self.messages(|record| record.origin == RecordOrigin::Workload)
    }

    /// Messages of the accepted diagnostics at `level`.
    #[must_use]
    pub fn diagnostics_at(&self, level: LogLevel) -> Vec<String> {
        self.messages(|record| record.origin == RecordOrigin::Diagnostic && record.level == level)
    }

    fn messages(&self, keep: impl Fn(&LogRecord) -> bool) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|record| keep(record))
            .map(|record| record.message)
            .collect()
    }
}

impl LogSink for RecordingSink {
    fn create_log_group<'a>(&'a self, group: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.create_group_calls += 1;
            if state.deny_group_creation {
                return Err(SinkError::Service {
                    code: String::from("AccessDeniedException"),
                    message: String::from("not allowed to create log groups"),
                });
            }
            if state.groups.insert(group.to_owned()) {
                Ok(())
            } else {
                Err(SinkError::AlreadyExists {
                    resource: format!("log group {group}"),
                })
            }
        })
    }

    fn create_log_stream<'a>(&'a self, group: &'a str, stream: &'a str) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.create_stream_calls += 1;
            if state
                .streams
                .insert((group.to_owned(), stream.to_owned()))
            {
                Ok(())
            } else {
                Err(SinkError::AlreadyExists {
                    resource: format!("log stream {group}/{stream}"),
                })
            }
        })
    }

    fn put_log_events<'a>(
        &'a self,
        group: &'a str,
        stream: &'a str,
        records: Vec<LogRecord>,
    ) -> SinkFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            if state.failing_puts > 0 {
                state.failing_puts -= 1;
                return Err(SinkError::Service {
                    code: String::from("ServiceUnavailableException"),
                    message: String::from("simulated outage"),
                });
            }
            if state.missing_stream_on_next_put {
                state.missing_stream_on_next_put = false;
                state
                    .streams
                    .remove(&(group.to_owned(), stream.to_owned()));
                return Err(SinkError::NotFound {
                    resource: format!("log stream {group}/{stream}"),
                });
            }
            state.batches.push(records);
            Ok(())
        })
    }
}

/// Engine call recorded by [`ScriptedEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineCall {
    /// `start` was called.
    Start,
    /// An output chunk was handed to the caller.
    Chunk,
    /// `wait` was called.
    Wait,
    /// `stop` was called.
    Stop,
    /// `remove` was called.
    Remove,
}

/// How the scripted output stream behaves after its last chunk.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum StreamEnding {
    /// The stream closes.
    #[default]
    Close,
    /// The stream never yields again, like a long running workload.
    Hang,
    /// Polling the stream panics.
    Panic,
}

#[derive(Debug, Default)]
struct EngineState {
    start_error: Option<EngineError>,
    start_delay: Option<Duration>,
    chunks: Vec<Result<Vec<u8>, EngineError>>,
    ending: StreamEnding,
    exit_code: i64,
    stop_error: Option<EngineError>,
    remove_error: Option<EngineError>,
    started: Vec<WorkloadSpec>,
    journal: Vec<EngineCall>,
}

/// Fake [`ContainerEngine`] replaying scripted output and failures.
#[derive(Clone, Debug, Default)]
pub struct ScriptedEngine {
    state: Arc<StdMutex<EngineState>>,
}

impl ScriptedEngine {
    /// Creates an engine whose workload prints nothing and exits with 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues each line, newline terminated, as its own output chunk.
    pub fn push_lines(&self, lines: &[&str]) {
        let mut state = lock(&self.state);
        for line in lines {
            state.chunks.push(Ok(format!("{line}\n").into_bytes()));
        }
    }

    /// Queues a raw output chunk.
    pub fn push_chunk(&self, chunk: &[u8]) {
        lock(&self.state).chunks.push(Ok(chunk.to_vec()));
    }

    /// Queues an error on the output stream.
    pub fn push_stream_error(&self, err: EngineError) {
        lock(&self.state).chunks.push(Err(err));
    }

    /// Makes `start` fail.
    pub fn fail_start(&self, err: EngineError) {
        lock(&self.state).start_error = Some(err);
    }

    /// Makes `start` take `delay` before it completes.
    pub fn delay_start(&self, delay: Duration) {
        lock(&self.state).start_delay = Some(delay);
    }

    /// Sets what the stream does after the queued chunks.
    pub fn end_stream_with(&self, ending: StreamEnding) {
        lock(&self.state).ending = ending;
    }

    /// Sets the exit status reported by `wait`.
    pub fn exit_with(&self, code: i64) {
        lock(&self.state).exit_code = code;
    }

    /// Makes `stop` fail.
    pub fn fail_stop(&self, err: EngineError) {
        lock(&self.state).stop_error = Some(err);
    }

    /// Makes `remove` fail.
    pub fn fail_remove(&self, err: EngineError) {
        lock(&self.state).remove_error = Some(err);
    }

    /// Calls received so far, in order.
    #[must_use]
    pub fn journal(&self) -> Vec<EngineCall> {
        lock(&self.state).journal.clone()
    }

    /// Specs passed to successful `start` calls.
    #[must_use]
    pub fn started(&self) -> Vec<WorkloadSpec> {
        lock(&self.state).started.clone()
    }

    /// Number of `stop` calls.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.count(&EngineCall::Stop)
    }

    /// Number of `remove` calls.
    #[must_use]
    pub fn remove_calls(&self) -> usize {
        self.count(&EngineCall::Remove)
    }

    fn count(&self, call: &EngineCall) -> usize {
        lock(&self.state)
            .journal
            .iter()
            .filter(|entry| *entry == call)
            .count()
    }

    fn record(&self, call: EngineCall) {
        lock(&self.state).journal.push(call);
    }
}

fn scripted_panic() -> Result<Vec<u8>, EngineError> {
    panic!("scripted output stream panicked")
}

impl ContainerEngine for ScriptedEngine {
    fn start<'a>(&'a self, spec: &'a WorkloadSpec) -> EngineFuture<'a, ContainerHandle> {
        Box::pin(async move {
            let delay = lock(&self.state).start_delay;
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let mut state = lock(&self.state);
            state.journal.push(EngineCall::Start);
            if let Some(err) = state.start_error.clone() {
                return Err(err);
            }
            state.started.push(spec.clone());
            let ordinal = state.started.len();
            Ok(ContainerHandle {
                id: format!("scripted-{ordinal}"),
                name: format!("dockwatch-scripted-{ordinal}"),
            })
        })
    }

    fn output<'a>(&'a self, _handle: &'a ContainerHandle) -> OutputStream<'a> {
        let (chunks, ending) = {
            let state = lock(&self.state);
            (state.chunks.clone(), state.ending)
        };
        let journal = self.clone();
        let scripted = stream::iter(chunks).inspect(move |_| journal.record(EngineCall::Chunk));
        let tail = match ending {
            StreamEnding::Close => stream::empty().boxed(),
            StreamEnding::Hang => stream::pending().boxed(),
            StreamEnding::Panic => {
                stream::once(async { scripted_panic() }).boxed()
            }
        };
        scripted.chain(tail).boxed()
    }

    fn wait<'a>(&'a self, _handle: &'a ContainerHandle) -> EngineFuture<'a, i64> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.journal.push(EngineCall::Wait);
            Ok(state.exit_code)
        })
    }

    fn stop<'a>(&'a self, _handle: &'a ContainerHandle) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.journal.push(EngineCall::Stop);
            state.stop_error.clone().map_or(Ok(()), Err)
        })
    }

    fn remove(&self, _handle: ContainerHandle) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            let mut state = lock(&self.state);
            state.journal.push(EngineCall::Remove);
            state.remove_error.clone().map_or(Ok(()), Err)
        })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
