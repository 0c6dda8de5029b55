//! Container engine abstraction used by the workload runner.
//!
//! The runner only needs five operations from an engine: start a container,
//! follow its combined output, wait for its exit status, stop it, and remove
//! it. Engine specific failures are translated into [`EngineError`] so the
//! runner can tell a workload failure from a teardown race without looking
//! at error strings.

use std::future::Future;
use std::pin::Pin;

use futures::stream::BoxStream;
use thiserror::Error;

use crate::workload::WorkloadSpec;

mod docker;

pub use docker::{DockerEngine, DockerEngineConfig};

/// Handle to a started container.
///
/// Only [`ContainerEngine::start`] creates handles and
/// [`ContainerEngine::remove`] consumes them, so a handle is released at most
/// once.
#[derive(Debug, Eq, PartialEq)]
pub struct ContainerHandle {
    /// Engine assigned container identifier.
    pub id: String,
    /// Human readable container name.
    pub name: String,
}

/// Errors raised by container engines.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum EngineError {
    /// Raised when the engine cannot be reached or rejects the container
    /// definition.
    #[error("failed to start container: {message}")]
    Start {
        /// Message reported by the engine.
        message: String,
    },
    /// Raised when the requested image is not available locally.
    #[error("image {image} not found")]
    ImageNotFound {
        /// Image reference requested by the caller.
        image: String,
    },
    /// Raised when the workload ran but signalled failure.
    #[error("{message}")]
    Workload {
        /// Exit status reported by the engine, if any.
        exit_code: Option<i64>,
        /// Message reported by the engine.
        message: String,
    },
    /// Raised when reading the output stream fails.
    #[error("output stream failed: {message}")]
    Stream {
        /// Message reported by the engine.
        message: String,
    },
    /// Raised when the engine is already removing the container.
    #[error("removal of container {id} is already in progress")]
    RemovalInProgress {
        /// Container identifier.
        id: String,
    },
    /// Raised when the container no longer exists.
    #[error("no such container: {id}")]
    NotFound {
        /// Container identifier.
        id: String,
    },
    /// Wrapper for other engine API failures.
    #[error("engine error: {message}")]
    Api {
        /// Message reported by the engine.
        message: String,
    },
}

impl EngineError {
    /// Returns `true` when the error means the container is gone or going
    /// away, which teardown treats as success.
    #[must_use]
    pub const fn is_teardown_conflict(&self) -> bool {
        matches!(self, Self::RemovalInProgress { .. } | Self::NotFound { .. })
    }
}

/// Future returned by engine operations.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Raw output chunks as produced by the engine. Chunks are not aligned to
/// line boundaries.
pub type OutputStream<'a> = BoxStream<'a, Result<Vec<u8>, EngineError>>;

/// Minimal interface implemented by container engines.
pub trait ContainerEngine {
    /// Creates and starts a detached container for `spec` with stdout and
    /// stderr captured.
    fn start<'a>(&'a self, spec: &'a WorkloadSpec) -> EngineFuture<'a, ContainerHandle>;

    /// Follows the combined stdout and stderr of the container until the
    /// engine closes the streams.
    fn output<'a>(&'a self, handle: &'a ContainerHandle) -> OutputStream<'a>;

    /// Waits for the container to stop running and returns its exit status.
    fn wait<'a>(&'a self, handle: &'a ContainerHandle) -> EngineFuture<'a, i64>;

    /// Stops the container.
    fn stop<'a>(&'a self, handle: &'a ContainerHandle) -> EngineFuture<'a, ()>;

    /// Removes the container, consuming the handle.
    fn remove(&self, handle: ContainerHandle) -> EngineFuture<'_, ()>;
}
