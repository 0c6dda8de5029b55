//! Docker engine implementation backed by `bollard`.

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::{StreamExt, TryStreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use super::{ContainerEngine, ContainerHandle, EngineError, EngineFuture, OutputStream};
use crate::workload::WorkloadSpec;

const DEFAULT_NAME_PREFIX: &str = "dockwatch";
const DEFAULT_STOP_TIMEOUT_SECS: i64 = 10;
const REMOVAL_IN_PROGRESS_MARKER: &str = "removal of container";

/// Tunables for [`DockerEngine`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DockerEngineConfig {
    /// Prefix for generated container names.
    pub name_prefix: String,
    /// Grace period, in seconds, granted to the workload on stop.
    pub stop_timeout_secs: i64,
    /// Whether to pull the image once when it is missing locally.
    pub pull_missing_images: bool,
}

impl Default for DockerEngineConfig {
    fn default() -> Self {
        Self {
            name_prefix: DEFAULT_NAME_PREFIX.to_owned(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            pull_missing_images: true,
        }
    }
}

/// Container engine talking to the local Docker daemon.
#[derive(Clone, Debug)]
pub struct DockerEngine {
    docker: Docker,
    config: DockerEngineConfig,
}

impl DockerEngine {
    /// Connects to the daemon using the platform defaults (`DOCKER_HOST` or
    /// the local socket).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Start`] when the connection settings are
    /// unusable. Reachability is only checked on first use.
    pub fn connect(config: DockerEngineConfig) -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults().map_err(|err| EngineError::Start {
            message: err.to_string(),
        })?;
        Ok(Self { docker, config })
    }

    fn container_config(spec: &WorkloadSpec) -> Config<String> {
        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.to_argv()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            host_config: Some(HostConfig {
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    async fn create(&self, spec: &WorkloadSpec, name: &str) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: name.to_owned(),
            platform: None,
        };
        self.docker
            .create_container(Some(options), Self::container_config(spec))
            .await
            .map(|response| response.id)
            .map_err(|err| classify_docker_error(err, Operation::Create { image: &spec.image }))
    }

    async fn pull(&self, image: &str) -> Result<(), EngineError> {
        let (from_image, tag) = split_image_reference(image);
        info!(image, "pulling missing image");
        let options = CreateImageOptions {
            from_image: from_image.to_owned(),
            tag: tag.to_owned(),
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .map_err(|err| classify_docker_error(err, Operation::Create { image }))
            .try_for_each(|progress| {
                if let Some(status) = progress.status {
                    debug!(image, status = %status, "pull progress");
                }
                futures::future::ready(Ok(()))
            })
            .await
    }
}

impl ContainerEngine for DockerEngine {
    fn start<'a>(&'a self, spec: &'a WorkloadSpec) -> EngineFuture<'a, ContainerHandle> {
        Box::pin(async move {
            let name = format!("{}-{}", self.config.name_prefix, Uuid::new_v4());
            let id = match self.create(spec, &name).await {
                Err(EngineError::ImageNotFound { .. }) if self.config.pull_missing_images => {
                    self.pull(&spec.image).await?;
                    self.create(spec, &name).await?
                }
                other => other?,
            };

            if let Err(err) = self
                .docker
                .start_container(&id, None::<StartContainerOptions<String>>)
                .await
            {
                // The container exists but never ran; drop it so it does not
                // linger after a failed start.
                let cleanup = self
                    .docker
                    .remove_container(
                        &id,
                        Some(RemoveContainerOptions {
                            force: true,
                            ..Default::default()
                        }),
                    )
                    .await;
                if let Err(cleanup_err) = cleanup {
                    debug!(container = %id, error = %cleanup_err, "cleanup after failed start");
                }
                return Err(classify_docker_error(err, Operation::Start));
            }

            debug!(container = %id, name = %name, "container started");
            Ok(ContainerHandle { id, name })
        })
    }

    fn output<'a>(&'a self, handle: &'a ContainerHandle) -> OutputStream<'a> {
        let options = LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            tail: String::from("all"),
            ..Default::default()
        };
        self.docker
            .logs(&handle.id, Some(options))
            .map(|item| {
                item.map(|chunk| chunk.into_bytes().to_vec())
                    .map_err(|err| classify_docker_error(err, Operation::Stream))
            })
            .boxed()
    }

    fn wait<'a>(&'a self, handle: &'a ContainerHandle) -> EngineFuture<'a, i64> {
        Box::pin(async move {
            let options = WaitContainerOptions {
                condition: String::from("not-running"),
            };
            let mut responses = self.docker.wait_container(&handle.id, Some(options)).boxed();
            match responses.next().await {
                Some(Ok(response)) => Ok(response.status_code),
                // bollard reports non-zero exits as errors; the status is
                // still the answer here.
                Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(code),
                Some(Err(err)) => Err(classify_docker_error(err, Operation::Wait { id: &handle.id })),
                None => Err(EngineError::Api {
                    message: format!("wait stream for {} ended without a status", handle.id),
                }),
            }
        })
    }

    fn stop<'a>(&'a self, handle: &'a ContainerHandle) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let options = StopContainerOptions {
                t: self.config.stop_timeout_secs,
            };
            match self.docker.stop_container(&handle.id, Some(options)).await {
                Ok(()) => Ok(()),
                // 304: already stopped.
                Err(BollardError::DockerResponseServerError {
                    status_code: 304, ..
                }) => Ok(()),
                Err(err) => Err(classify_docker_error(err, Operation::Stop { id: &handle.id })),
            }
        })
    }

    fn remove(&self, handle: ContainerHandle) -> EngineFuture<'_, ()> {
        Box::pin(async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            self.docker
                .remove_container(&handle.id, Some(options))
                .await
                .map_err(|err| classify_docker_error(err, Operation::Remove { id: &handle.id }))
        })
    }
}

/// Engine call that produced an error, used to pick the error variant.
#[derive(Clone, Copy, Debug)]
enum Operation<'a> {
    Create { image: &'a str },
    Start,
    Stream,
    Wait { id: &'a str },
    Stop { id: &'a str },
    Remove { id: &'a str },
}

/// Translates a Docker API error into an [`EngineError`].
///
/// This is the only place that inspects Docker status codes and messages; the
/// removal race in particular is only distinguishable by its message text.
fn classify_docker_error(err: BollardError, operation: Operation<'_>) -> EngineError {
    let (status_code, message) = match err {
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => (Some(status_code), message),
        BollardError::DockerContainerWaitError { error, code } => {
            return EngineError::Workload {
                exit_code: Some(code),
                message: format!("container exited with status {code}: {error}"),
            };
        }
        other => (None, other.to_string()),
    };

    match (operation, status_code) {
        (Operation::Stop { id } | Operation::Remove { id }, Some(409))
            if message.contains(REMOVAL_IN_PROGRESS_MARKER) =>
        {
            EngineError::RemovalInProgress { id: id.to_owned() }
        }
        (
            Operation::Stop { id } | Operation::Remove { id } | Operation::Wait { id },
            Some(404),
        ) => EngineError::NotFound { id: id.to_owned() },
        (Operation::Create { image }, Some(404)) => EngineError::ImageNotFound {
            image: image.to_owned(),
        },
        (Operation::Create { .. } | Operation::Start, _) => EngineError::Start { message },
        (Operation::Stream, _) => EngineError::Stream { message },
        (Operation::Wait { .. } | Operation::Stop { .. } | Operation::Remove { .. }, _) => {
            EngineError::Api { message }
        }
    }
}

/// Splits an image reference into the `fromImage` and `tag` pull parameters.
///
/// An untagged reference pulls `latest`; Docker would otherwise pull every
/// tag. Digest references keep the digest in `fromImage` with an empty tag.
fn split_image_reference(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    let last_component_start = image.rfind('/').map_or(0, |idx| idx + 1);
    match image.rfind(':') {
        Some(colon) if colon > last_component_start => {
            let (name, tag) = image.split_at(colon);
            (name, tag.trim_start_matches(':'))
        }
        _ => (image, "latest"),
    }
}
