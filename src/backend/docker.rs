//! Docker backend implementation using bollard.
//!
//! Talks to the local Docker daemon over its default socket. Each trait
//! method is a single daemon round-trip except `exec`, which is the
//! create-exec / start-exec / inspect-exec sequence.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::{StreamExt, TryStreamExt};
use tracing::{debug, instrument};

use super::{BackendError, ContainerBackend, EnvironmentStatus, ExecIdentity, ExecOutput};
use crate::config::ResourceLimits;

/// Command that keeps the environment alive between exec calls.
const KEEPALIVE_CMD: [&str; 3] = ["tail", "-f", "/dev/null"];

/// Backend backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    /// Connect to the Docker daemon with local defaults.
    ///
    /// Fails if the daemon is unreachable — the server refuses to start
    /// without a working backend.
    pub fn connect() -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            BackendError::Api(format!(
                "cannot connect to Docker daemon (is it running, and is DOCKER_HOST correct?): {e}"
            ))
        })?;
        Ok(Self { docker })
    }
}

/// Map a daemon error, treating HTTP 404 as the given constructor.
fn map_err(err: DockerError, on_not_found: fn(String) -> BackendError) -> BackendError {
    match err {
        DockerError::DockerResponseServerError {
            status_code: 404,
            message,
        } => on_not_found(message),
        other => BackendError::Api(other.to_string()),
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn create_environment(
        &self,
        image: &str,
        limits: &ResourceLimits,
    ) -> Result<String, BackendError> {
        let host_config = HostConfig {
            memory: Some(limits.memory_bytes()),
            cpu_quota: Some(limits.cpu_quota_micros),
            pids_limit: Some(limits.pids_limit),
            network_mode: Some(limits.network_mode.clone()),
            tmpfs: Some(HashMap::from([(
                limits.scratch_mount.clone(),
                limits.scratch_options.clone(),
            )])),
            ..HostConfig::default()
        };

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(KEEPALIVE_CMD.iter().map(ToString::to_string).collect()),
            tty: Some(true),
            host_config: Some(host_config),
            ..Config::default()
        };

        let created = self
            .docker
            .create_container(None::<CreateContainerOptions<String>>, config)
            .await
            // 404 on create means the image is missing, not the container.
            .map_err(|e| map_err(e, BackendError::ImageNotFound))?;

        self.docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))?;

        debug!(environment = %created.id, %image, "Created environment");
        Ok(created.id)
    }

    async fn pull_image(&self, image: &str) -> Result<(), BackendError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..CreateImageOptions::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| BackendError::Api(format!("failed to pull '{image}': {e}")))?;
        Ok(())
    }

    #[instrument(skip(self, command, identity), fields(environment = %environment_id))]
    async fn exec(
        &self,
        environment_id: &str,
        command: &[String],
        identity: Option<&ExecIdentity>,
    ) -> Result<ExecOutput, BackendError> {
        let options = CreateExecOptions {
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            cmd: Some(command.to_vec()),
            user: identity.map(|i| i.user.clone()),
            working_dir: identity.map(|i| i.workdir.clone()),
            ..CreateExecOptions::default()
        };

        let exec = self
            .docker
            .create_exec(environment_id, options)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))?;

        let mut output = Vec::new();
        if let StartExecResults::Attached { output: mut stream, .. } = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))?
        {
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| BackendError::Api(e.to_string()))?;
                output.extend_from_slice(&chunk.into_bytes());
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))?;
        let exit_code = inspect.exit_code.unwrap_or(-1);

        debug!(exit_code, output_len = output.len(), "Exec completed");
        Ok(ExecOutput { exit_code, output })
    }

    async fn status(&self, environment_id: &str) -> Result<EnvironmentStatus, BackendError> {
        let inspect = self
            .docker
            .inspect_container(environment_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))?;

        let state = inspect.state.unwrap_or_default();
        if state.running.unwrap_or(false) {
            Ok(EnvironmentStatus::Running)
        } else {
            let label = state
                .status
                .map_or_else(|| "unknown".to_string(), |s| format!("{s:?}").to_lowercase());
            Ok(EnvironmentStatus::NotRunning(label))
        }
    }

    async fn start(&self, environment_id: &str) -> Result<(), BackendError> {
        self.docker
            .start_container(environment_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))
    }

    async fn stop(&self, environment_id: &str, grace_seconds: i64) -> Result<(), BackendError> {
        self.docker
            .stop_container(environment_id, Some(StopContainerOptions { t: grace_seconds }))
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))
    }

    async fn remove(&self, environment_id: &str, force: bool) -> Result<(), BackendError> {
        self.docker
            .remove_container(
                environment_id,
                Some(RemoveContainerOptions {
                    force,
                    ..RemoveContainerOptions::default()
                }),
            )
            .await
            .map_err(|e| map_err(e, BackendError::NotFound))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceLimits;

    // Full lifecycle against a real daemon; requires Docker and an
    // alpine:latest image, so it is gated behind an env var.
    #[tokio::test]
    async fn lifecycle_against_real_daemon() {
        if std::env::var("DOCKER_SANDBOX_TEST").is_err() {
            return;
        }

        let backend = DockerBackend::connect().unwrap();
        let limits = ResourceLimits::default();
        let id = backend
            .create_environment("alpine:latest", &limits)
            .await
            .unwrap();

        let status = backend.status(&id).await.unwrap();
        assert!(status.is_running());

        let out = backend
            .exec(
                &id,
                &["echo".to_string(), "hello".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, 0);
        assert!(String::from_utf8_lossy(&out.output).contains("hello"));

        backend.stop(&id, 1).await.unwrap();
        backend.remove(&id, true).await.unwrap();
    }
}
