//! Container backend trait and implementations.
//!
//! The backend is a thin capability handle onto a container-runtime daemon:
//! create/start/exec/stop/remove isolated environments. It carries no
//! sandbox policy of its own — the lifecycle manager decides what to run
//! and under which identity.

mod docker;

pub use docker::DockerBackend;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ResourceLimits;

/// Failures reported by the container daemon.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The requested image does not exist locally.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The referenced environment no longer exists.
    #[error("environment not found: {0}")]
    NotFound(String),

    /// Any other daemon-reported failure.
    #[error("{0}")]
    Api(String),
}

/// Raw result of one command executed inside an environment.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Exit code of the command (0 = success).
    pub exit_code: i64,
    /// Combined stdout/stderr bytes, undecoded.
    pub output: Vec<u8>,
}

/// Identity under which a command runs inside the environment.
#[derive(Debug, Clone)]
pub struct ExecIdentity {
    /// Non-privileged user (e.g. "nobody").
    pub user: String,
    /// Confined working directory (e.g. "/tmp").
    pub workdir: String,
}

/// Live status of an environment as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentStatus {
    Running,
    /// Not running; carries the daemon's state string for logging.
    NotRunning(String),
}

impl EnvironmentStatus {
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

/// Capability surface of the container-runtime daemon.
///
/// Commands run privileged by default (bootstrap needs write access to the
/// root filesystem); pass an [`ExecIdentity`] to drop to the restricted
/// execution identity.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Create and start an environment from `image` with fixed limits.
    /// Returns the daemon-assigned environment id.
    async fn create_environment(
        &self,
        image: &str,
        limits: &ResourceLimits,
    ) -> Result<String, BackendError>;

    /// Pull `image` from its registry.
    async fn pull_image(&self, image: &str) -> Result<(), BackendError>;

    /// Run `command` inside the environment and collect its output.
    async fn exec(
        &self,
        environment_id: &str,
        command: &[String],
        identity: Option<&ExecIdentity>,
    ) -> Result<ExecOutput, BackendError>;

    /// Refresh the environment's live status from the daemon.
    async fn status(&self, environment_id: &str) -> Result<EnvironmentStatus, BackendError>;

    /// Start a stopped environment.
    async fn start(&self, environment_id: &str) -> Result<(), BackendError>;

    /// Gracefully stop the environment, waiting up to `grace_seconds`.
    async fn stop(&self, environment_id: &str, grace_seconds: i64) -> Result<(), BackendError>;

    /// Remove the environment, optionally force-killing it first.
    async fn remove(&self, environment_id: &str, force: bool) -> Result<(), BackendError>;
}
