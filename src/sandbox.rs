//! Sandbox lifecycle management.
//!
//! A [`SandboxManager`] owns at most one isolated environment at a time and
//! drives it through provisioning, bootstrap, execution, and teardown. The
//! manager is a plain owned value with no internal locking; callers
//! serialize access (the MCP layer wraps it in a mutex).

mod bootstrap;
mod dispatch;

use tracing::{debug, info, warn};

use crate::backend::{BackendError, ContainerBackend};
use crate::config::Config;
use crate::error::SandboxError;

/// One provisioned, bootstrapped environment.
///
/// Only constructed once bootstrap has succeeded, so holding a value of
/// this type means the interpreter path is resolved and the environment
/// was ready when last observed.
#[derive(Debug, Clone)]
pub struct SandboxEnvironment {
    /// Backend-assigned handle, stable for the environment's lifetime.
    pub id: String,
    /// Verified interpreter path discovered during bootstrap.
    pub interpreter_path: String,
}

/// Outcome of one code dispatch.
///
/// Failures of the executed code are values, not errors: a non-zero exit,
/// a timeout, or an unsupported language all come back here so callers can
/// inspect them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Code ran and exited zero.
    Completed { exit_code: i64, output: String },
    /// Code ran and exited non-zero.
    Failed {
        exit_code: i64,
        output: String,
        message: String,
    },
    /// The wall-clock deadline expired before the command finished.
    TimedOut { seconds: u64 },
    /// The requested language has no launch command in this sandbox.
    Unsupported { message: String },
}

/// Owns and drives a single sandbox environment.
pub struct SandboxManager<B> {
    backend: B,
    config: Config,
    environment: Option<SandboxEnvironment>,
}

impl<B: ContainerBackend> SandboxManager<B> {
    /// Create a manager with no active environment.
    pub const fn new(backend: B, config: Config) -> Self {
        Self {
            backend,
            config,
            environment: None,
        }
    }

    /// Whether an environment is currently ready.
    pub const fn is_ready(&self) -> bool {
        self.environment.is_some()
    }

    /// The active environment, if any.
    pub const fn environment(&self) -> Option<&SandboxEnvironment> {
        self.environment.as_ref()
    }

    /// Access the backend handle.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Provision and bootstrap an environment from `image`.
    ///
    /// Idempotent: if an environment is already ready, its id is returned
    /// unchanged and `image` is ignored. On any creation or bootstrap
    /// failure no environment is left referenced; the half-provisioned
    /// container is removed best-effort.
    pub async fn initialize(&mut self, image: &str) -> Result<String, SandboxError> {
        if let Some(env) = &self.environment {
            warn!(environment = %env.id, "Sandbox already initialized, reusing existing environment");
            return Ok(env.id.clone());
        }

        info!(%image, "Creating sandbox environment");
        let id = self.create_with_pull(image).await?;

        match bootstrap::run(&self.backend, &self.config, &id).await {
            Ok(interpreter_path) => {
                info!(environment = %id, interpreter = %interpreter_path, "Sandbox ready");
                self.environment = Some(SandboxEnvironment {
                    id: id.clone(),
                    interpreter_path,
                });
                Ok(id)
            }
            Err(e) => {
                warn!(environment = %id, error = %e, "Bootstrap failed, removing environment");
                if let Err(remove_err) = self.backend.remove(&id, true).await {
                    warn!(
                        environment = %id,
                        error = %remove_err,
                        "Failed to remove environment after bootstrap failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Dispatch one unit of code to the ready environment.
    ///
    /// Refuses with a state error when no environment is ready. Failures of
    /// the code itself are returned as [`ExecOutcome`] values.
    pub async fn execute(
        &mut self,
        code: &str,
        language: &str,
    ) -> Result<ExecOutcome, SandboxError> {
        let Some(environment) = &self.environment else {
            return Err(SandboxError::State(
                "Sandbox not initialized. Call 'initialize_sandbox' first.".into(),
            ));
        };
        dispatch::run(&self.backend, &self.config, environment, code, language).await
    }

    /// Tear down the active environment.
    ///
    /// Idempotent: succeeds trivially when nothing is active. Internal
    /// state is cleared before any backend call, so a failing daemon can
    /// never leave the manager pointing at a dead environment.
    pub async fn stop(&mut self) -> Result<(), SandboxError> {
        let Some(env) = self.environment.take() else {
            debug!("No active sandbox to stop");
            return Ok(());
        };

        info!(environment = %env.id, "Stopping sandbox environment");
        match self
            .backend
            .stop(&env.id, self.config.stop_grace_seconds)
            .await
        {
            Ok(()) => {}
            Err(BackendError::NotFound(_)) => {
                debug!(environment = %env.id, "Environment already removed");
            }
            Err(e) => {
                warn!(environment = %env.id, error = %e, "Graceful stop failed, removing anyway");
            }
        }

        match self.backend.remove(&env.id, true).await {
            Ok(()) | Err(BackendError::NotFound(_)) => {
                info!(environment = %env.id, "Environment stopped and removed");
                Ok(())
            }
            Err(e) => Err(SandboxError::Cleanup(format!(
                "failed to remove environment {}: {e}",
                env.id
            ))),
        }
    }

    /// Create the environment, pulling the image once if it is missing.
    /// A second not-found or a pull failure is fatal.
    async fn create_with_pull(&self, image: &str) -> Result<String, SandboxError> {
        match self
            .backend
            .create_environment(image, &self.config.limits)
            .await
        {
            Ok(id) => Ok(id),
            Err(BackendError::ImageNotFound(_)) => {
                warn!(%image, "Image not found locally, pulling");
                self.backend.pull_image(image).await.map_err(|e| {
                    SandboxError::ImageNotFound {
                        image: image.into(),
                        message: e.to_string(),
                    }
                })?;
                self.backend
                    .create_environment(image, &self.config.limits)
                    .await
                    .map_err(|e| match e {
                        BackendError::ImageNotFound(message) => SandboxError::ImageNotFound {
                            image: image.into(),
                            message,
                        },
                        other => SandboxError::Backend {
                            operation: "create",
                            message: other.to_string(),
                        },
                    })
            }
            Err(e) => Err(SandboxError::Backend {
                operation: "create",
                message: e.to_string(),
            }),
        }
    }
}
