//! Code execution dispatcher.
//!
//! Submits one unit of code to a live environment under the restricted
//! identity and normalizes the outcome. Self-heals against out-of-band
//! environment death by restarting in place (once) before dispatching.

use std::time::Duration;

use tracing::{debug, warn};

use super::{ExecOutcome, SandboxEnvironment};
use crate::backend::{BackendError, ContainerBackend, ExecIdentity};
use crate::config::Config;
use crate::error::SandboxError;

/// Languages with a mapped launch command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Language {
    Python,
    Javascript,
}

impl Language {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "python" => Some(Self::Python),
            "javascript" => Some(Self::Javascript),
            _ => None,
        }
    }
}

pub(crate) async fn run<B: ContainerBackend>(
    backend: &B,
    config: &Config,
    environment: &SandboxEnvironment,
    code: &str,
    language: &str,
) -> Result<ExecOutcome, SandboxError> {
    let command = match build_command(environment, code, language) {
        Ok(command) => command,
        Err(outcome) => return Ok(outcome),
    };

    ensure_running(backend, &environment.id).await?;

    let identity = ExecIdentity {
        user: config.exec_user.clone(),
        workdir: config.exec_workdir.clone(),
    };
    let exec = backend.exec(&environment.id, &command, Some(&identity));

    let result = if config.exec_timeout_seconds == 0 {
        exec.await
    } else {
        let deadline = Duration::from_secs(config.exec_timeout_seconds);
        match tokio::time::timeout(deadline, exec).await {
            Ok(result) => result,
            Err(_) => {
                // Dropping the exec future does not kill the process inside
                // the environment; bounce the environment to reap it.
                warn!(
                    environment = %environment.id,
                    seconds = config.exec_timeout_seconds,
                    "Execution timed out, restarting environment"
                );
                if let Err(e) = backend.stop(&environment.id, 0).await {
                    warn!(environment = %environment.id, error = %e, "Failed to stop timed-out environment");
                } else if let Err(e) = backend.start(&environment.id).await {
                    warn!(environment = %environment.id, error = %e, "Failed to restart timed-out environment");
                }
                return Ok(ExecOutcome::TimedOut {
                    seconds: config.exec_timeout_seconds,
                });
            }
        }
    };

    let out = result.map_err(|e| SandboxError::Backend {
        operation: "exec",
        message: e.to_string(),
    })?;

    let output = String::from_utf8_lossy(&out.output).into_owned();
    debug!(environment = %environment.id, exit_code = out.exit_code, "Execution finished");

    if out.exit_code == 0 {
        Ok(ExecOutcome::Completed {
            exit_code: out.exit_code,
            output,
        })
    } else {
        Ok(ExecOutcome::Failed {
            message: format!("Execution failed with exit code {}", out.exit_code),
            exit_code: out.exit_code,
            output,
        })
    }
}

/// Map the requested language to a launch command, or to the structured
/// unsupported outcome.
fn build_command(
    environment: &SandboxEnvironment,
    code: &str,
    language: &str,
) -> Result<Vec<String>, ExecOutcome> {
    match Language::parse(language) {
        Some(Language::Python) => Ok(vec![
            environment.interpreter_path.clone(),
            "-c".into(),
            code.into(),
        ]),
        Some(Language::Javascript) => Err(ExecOutcome::Unsupported {
            message: "JavaScript execution is not supported in this minimal sandbox".into(),
        }),
        None => Err(ExecOutcome::Unsupported {
            message: format!("Unsupported language: {language}"),
        }),
    }
}

/// Refresh the environment's live status; restart it in place if it died
/// out-of-band. The restart is attempted once and not retried.
async fn ensure_running<B: ContainerBackend>(
    backend: &B,
    environment_id: &str,
) -> Result<(), SandboxError> {
    let status = backend
        .status(environment_id)
        .await
        .map_err(|e| status_error("status", &e))?;

    if !status.is_running() {
        warn!(environment = %environment_id, ?status, "Environment not running, restarting");
        backend
            .start(environment_id)
            .await
            .map_err(|e| status_error("start", &e))?;
    }
    Ok(())
}

fn status_error(operation: &'static str, e: &BackendError) -> SandboxError {
    SandboxError::Backend {
        operation,
        message: e.to_string(),
    }
}
