//! Bootstrap sequencer.
//!
//! Runs once per environment, right after creation, while commands still
//! execute privileged: install the language runtime, discover and verify
//! the interpreter, then confirm the restricted-execution path with a
//! best-effort smoke test. Each step is a precondition for the next;
//! install, discovery, and verification failures abort the provisioning
//! attempt.

use tracing::{debug, info, warn};

use crate::backend::{BackendError, ContainerBackend, ExecIdentity, ExecOutput};
use crate::config::Config;
use crate::error::SandboxError;

/// Post-install environment dump, logged at debug level only.
const ENV_DUMP_CMD: &str =
    "echo PATH=$PATH && ls -la /usr/bin/python* /usr/local/bin/python* 2>/dev/null";

/// Trivial, side-effect-free command for the restricted smoke test.
const SMOKE_CMD: &str = "echo ready";

/// Run the full bootstrap sequence; returns the verified interpreter path.
pub(crate) async fn run<B: ContainerBackend>(
    backend: &B,
    config: &Config,
    environment_id: &str,
) -> Result<String, SandboxError> {
    install_runtime(backend, config, environment_id).await?;
    dump_environment(backend, environment_id).await;
    let interpreter = discover_interpreter(backend, config, environment_id).await?;
    verify_interpreter(backend, environment_id, &interpreter).await?;
    smoke_test_restricted(backend, config, environment_id).await;
    Ok(interpreter)
}

async fn install_runtime<B: ContainerBackend>(
    backend: &B,
    config: &Config,
    environment_id: &str,
) -> Result<(), SandboxError> {
    info!(environment = %environment_id, "Installing language runtime");
    let out = exec_privileged(backend, environment_id, sh(&config.install_command)).await?;
    if out.exit_code != 0 {
        return Err(SandboxError::Bootstrap(format!(
            "runtime installation exited with code {}: {}",
            out.exit_code,
            decode(&out)
        )));
    }
    Ok(())
}

/// Log what the installer left behind. Failures here are ignored.
async fn dump_environment<B: ContainerBackend>(backend: &B, environment_id: &str) {
    match exec_privileged(backend, environment_id, sh(ENV_DUMP_CMD)).await {
        Ok(out) => debug!(environment = %environment_id, dump = %decode(&out), "Post-install environment"),
        Err(e) => debug!(environment = %environment_id, error = %e, "Environment dump failed"),
    }
}

/// Probe the configured candidate paths in order; first present-and-
/// executable path wins. Falls back to a filesystem search rooted at the
/// standard binary hierarchy, taking the first match.
async fn discover_interpreter<B: ContainerBackend>(
    backend: &B,
    config: &Config,
    environment_id: &str,
) -> Result<String, SandboxError> {
    for candidate in &config.interpreter_candidates {
        let out = exec_privileged(
            backend,
            environment_id,
            vec!["test".into(), "-x".into(), candidate.clone()],
        )
        .await?;
        if out.exit_code == 0 {
            info!(environment = %environment_id, interpreter = %candidate, "Found interpreter");
            return Ok(candidate.clone());
        }
    }

    let out = exec_privileged(
        backend,
        environment_id,
        vec![
            "find".into(),
            config.interpreter_search_root.clone(),
            "-name".into(),
            "python3*".into(),
            "-type".into(),
            "f".into(),
            "-executable".into(),
        ],
    )
    .await?;
    if out.exit_code == 0 {
        if let Some(path) = decode(&out)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
        {
            info!(environment = %environment_id, interpreter = %path, "Found interpreter via filesystem search");
            return Ok(path.to_string());
        }
    }

    Err(SandboxError::Bootstrap(
        "interpreter not found after installation".into(),
    ))
}

async fn verify_interpreter<B: ContainerBackend>(
    backend: &B,
    environment_id: &str,
    interpreter: &str,
) -> Result<(), SandboxError> {
    let out = exec_privileged(
        backend,
        environment_id,
        vec![interpreter.to_string(), "--version".into()],
    )
    .await?;
    if out.exit_code != 0 {
        return Err(SandboxError::Bootstrap(format!(
            "interpreter verification failed with code {}: {}",
            out.exit_code,
            decode(&out)
        )));
    }
    info!(
        environment = %environment_id,
        version = %decode(&out).trim(),
        "Interpreter verified"
    );
    Ok(())
}

/// Confirm the restricted-execution path works before accepting real
/// workloads. Best-effort: a failure is logged, not fatal.
async fn smoke_test_restricted<B: ContainerBackend>(
    backend: &B,
    config: &Config,
    environment_id: &str,
) {
    let identity = ExecIdentity {
        user: config.exec_user.clone(),
        workdir: config.exec_workdir.clone(),
    };
    match backend
        .exec(environment_id, &sh(SMOKE_CMD), Some(&identity))
        .await
    {
        Ok(out) if out.exit_code == 0 => {
            debug!(environment = %environment_id, "Restricted execution path confirmed");
        }
        Ok(out) => {
            warn!(
                environment = %environment_id,
                exit_code = out.exit_code,
                "Restricted smoke test failed, continuing"
            );
        }
        Err(e) => {
            warn!(
                environment = %environment_id,
                error = %e,
                "Restricted smoke test failed, continuing"
            );
        }
    }
}

async fn exec_privileged<B: ContainerBackend>(
    backend: &B,
    environment_id: &str,
    command: Vec<String>,
) -> Result<ExecOutput, SandboxError> {
    backend
        .exec(environment_id, &command, None)
        .await
        .map_err(backend_error)
}

fn backend_error(e: BackendError) -> SandboxError {
    SandboxError::Backend {
        operation: "exec",
        message: e.to_string(),
    }
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

fn decode(out: &ExecOutput) -> String {
    String::from_utf8_lossy(&out.output).into_owned()
}
