//! Error taxonomy for sandbox operations.
//!
//! Every fallible sandbox operation returns one of these closed variants;
//! nothing is panicked or silently dropped. Failures of *executed user code*
//! are not errors at all — they come back as [`crate::sandbox::ExecOutcome`]
//! values so callers can inspect exit codes and output.

use thiserror::Error;

/// Failures of the sandbox lifecycle itself (provisioning, state, teardown).
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The requested image was not available and could not be pulled.
    /// Raised only after the single automatic pull-and-retry has failed.
    #[error("image '{image}' not available: {message}")]
    ImageNotFound { image: String, message: String },

    /// The container daemon reported a failure for a backend call.
    #[error("backend error during {operation}: {message}")]
    Backend {
        operation: &'static str,
        message: String,
    },

    /// Interpreter installation, discovery, or verification failed.
    /// Fatal for the provisioning attempt; no partial environment is kept.
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    /// Operation attempted while no environment is ready.
    #[error("{0}")]
    State(String),

    /// Failure while stopping or removing the environment. Internal state
    /// is cleared regardless, so the manager never wedges on a dead sandbox.
    #[error("cleanup failed: {0}")]
    Cleanup(String),
}

impl SandboxError {
    /// Stable error-type string surfaced in MCP tool responses.
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::ImageNotFound { .. } => "ImageNotFound",
            Self::Backend { .. } => "BackendAPIError",
            Self::Bootstrap(_) => "BootstrapFailure",
            Self::State(_) => "StateError",
            Self::Cleanup(_) => "CleanupError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_type_strings_are_stable() {
        let cases = [
            (
                SandboxError::ImageNotFound {
                    image: "alpine:latest".into(),
                    message: "pull failed".into(),
                },
                "ImageNotFound",
            ),
            (
                SandboxError::Backend {
                    operation: "create",
                    message: "daemon unreachable".into(),
                },
                "BackendAPIError",
            ),
            (SandboxError::Bootstrap("apk failed".into()), "BootstrapFailure"),
            (SandboxError::State("not initialized".into()), "StateError"),
            (SandboxError::Cleanup("remove failed".into()), "CleanupError"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.error_type(), expected);
        }
    }

    #[test]
    fn display_includes_context() {
        let err = SandboxError::Backend {
            operation: "exec",
            message: "socket closed".into(),
        };
        assert_eq!(err.to_string(), "backend error during exec: socket closed");
    }
}
