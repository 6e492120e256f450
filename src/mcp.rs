//! MCP server implementation using rmcp.
//!
//! Exposes the sandbox lifecycle as MCP tools: `initialize_sandbox`,
//! `execute_code`, `stop_sandbox`. Tool results are JSON objects so
//! callers get structured status, exit codes, and error types. The
//! manager lives behind a mutex; tool calls against the same sandbox
//! serialize on it.

use std::sync::Arc;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo};
use rmcp::schemars;
use rmcp::transport::stdio;
use rmcp::{tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::backend::ContainerBackend;
use crate::config::Config;
use crate::error::SandboxError;
use crate::sandbox::{ExecOutcome, SandboxManager};

/// MCP server for ephemeral sandboxed code execution.
pub struct SandboxServer<B> {
    manager: Arc<Mutex<SandboxManager<B>>>,
    default_image: String,
    tool_router: ToolRouter<Self>,
}

impl<B> Clone for SandboxServer<B> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            default_image: self.default_image.clone(),
            tool_router: self.tool_router.clone(),
        }
    }
}

/// Parameters for the initialize_sandbox tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct InitializeParams {
    /// Container image to provision the sandbox from.
    #[schemars(description = "The container image to use (e.g. 'alpine:latest')")]
    pub image: Option<String>,
}

/// Parameters for the execute_code tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ExecuteParams {
    /// The code to execute in the sandbox.
    #[schemars(description = "The code string to execute")]
    pub code: String,

    /// The programming language. Defaults to python.
    #[schemars(description = "The programming language ('python'). Defaults to 'python'")]
    pub language: Option<String>,
}

fn tool_json(value: &Value, is_error: bool) -> CallToolResult {
    let content = vec![Content::text(value.to_string())];
    if is_error {
        CallToolResult::error(content)
    } else {
        CallToolResult::success(content)
    }
}

fn sandbox_error_json(e: &SandboxError) -> CallToolResult {
    tool_json(
        &json!({
            "status": "error",
            "error_type": e.error_type(),
            "message": e.to_string(),
        }),
        true,
    )
}

#[tool_router]
impl<B: ContainerBackend + 'static> SandboxServer<B> {
    /// Create a new sandbox server over a shared manager.
    pub fn new(manager: Arc<Mutex<SandboxManager<B>>>, default_image: String) -> Self {
        Self {
            manager,
            default_image,
            tool_router: Self::tool_router(),
        }
    }

    /// Initialize the sandbox, reusing the active one if it exists.
    #[tool(
        description = "Initialize a resource-constrained container sandbox for code execution. \
                       Reuses the existing sandbox if one is already active."
    )]
    async fn initialize_sandbox(
        &self,
        Parameters(params): Parameters<InitializeParams>,
    ) -> Result<CallToolResult, McpError> {
        let image = params.image.unwrap_or_else(|| self.default_image.clone());
        info!(%image, "Initializing sandbox");

        let mut manager = self.manager.lock().await;
        match manager.initialize(&image).await {
            Ok(container_id) => {
                info!(%container_id, "Sandbox initialized");
                Ok(tool_json(
                    &json!({"status": "success", "container_id": container_id}),
                    false,
                ))
            }
            Err(e) => {
                error!(error = %e, "Sandbox initialization failed");
                Ok(sandbox_error_json(&e))
            }
        }
    }

    /// Execute code inside the initialized sandbox.
    #[tool(
        description = "Execute a code snippet inside the initialized sandbox under a restricted \
                       identity. Returns exit code and combined output."
    )]
    async fn execute_code(
        &self,
        Parameters(params): Parameters<ExecuteParams>,
    ) -> Result<CallToolResult, McpError> {
        let language = params.language.unwrap_or_else(|| "python".into());
        info!(%language, code_len = params.code.len(), "Executing code");

        let mut manager = self.manager.lock().await;
        match manager.execute(&params.code, &language).await {
            Ok(ExecOutcome::Completed { exit_code, output }) => Ok(tool_json(
                &json!({"status": "success", "exit_code": exit_code, "output": output}),
                false,
            )),
            Ok(ExecOutcome::Failed {
                exit_code,
                output,
                message,
            }) => Ok(tool_json(
                &json!({
                    "status": "error",
                    "error_type": "ExecutionError",
                    "message": message,
                    "exit_code": exit_code,
                    "output": output,
                }),
                true,
            )),
            Ok(ExecOutcome::TimedOut { seconds }) => Ok(tool_json(
                &json!({
                    "status": "error",
                    "error_type": "ExecutionError",
                    "message": format!("Execution timed out after {seconds}s"),
                }),
                true,
            )),
            Ok(ExecOutcome::Unsupported { message }) => Ok(tool_json(
                &json!({
                    "status": "error",
                    "error_type": "UnsupportedLanguage",
                    "message": message,
                }),
                true,
            )),
            Err(e) => {
                error!(error = %e, "Code execution failed");
                Ok(sandbox_error_json(&e))
            }
        }
    }

    /// Stop and remove the active sandbox.
    #[tool(
        description = "Stop and remove the currently active sandbox. Succeeds as a no-op when \
                       no sandbox is active."
    )]
    async fn stop_sandbox(&self) -> Result<CallToolResult, McpError> {
        info!("Stopping sandbox");
        let mut manager = self.manager.lock().await;
        match manager.stop().await {
            Ok(()) => Ok(tool_json(
                &json!({"status": "success", "message": "Sandbox stopped and removed."}),
                false,
            )),
            Err(e) => {
                error!(error = %e, "Sandbox cleanup failed");
                Ok(sandbox_error_json(&e))
            }
        }
    }
}

#[tool_handler]
impl<B: ContainerBackend + 'static> ServerHandler for SandboxServer<B> {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: rmcp::model::ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "docker-sandbox-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Execute untrusted code snippets in an ephemeral, resource-limited container \
                 sandbox.\n\
                 \n\
                 Workflow:\n\
                 1. 'initialize_sandbox' provisions a container and installs a python runtime\n\
                 2. 'execute_code' runs a code snippet under a restricted identity\n\
                 3. 'stop_sandbox' tears the container down\n\
                 \n\
                 The sandbox is reused across execute_code calls until stopped."
                    .into(),
            ),
        }
    }
}

/// Serve the sandbox server over stdio.
///
/// When the MCP session ends, any environment still alive is torn down
/// best-effort before returning.
pub async fn serve_stdio<B: ContainerBackend + 'static>(
    config: Config,
    backend: B,
) -> anyhow::Result<()> {
    let default_image = config.default_image.clone();
    let manager = Arc::new(Mutex::new(SandboxManager::new(backend, config)));
    let server = SandboxServer::new(Arc::clone(&manager), default_image);

    info!("Starting MCP server on stdio");

    let service = server
        .serve(stdio())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;

    if let Err(e) = manager.lock().await.stop().await {
        warn!(error = %e, "Failed to clean up sandbox on shutdown");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, EnvironmentStatus, ExecIdentity, ExecOutput};
    use crate::config::ResourceLimits;
    use async_trait::async_trait;

    /// Backend where every operation succeeds and every exec exits zero.
    #[derive(Clone)]
    struct HappyBackend;

    #[async_trait]
    impl ContainerBackend for HappyBackend {
        async fn create_environment(
            &self,
            _image: &str,
            _limits: &ResourceLimits,
        ) -> Result<String, BackendError> {
            Ok("env-test".into())
        }

        async fn pull_image(&self, _image: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn exec(
            &self,
            _environment_id: &str,
            _command: &[String],
            _identity: Option<&ExecIdentity>,
        ) -> Result<ExecOutput, BackendError> {
            Ok(ExecOutput {
                exit_code: 0,
                output: b"ok\n".to_vec(),
            })
        }

        async fn status(&self, _environment_id: &str) -> Result<EnvironmentStatus, BackendError> {
            Ok(EnvironmentStatus::Running)
        }

        async fn start(&self, _environment_id: &str) -> Result<(), BackendError> {
            Ok(())
        }

        async fn stop(&self, _environment_id: &str, _grace: i64) -> Result<(), BackendError> {
            Ok(())
        }

        async fn remove(&self, _environment_id: &str, _force: bool) -> Result<(), BackendError> {
            Ok(())
        }
    }

    fn test_server() -> SandboxServer<HappyBackend> {
        let manager = Arc::new(Mutex::new(SandboxManager::new(
            HappyBackend,
            Config::default(),
        )));
        SandboxServer::new(manager, "alpine:latest".into())
    }

    #[tokio::test]
    async fn initialize_marks_manager_ready() {
        let server = test_server();
        let result = server
            .initialize_sandbox(Parameters(InitializeParams { image: None }))
            .await
            .unwrap();

        assert!(!result.is_error.unwrap_or(false));
        assert!(server.manager.lock().await.is_ready());
    }

    #[tokio::test]
    async fn execute_without_initialize_reports_state_error() {
        let server = test_server();
        let result = server
            .execute_code(Parameters(ExecuteParams {
                code: "print(1)".into(),
                language: None,
            }))
            .await
            .unwrap();

        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn full_tool_roundtrip() {
        let server = test_server();

        let init = server
            .initialize_sandbox(Parameters(InitializeParams { image: None }))
            .await
            .unwrap();
        assert!(!init.is_error.unwrap_or(false));

        let exec = server
            .execute_code(Parameters(ExecuteParams {
                code: "print('ok')".into(),
                language: Some("python".into()),
            }))
            .await
            .unwrap();
        assert!(!exec.is_error.unwrap_or(false));

        let stop = server.stop_sandbox().await.unwrap();
        assert!(!stop.is_error.unwrap_or(false));
        assert!(!server.manager.lock().await.is_ready());
    }

    #[tokio::test]
    async fn unsupported_language_is_a_tool_error_result() {
        let server = test_server();
        server
            .initialize_sandbox(Parameters(InitializeParams { image: None }))
            .await
            .unwrap();

        let result = server
            .execute_code(Parameters(ExecuteParams {
                code: "puts 1".into(),
                language: Some("ruby".into()),
            }))
            .await
            .unwrap();
        assert!(result.is_error.unwrap_or(false));
    }

    #[tokio::test]
    async fn stop_twice_is_not_an_error() {
        let server = test_server();
        server
            .initialize_sandbox(Parameters(InitializeParams { image: None }))
            .await
            .unwrap();

        let first = server.stop_sandbox().await.unwrap();
        let second = server.stop_sandbox().await.unwrap();
        assert!(!first.is_error.unwrap_or(false));
        assert!(!second.is_error.unwrap_or(false));
    }
}
