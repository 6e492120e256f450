//! docker-sandbox-mcp daemon
//!
//! MCP server that provisions an ephemeral, resource-limited Docker
//! container, bootstraps a python runtime inside it, and executes
//! untrusted code snippets under a restricted identity.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use docker_sandbox_mcp::{backend::DockerBackend, config::Config, mcp};

#[derive(Parser, Debug)]
#[command(name = "docker-sandbox-mcp")]
#[command(about = "MCP server for ephemeral Docker-sandboxed code execution")]
struct Args {
    /// Run in stdio mode (for MCP clients)
    #[arg(long)]
    stdio: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr so stdout is free for MCP protocol)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!(
        default_image = %config.default_image,
        memory_mb = config.limits.memory_mb,
        pids_limit = config.limits.pids_limit,
        "Loaded configuration"
    );

    // Refuse to start without a reachable daemon.
    let backend = DockerBackend::connect().context("Failed to connect to Docker daemon")?;
    info!("Connected to Docker daemon");

    if args.stdio {
        mcp::serve_stdio(config, backend).await?;
    } else {
        anyhow::bail!("Only --stdio mode is currently supported");
    }

    Ok(())
}
