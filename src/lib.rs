//! docker-sandbox-mcp daemon library
//!
//! This crate provides the core functionality for the docker-sandbox-mcp daemon:
//! - Configuration with the fixed sandbox resource limits
//! - MCP server implementation using rmcp
//! - Backend trait and bollard-based Docker implementation
//! - Sandbox lifecycle management (provision, bootstrap, execute, teardown)

pub mod backend;
pub mod config;
pub mod error;
pub mod mcp;
pub mod sandbox;
