//! Daemon configuration.
//!
//! Everything has a working default; deployments can override individual
//! fields by setting `DOCKER_SANDBOX_CONFIG` to a JSON object. The resource
//! limits are fixed at environment creation and are the only backstop
//! against runaway code besides the dispatch timeout.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Environment variable holding a JSON configuration override.
pub const CONFIG_ENV_VAR: &str = "DOCKER_SANDBOX_CONFIG";

/// Top-level configuration for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Image used when `initialize_sandbox` is called without one.
    #[serde(default = "default_image")]
    pub default_image: String,

    /// Resource limits applied to every environment at creation.
    #[serde(default)]
    pub limits: ResourceLimits,

    /// Combined update-and-install command for the language runtime,
    /// run privileged inside the fresh environment via `sh -c`.
    #[serde(default = "default_install_command")]
    pub install_command: String,

    /// Conventional interpreter locations, probed in order after install.
    /// First path that exists and is executable wins.
    #[serde(default = "default_interpreter_candidates")]
    pub interpreter_candidates: Vec<String>,

    /// Root of the fallback filesystem search when no candidate matches.
    #[serde(default = "default_search_root")]
    pub interpreter_search_root: String,

    /// Non-privileged identity for all post-bootstrap execution.
    #[serde(default = "default_exec_user")]
    pub exec_user: String,

    /// Confined working directory for all post-bootstrap execution.
    #[serde(default = "default_exec_workdir")]
    pub exec_workdir: String,

    /// Grace period given to the environment on stop, in seconds.
    #[serde(default = "default_stop_grace")]
    pub stop_grace_seconds: i64,

    /// Wall-clock deadline per dispatched command, in seconds. 0 disables
    /// the deadline, leaving the resource quotas as the only backstop.
    #[serde(default = "default_exec_timeout")]
    pub exec_timeout_seconds: u64,
}

/// Fixed resource limits for a sandbox environment.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in megabytes.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: i64,

    /// CPU quota in microseconds per 100ms scheduling period
    /// (50_000 = 50% of one core).
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota_micros: i64,

    /// Process-count ceiling.
    #[serde(default = "default_pids_limit")]
    pub pids_limit: i64,

    /// Container network mode.
    #[serde(default = "default_network_mode")]
    pub network_mode: String,

    /// Mount point of the writable scratch tmpfs.
    #[serde(default = "default_scratch_mount")]
    pub scratch_mount: String,

    /// Mount options for the scratch tmpfs. No-exec/no-dev/no-suid so the
    /// scratch space cannot be used to stage binaries.
    #[serde(default = "default_scratch_options")]
    pub scratch_options: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_image: default_image(),
            limits: ResourceLimits::default(),
            install_command: default_install_command(),
            interpreter_candidates: default_interpreter_candidates(),
            interpreter_search_root: default_search_root(),
            exec_user: default_exec_user(),
            exec_workdir: default_exec_workdir(),
            stop_grace_seconds: default_stop_grace(),
            exec_timeout_seconds: default_exec_timeout(),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_mb: default_memory_mb(),
            cpu_quota_micros: default_cpu_quota(),
            pids_limit: default_pids_limit(),
            network_mode: default_network_mode(),
            scratch_mount: default_scratch_mount(),
            scratch_options: default_scratch_options(),
        }
    }
}

impl Config {
    /// Load configuration, applying the `DOCKER_SANDBOX_CONFIG` JSON
    /// override when present.
    pub fn from_env() -> Result<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(json) => Self::from_json(&json),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).with_context(|| format!("Failed to parse {CONFIG_ENV_VAR}"))
    }
}

impl ResourceLimits {
    /// Memory ceiling in bytes, as the daemon API expects.
    pub const fn memory_bytes(&self) -> i64 {
        self.memory_mb * 1024 * 1024
    }
}

fn default_image() -> String {
    "alpine:latest".into()
}

fn default_install_command() -> String {
    "apk update && apk add --no-cache python3 py3-pip && ln -sf /usr/bin/python3 /usr/bin/python"
        .into()
}

fn default_interpreter_candidates() -> Vec<String> {
    [
        "/usr/bin/python3",
        "/usr/bin/python",
        "/usr/local/bin/python3",
        "/usr/local/bin/python",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_search_root() -> String {
    "/usr".into()
}

fn default_exec_user() -> String {
    "nobody".into()
}

fn default_exec_workdir() -> String {
    "/tmp".into()
}

const fn default_stop_grace() -> i64 {
    5
}

const fn default_exec_timeout() -> u64 {
    30
}

const fn default_memory_mb() -> i64 {
    512
}

const fn default_cpu_quota() -> i64 {
    50_000
}

const fn default_pids_limit() -> i64 {
    100
}

fn default_network_mode() -> String {
    "bridge".into()
}

fn default_scratch_mount() -> String {
    "/tmp".into()
}

fn default_scratch_options() -> String {
    "rw,size=64m,noexec,nodev,nosuid".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fixed_limits() {
        let config = Config::default();
        assert_eq!(config.default_image, "alpine:latest");
        assert_eq!(config.limits.memory_mb, 512);
        assert_eq!(config.limits.memory_bytes(), 512 * 1024 * 1024);
        assert_eq!(config.limits.cpu_quota_micros, 50_000);
        assert_eq!(config.limits.pids_limit, 100);
        assert_eq!(config.limits.network_mode, "bridge");
        assert_eq!(config.limits.scratch_mount, "/tmp");
        assert_eq!(config.limits.scratch_options, "rw,size=64m,noexec,nodev,nosuid");
        assert_eq!(config.exec_user, "nobody");
        assert_eq!(config.exec_workdir, "/tmp");
        assert_eq!(config.stop_grace_seconds, 5);
        assert_eq!(config.exec_timeout_seconds, 30);
    }

    #[test]
    fn probe_order_is_preserved() {
        let config = Config::default();
        assert_eq!(
            config.interpreter_candidates,
            vec![
                "/usr/bin/python3",
                "/usr/bin/python",
                "/usr/local/bin/python3",
                "/usr/local/bin/python",
            ]
        );
    }

    #[test]
    fn parse_partial_override() {
        let config = Config::from_json(
            r#"{
                "default_image": "python:3.12-alpine",
                "exec_timeout_seconds": 0,
                "limits": {"memory_mb": 256}
            }"#,
        )
        .unwrap();

        assert_eq!(config.default_image, "python:3.12-alpine");
        assert_eq!(config.exec_timeout_seconds, 0);
        assert_eq!(config.limits.memory_mb, 256);
        // Untouched fields keep their defaults
        assert_eq!(config.limits.pids_limit, 100);
        assert_eq!(config.exec_user, "nobody");
    }

    #[test]
    fn parse_invalid_json_fails() {
        assert!(Config::from_json("not json").is_err());
    }
}
