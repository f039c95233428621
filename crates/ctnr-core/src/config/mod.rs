use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CtnrError, ErrorDomain, Result};

/// Root configuration for the orchestrator process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtnrConfig {
    /// Project metadata (informational, surfaced in logs/health checks).
    #[serde(default)]
    pub project: ProjectConfig,

    /// Session store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// MCP transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Default per-step retry behavior.
    #[serde(default)]
    pub retry: RetryDefaults,

    /// Workspace and subprocess configuration.
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

impl CtnrConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CtnrError::new(
                crate::error::ErrorCode::IoError,
                ErrorDomain::Config,
                format!("failed to read config file {}: {e}", path.as_ref().display()),
            )
        })?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string, substituting `${VAR}` references
    /// against the process environment before handing the result to `toml`.
    pub fn parse_toml(content: &str) -> Result<Self> {
        let content = substitute_env_vars(content);
        toml::from_str(&content).map_err(|e| {
            CtnrError::invalid_argument(ErrorDomain::Config, format!("failed to parse config: {e}"))
        })
    }
}

impl Default for CtnrConfig {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            store: StoreConfig::default(),
            transport: TransportConfig::default(),
            retry: RetryDefaults::default(),
            workspace: WorkspaceConfig::default(),
        }
    }
}

/// Project metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_project_name")]
    pub name: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

fn default_project_name() -> String {
    "ctnr".to_string()
}

/// Where and how the session store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the sled database directory. Overridden by `STORE_PATH`.
    #[serde(default = "default_store_path")]
    pub path: String,

    /// Maximum number of sessions retained before LRU eviction kicks in.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Default session time-to-live, in seconds, when a tool does not override it.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Interval, in seconds, between background expired-session sweeps.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_sessions: default_max_sessions(),
            session_ttl_secs: default_session_ttl_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

fn default_store_path() -> String {
    "./ctnr-sessions.db".to_string()
}

fn default_max_sessions() -> usize {
    256
}

fn default_session_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

/// MCP transport selection and binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub kind: TransportKind,

    /// Bind address for the HTTP transport. Ignored for stdio.
    #[serde(default = "default_http_bind")]
    pub http_bind: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            http_bind: default_http_bind(),
        }
    }
}

fn default_http_bind() -> String {
    "127.0.0.1:7670".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

/// Default retry/backoff parameters applied to steps that don't specify their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Workspace and external-process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory repositories are analyzed/built from.
    #[serde(default = "default_workspace_dir")]
    pub dir: String,

    /// Per-step command timeout, in seconds, absent a step-specific override.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

fn default_workspace_dir() -> String {
    ".".to_string()
}

fn default_step_timeout_secs() -> u64 {
    600
}

/// Substitute `${VAR_NAME}` references against the process environment.
/// References to variables that aren't set are left untouched.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(content) {
        if let Ok(value) = std::env::var(&cap[1]) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = CtnrConfig::default();
        assert_eq!(config.store.max_sessions, 256);
        assert_eq!(config.transport.kind, TransportKind::Stdio);
    }

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
            [store]
            path = "/tmp/ctnr.db"
        "#;

        let config = CtnrConfig::parse_toml(toml).unwrap();
        assert_eq!(config.store.path, "/tmp/ctnr.db");
        assert_eq!(config.store.max_sessions, 256);
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
            [project]
            name = "my-pipeline"

            [store]
            path = "/tmp/ctnr.db"
            max_sessions = 10

            [transport]
            kind = "http"
            http_bind = "0.0.0.0:9090"

            [retry]
            max_attempts = 5
        "#;

        let config = CtnrConfig::parse_toml(toml).unwrap();
        assert_eq!(config.project.name, "my-pipeline");
        assert_eq!(config.store.max_sessions, 10);
        assert_eq!(config.transport.kind, TransportKind::Http);
        assert_eq!(config.transport.http_bind, "0.0.0.0:9090");
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn env_var_substitution() {
        std::env::set_var("CTNR_TEST_STORE_PATH", "/tmp/from-env.db");

        let toml = r#"
            [store]
            path = "${CTNR_TEST_STORE_PATH}"
        "#;

        let config = CtnrConfig::parse_toml(toml).unwrap();
        assert_eq!(config.store.path, "/tmp/from-env.db");

        std::env::remove_var("CTNR_TEST_STORE_PATH");
    }
}
