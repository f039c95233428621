use anyhow::Result;
use clap::Parser;
use ctnr_core::config::{CtnrConfig, TransportKind};
use tracing::info;

use crate::bootstrap;

/// Start the MCP server.
///
/// Configuration layers, lowest to highest precedence: built-in defaults,
/// `--config` TOML file (with `${VAR}` substitution against the process
/// environment), the environment variables named in `SPEC_FULL.md` §6
/// (`STORE_PATH`, `WORKSPACE_DIR`, `MAX_SESSIONS`, `TRANSPORT_TYPE`), then
/// these CLI flags.
#[derive(Parser)]
pub struct ServeCommand {
    /// Configuration file path. Missing is not an error — defaults apply.
    #[arg(short, long, default_value = "ctnr.toml")]
    pub config: String,

    /// Override the session store path (`STORE_PATH`).
    #[arg(long)]
    pub store_path: Option<String>,

    /// Override the workspace root repositories are analyzed/built from (`WORKSPACE_DIR`).
    #[arg(long)]
    pub workspace_dir: Option<String>,

    /// Override the MCP transport (`stdio` or `http`; `TRANSPORT_TYPE`).
    #[arg(long)]
    pub transport: Option<String>,

    /// Override the HTTP transport bind address. Ignored for stdio.
    #[arg(long)]
    pub http_bind: Option<String>,
}

impl ServeCommand {
    pub async fn execute(self) -> Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
            .json()
            .init();

        let mut config = load_config(&self.config)?;
        apply_env_overrides(&mut config);
        self.apply_cli_overrides(&mut config);

        info!(
            transport = ?config.transport.kind,
            store_path = %config.store.path,
            "ctnr starting"
        );

        let runtime = bootstrap::build(config)?;
        let _cleanup = bootstrap::spawn_cleanup_sweep(runtime.ctx.clone());

        match runtime.ctx.config.transport.kind {
            TransportKind::Stdio => ctnr_runtime::serve_stdio(runtime.dispatcher).await?,
            TransportKind::Http => {
                let bind = runtime.ctx.config.transport.http_bind.parse()?;
                ctnr_runtime::serve_http(runtime.dispatcher, bind).await?
            }
        }

        Ok(())
    }

    fn apply_cli_overrides(&self, config: &mut CtnrConfig) {
        if let Some(path) = &self.store_path {
            config.store.path = path.clone();
        }
        if let Some(dir) = &self.workspace_dir {
            config.workspace.dir = dir.clone();
        }
        if let Some(transport) = &self.transport {
            if let Some(kind) = parse_transport(transport) {
                config.transport.kind = kind;
            }
        }
        if let Some(bind) = &self.http_bind {
            config.transport.http_bind = bind.clone();
        }
    }
}

fn load_config(path: &str) -> Result<CtnrConfig> {
    if std::path::Path::new(path).exists() {
        Ok(CtnrConfig::from_file(path).map_err(|e| anyhow::anyhow!("{e}"))?)
    } else {
        Ok(CtnrConfig::default())
    }
}

fn apply_env_overrides(config: &mut CtnrConfig) {
    if let Ok(path) = std::env::var("STORE_PATH") {
        config.store.path = path;
    }
    if let Ok(dir) = std::env::var("WORKSPACE_DIR") {
        config.workspace.dir = dir;
    }
    if let Ok(max) = std::env::var("MAX_SESSIONS") {
        if let Ok(max) = max.parse() {
            config.store.max_sessions = max;
        }
    }
    if let Ok(transport) = std::env::var("TRANSPORT_TYPE") {
        if let Some(kind) = parse_transport(&transport) {
            config.transport.kind = kind;
        }
    }
}

fn parse_transport(value: &str) -> Option<TransportKind> {
    match value.to_ascii_lowercase().as_str() {
        "stdio" => Some(TransportKind::Stdio),
        "http" => Some(TransportKind::Http),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_falls_back_to_defaults_when_file_missing() {
        let config = load_config("/nonexistent/ctnr.toml").unwrap();
        assert_eq!(config.store.max_sessions, 256);
    }

    #[test]
    fn env_overrides_apply_on_top_of_file_config() {
        std::env::set_var("MAX_SESSIONS", "9");
        let mut config = CtnrConfig::default();
        apply_env_overrides(&mut config);
        assert_eq!(config.store.max_sessions, 9);
        std::env::remove_var("MAX_SESSIONS");
    }

    #[test]
    fn cli_overrides_take_precedence_over_everything() {
        let cmd = ServeCommand {
            config: "ctnr.toml".to_string(),
            store_path: Some("/tmp/explicit.db".to_string()),
            workspace_dir: None,
            transport: Some("http".to_string()),
            http_bind: None,
        };
        let mut config = CtnrConfig::default();
        cmd.apply_cli_overrides(&mut config);
        assert_eq!(config.store.path, "/tmp/explicit.db");
        assert_eq!(config.transport.kind, TransportKind::Http);
    }
}
