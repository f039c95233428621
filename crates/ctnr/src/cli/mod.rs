mod serve;

pub use serve::ServeCommand;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Containerization Workflow Orchestrator — an MCP server that drives a
/// repository through analyze/build/scan/push/deploy/verify.
#[derive(Parser)]
#[command(name = "ctnr")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the MCP server.
    Serve(ServeCommand),
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve(cmd) => cmd.execute().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_with_defaults() {
        let cli = Cli::try_parse_from(["ctnr", "serve"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn parses_serve_with_overrides() {
        let cli = Cli::try_parse_from([
            "ctnr",
            "serve",
            "--transport",
            "http",
            "--store-path",
            "/tmp/custom.db",
        ]);
        assert!(cli.is_ok());
    }
}
