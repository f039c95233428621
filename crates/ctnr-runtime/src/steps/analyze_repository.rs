//! `AnalyzeRepository` — walks the repository and detects its language,
//! framework, entry point, and a default port, by file-presence heuristics
//! (no parsing of the project's own source beyond file names, per §1's
//! non-goals on deep language analysis).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::validators::validate_repo_path;
use ctnr_core::workflow::{Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct AnalyzeRepositoryInput {
    pub repo_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRepositoryOutput {
    pub language: String,
    pub framework: Option<String>,
    pub entry_point: Option<String>,
    pub default_port: u16,
    pub files_scanned: usize,
}

/// Marker files that identify a language, in priority order, with a default
/// port and entry point to fall back on when more specific detection fails.
const MARKERS: &[(&str, &str, u16, &str)] = &[
    ("package.json", "node", 3000, "index.js"),
    ("requirements.txt", "python", 8000, "main.py"),
    ("pyproject.toml", "python", 8000, "main.py"),
    ("go.mod", "go", 8080, "main.go"),
];

pub struct AnalyzeRepositoryStep {
    #[allow(dead_code)]
    ctx: Arc<AppContext>,
}

impl AnalyzeRepositoryStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for AnalyzeRepositoryStep {
    fn name(&self) -> &'static str {
        "analyze_repository"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        if ctx.repo_path.is_empty() {
            return Err(CtnrError::invalid_state(
                ErrorDomain::Workflow,
                "analyze_repository requires a non-empty repo_path",
            ));
        }
        Ok(serde_json::json!({ "repo_path": ctx.repo_path }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: AnalyzeRepositoryInput = serde_json::from_value(input)?;

        let validation = validate_repo_path(&input.repo_path);
        if !validation.is_valid() {
            return Err(CtnrError::new(
                ErrorCode::ValidationFailed,
                ErrorDomain::Workflow,
                format!("repo_path failed validation: {} error(s)", validation.count(ctnr_core::validate::Severity::Error)),
            )
            .with_context("findings", serde_json::to_value(&validation.findings)?));
        }

        let (language, framework, entry_point, default_port, files_scanned) = detect(&input.repo_path)?;

        let output = AnalyzeRepositoryOutput {
            language,
            framework,
            entry_point,
            default_port,
            files_scanned,
        };
        Ok(serde_json::to_value(output)?)
    }
}

pub(crate) fn detect(repo_path: &str) -> Result<(String, Option<String>, Option<String>, u16, usize)> {
    let entries = std::fs::read_dir(repo_path).map_err(|e| {
        CtnrError::new(ErrorCode::IoError, ErrorDomain::Workflow, format!("failed to list {repo_path}: {e}"))
    })?;

    let names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    let files_scanned = names.len();

    for (marker, language, port, entry_point) in MARKERS {
        if names.iter().any(|n| n == marker) {
            let framework = detect_framework(repo_path, language);
            return Ok((language.to_string(), framework, Some(entry_point.to_string()), *port, files_scanned));
        }
    }

    Ok(("generic".to_string(), None, None, 8080, files_scanned))
}

/// Cheap, substring-based framework sniffing over the manifest file content —
/// deliberately shallow; deep dependency-graph analysis is out of scope (§1).
fn detect_framework(repo_path: &str, language: &str) -> Option<String> {
    match language {
        "node" => {
            let contents = std::fs::read_to_string(format!("{repo_path}/package.json")).ok()?;
            for (needle, name) in [("\"next\"", "next"), ("\"express\"", "express"), ("\"fastify\"", "fastify")] {
                if contents.contains(needle) {
                    return Some(name.to_string());
                }
            }
            None
        }
        "python" => {
            let contents = std::fs::read_to_string(format!("{repo_path}/requirements.txt")).ok()?;
            for (needle, name) in [("fastapi", "fastapi"), ("django", "django"), ("flask", "flask")] {
                if contents.to_lowercase().contains(needle) {
                    return Some(name.to_string());
                }
            }
            None
        }
        "go" => {
            let contents = std::fs::read_to_string(format!("{repo_path}/go.mod")).ok()?;
            if contents.contains("gin-gonic") {
                Some("gin".to_string())
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), r#"{"dependencies": {"express": "^4"}}"#).unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log('hi')").unwrap();
        dir
    }

    #[test]
    fn detects_node_and_express() {
        let dir = node_repo();
        let (language, framework, entry_point, port, scanned) = detect(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(language, "node");
        assert_eq!(framework.as_deref(), Some("express"));
        assert_eq!(entry_point.as_deref(), Some("index.js"));
        assert_eq!(port, 3000);
        assert_eq!(scanned, 2);
    }

    #[test]
    fn falls_back_to_generic_when_no_marker_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "hello").unwrap();
        let (language, framework, _, port, _) = detect(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(language, "generic");
        assert!(framework.is_none());
        assert_eq!(port, 8080);
    }

    #[test]
    fn missing_repo_path_is_io_error() {
        let result = detect("/no/such/ctnr-test-path");
        assert!(result.is_err());
    }
}
