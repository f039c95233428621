//! `VerifyDockerfile` — validates the rendered Dockerfile against
//! [`validate_dockerfile_basic`] and routes failures through a fixer that
//! asks the LLM to revise the file content in place.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::validate::Severity;
use ctnr_core::validators::validate_dockerfile_basic;
use ctnr_core::workflow::{ErrorHistoryEntry, Fixer, Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::ChatMessage;
use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct VerifyDockerfileInput {
    pub dockerfile_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDockerfileOutput {
    pub dockerfile_path: String,
    pub quality_score: u32,
    pub findings: Vec<ctnr_core::validate::Finding>,
}

struct DockerfileFixer {
    ctx: Arc<AppContext>,
}

#[async_trait]
impl Fixer for DockerfileFixer {
    async fn fix(&self, input: &Value, error: &CtnrError, _history: &[ErrorHistoryEntry]) -> std::result::Result<Value, CtnrError> {
        let input: VerifyDockerfileInput = serde_json::from_value(input.clone())?;
        let current = std::fs::read_to_string(&input.dockerfile_path)?;

        let findings = error
            .context
            .get("findings")
            .and_then(|v| serde_json::from_value::<Vec<ctnr_core::validate::Finding>>(v.clone()).ok())
            .unwrap_or_default();
        let findings_text = findings.iter().map(|f| format!("- {}: {}", f.code, f.message)).collect::<Vec<_>>().join("\n");

        let prompt = vec![
            ChatMessage::system("You repair Dockerfiles. Reply with the full corrected Dockerfile content only, no commentary."),
            ChatMessage::user(format!("Current Dockerfile:\n{current}\n\nValidation issues:\n{findings_text}")),
        ];

        let revised = self.ctx.llm.complete(prompt).await?;
        std::fs::write(&input.dockerfile_path, revised.trim())?;

        Ok(serde_json::json!({ "dockerfile_path": input.dockerfile_path }))
    }
}

pub struct VerifyDockerfileStep {
    ctx: Arc<AppContext>,
    fixer: DockerfileFixer,
}

impl VerifyDockerfileStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            fixer: DockerfileFixer { ctx: ctx.clone() },
            ctx,
        }
    }
}

#[async_trait]
impl Step for VerifyDockerfileStep {
    fn name(&self) -> &'static str {
        "verify_dockerfile"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn fixer(&self) -> Option<&dyn Fixer> {
        Some(&self.fixer)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let dockerfile_path = ctx
            .output_of("resolve_base_images")
            .and_then(|v| v.get("dockerfile_path"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/Dockerfile", ctx.repo_path.trim_end_matches('/')));
        Ok(serde_json::json!({ "dockerfile_path": dockerfile_path }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let _ = &self.ctx;
        let input: VerifyDockerfileInput = serde_json::from_value(input)?;

        let contents = std::fs::read_to_string(&input.dockerfile_path)?;
        let validation = validate_dockerfile_basic(&contents);

        if !validation.is_valid() {
            return Err(CtnrError::new(
                ErrorCode::ValidationFailed,
                ErrorDomain::Workflow,
                format!("Dockerfile failed validation: {} error(s)", validation.count(Severity::Error)),
            )
            .with_context("dockerfile_path", input.dockerfile_path.clone())
            .with_context("findings", serde_json::to_value(&validation.findings)?));
        }

        let output = VerifyDockerfileOutput {
            dockerfile_path: input.dockerfile_path,
            quality_score: validation.quality_score(),
            findings: validation.findings,
        };
        Ok(serde_json::to_value(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctnr_core::progress::NullProgressEmitter;
    use ctnr_core::session::SessionId;
    use std::collections::BTreeMap;

    fn step_ctx(repo_path: &str) -> StepContext {
        StepContext::new(
            SessionId::from("s1"),
            Arc::new(NullProgressEmitter),
            Duration::from_secs(30),
            Arc::new(BTreeMap::new()),
        )
        .with_repo_path(repo_path.to_string())
    }

    #[tokio::test]
    async fn valid_dockerfile_passes() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "fixed");
        std::fs::write(dir.path().join("Dockerfile"), "FROM node:20-slim\nEXPOSE 3000\nCMD [\"node\", \"index.js\"]").unwrap();

        let step = VerifyDockerfileStep::new(app_ctx);
        let ctx = step_ctx(dir.path().to_str().unwrap());
        let input = step.project_input(&ctx).unwrap();
        let output = step.execute(&ctx, input).await.unwrap();
        assert_eq!(output["quality_score"], 100);
    }

    #[tokio::test]
    async fn invalid_dockerfile_is_validation_failed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Dockerfile"), "CMD [\"node\"]").unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "fixed");

        let step = VerifyDockerfileStep::new(app_ctx);
        let ctx = step_ctx(dir.path().to_str().unwrap());
        let input = step.project_input(&ctx).unwrap();
        let err = step.execute(&ctx, input).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert!(err.is_fixable());
    }

    #[tokio::test]
    async fn fixer_rewrites_dockerfile_content() {
        let dir = tempfile::tempdir().unwrap();
        let dockerfile_path = dir.path().join("Dockerfile");
        std::fs::write(&dockerfile_path, "CMD [\"node\"]").unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "FROM node:20-slim\nCMD [\"node\"]");

        let step = VerifyDockerfileStep::new(app_ctx);
        let input = serde_json::json!({ "dockerfile_path": dockerfile_path.to_str().unwrap() });
        let err = CtnrError::new(ErrorCode::ValidationFailed, ErrorDomain::Workflow, "bad")
            .with_context("findings", serde_json::json!([]));

        let revised = step.fixer().unwrap().fix(&input, &err, &[]).await.unwrap();
        assert_eq!(revised["dockerfile_path"], dockerfile_path.to_str().unwrap());
        let contents = std::fs::read_to_string(&dockerfile_path).unwrap();
        assert!(contents.contains("FROM node"));
    }
}
