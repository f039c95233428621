//! `BuildImage` — shells out through [`crate::adapters::DockerAdapter`] and,
//! on a fixable `IMAGE_BUILD_FAILED`, asks the LLM to revise the Dockerfile
//! content before the next attempt (S2's two-failures-then-fix scenario).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::retry::RetryPolicy;
use ctnr_core::workflow::{ErrorHistoryEntry, Fixer, Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::ChatMessage;
use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BuildImageInput {
    pub dockerfile_path: String,
    pub image_name: String,
    #[serde(default)]
    pub context_dir: Option<String>,
    #[serde(default)]
    pub dockerfile_override: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildImageOutput {
    pub image_id: String,
    pub image_name: String,
    pub log_tail: String,
}

struct BuildImageFixer {
    ctx: Arc<AppContext>,
}

#[async_trait]
impl Fixer for BuildImageFixer {
    async fn fix(&self, input: &Value, error: &CtnrError, history: &[ErrorHistoryEntry]) -> std::result::Result<Value, CtnrError> {
        let input: BuildImageInput = serde_json::from_value(input.clone())?;
        let current = std::fs::read_to_string(&input.dockerfile_path)?;
        let log_tail = error.context.get("log_tail").and_then(|v| v.as_str()).unwrap_or(&error.message);

        let prior_attempts = if history.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = history
                .iter()
                .map(|e| format!("attempt {}: {}", e.attempt, e.cause_summary))
                .collect();
            format!("\n\nPrior failed attempts on this Dockerfile:\n{}", lines.join("\n"))
        };

        let prompt = vec![
            ChatMessage::system("You repair Dockerfiles that fail to build. Reply with the full corrected Dockerfile content only, no commentary."),
            ChatMessage::user(format!("Current Dockerfile:\n{current}\n\nBuild failure log:\n{log_tail}{prior_attempts}")),
        ];

        let revised = self.ctx.llm.complete(prompt).await?;

        let mut next = serde_json::to_value(&input)?;
        next["dockerfile_override"] = Value::String(revised);
        Ok(next)
    }
}

pub struct BuildImageStep {
    ctx: Arc<AppContext>,
    fixer: BuildImageFixer,
}

impl BuildImageStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            fixer: BuildImageFixer { ctx: ctx.clone() },
            ctx,
        }
    }
}

#[async_trait]
impl Step for BuildImageStep {
    fn name(&self) -> &'static str {
        "build_image"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(900)
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            allow_fixer: true,
            ..RetryPolicy::default()
        }
    }

    fn fixer(&self) -> Option<&dyn Fixer> {
        Some(&self.fixer)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let dockerfile_path = ctx
            .output_of("verify_dockerfile")
            .and_then(|v| v.get("dockerfile_path"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}/Dockerfile", ctx.repo_path.trim_end_matches('/')));

        Ok(serde_json::json!({
            "dockerfile_path": dockerfile_path,
            "image_name": format!("ctnr/{}:{}", ctx.session_id, "build"),
            "context_dir": ctx.repo_path,
            "dockerfile_override": Value::Null,
        }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: BuildImageInput = serde_json::from_value(input)?;

        if let Some(override_contents) = &input.dockerfile_override {
            std::fs::write(&input.dockerfile_path, override_contents)?;
        }

        let context_dir = input.context_dir.clone().unwrap_or_else(|| {
            std::path::Path::new(&input.dockerfile_path)
                .parent()
                .map(|p| p.to_string_lossy().into_owned())
                .unwrap_or_else(|| ".".to_string())
        });

        let build = self.ctx.docker.build(&input.dockerfile_path, &context_dir, &input.image_name).await?;

        let output = BuildImageOutput {
            image_id: build.image_id,
            image_name: input.image_name,
            log_tail: build.log_tail,
        };
        Ok(serde_json::to_value(output)?)
    }
}
