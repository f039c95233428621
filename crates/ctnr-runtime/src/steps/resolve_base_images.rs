//! `ResolveBaseImages` — picks a Dockerfile template for the repository's
//! detected (or hinted) language and writes it out, asking the LLM to choose
//! among the catalog's known names and falling back to the deterministic
//! language tag if it suggests something the catalog doesn't carry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::workflow::{Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::ChatMessage;
use crate::context::AppContext;
use crate::templates::TemplateCategory;

use super::analyze_repository::detect;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ResolveBaseImagesInput {
    pub repo_path: String,
    #[serde(default)]
    pub language_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveBaseImagesOutput {
    pub template_name: String,
    pub base_image: String,
    pub dockerfile_path: String,
    pub contents: String,
}

pub struct ResolveBaseImagesStep {
    ctx: Arc<AppContext>,
}

impl ResolveBaseImagesStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for ResolveBaseImagesStep {
    fn name(&self) -> &'static str {
        "resolve_base_images"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        if ctx.repo_path.is_empty() {
            return Err(CtnrError::invalid_state(
                ErrorDomain::Workflow,
                "resolve_base_images requires a non-empty repo_path",
            ));
        }
        Ok(serde_json::json!({ "repo_path": ctx.repo_path, "language_hint": Value::Null }))
    }

    async fn execute(&self, ctx: &StepContext, input: Value) -> Result<Value> {
        let input: ResolveBaseImagesInput = serde_json::from_value(input)?;

        let language = if let Some(hint) = input.language_hint.as_deref().filter(|h| !h.is_empty()) {
            self.ctx.templates.resolve_language(hint)
        } else if let Some(analyzed) = ctx.output_of("analyze_repository") {
            analyzed.get("language").and_then(|v| v.as_str()).unwrap_or("generic").to_string()
        } else {
            let (language, ..) = detect(&input.repo_path)?;
            language
        };

        let known = self.ctx.templates.list(TemplateCategory::Dockerfile);
        let prompt = vec![
            ChatMessage::system("You choose a Dockerfile template name for a repository. Reply with exactly one name from the list, nothing else."),
            ChatMessage::user(format!("Language: {language}\nAvailable templates: {}", known.join(", "))),
        ];

        let template_name = match self.ctx.llm.complete(prompt).await {
            Ok(reply) => {
                let trimmed = reply.trim().to_string();
                if known.contains(&trimmed) {
                    trimmed
                } else {
                    self.ctx.templates.resolve_language(&language)
                }
            }
            Err(_) => self.ctx.templates.resolve_language(&language),
        };

        let blob = self.ctx.templates.dockerfile(&template_name)?;
        let contents = blob.as_str();
        let dockerfile_path = format!("{}/Dockerfile", input.repo_path.trim_end_matches('/'));
        std::fs::write(&dockerfile_path, &contents)?;

        let output = ResolveBaseImagesOutput {
            template_name: template_name.clone(),
            base_image: template_name,
            dockerfile_path,
            contents,
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

    fn ctx_for(repo_path: &str) -> (tempfile::TempDir, Arc<AppContext>) {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "node");
        let _ = repo_path;
        (dir, app_ctx)
    }

    #[tokio::test]
    async fn resolves_node_template_and_writes_dockerfile() {
        let (store_dir, app_ctx) = ctx_for("unused");
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("package.json"), "{}").unwrap();

        let step = ResolveBaseImagesStep::new(app_ctx);
        let step_ctx = StepContext::new(
            SessionId::from("s1"),
            Arc::new(NullProgressEmitter),
            Duration::from_secs(60),
            Arc::new(BTreeMap::new()),
        )
        .with_repo_path(repo.path().to_str().unwrap().to_string());

        let input = step.project_input(&step_ctx).unwrap();
        let output = step.execute(&step_ctx, input).await.unwrap();
        assert_eq!(output["template_name"], "node");
        assert!(repo.path().join("Dockerfile").exists());
        drop(store_dir);
    }

    #[tokio::test]
    async fn unknown_llm_suggestion_falls_back_to_language() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "not-a-template");
        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("go.mod"), "module example.com/app").unwrap();

        let step = ResolveBaseImagesStep::new(app_ctx);
        let step_ctx = StepContext::new(
            SessionId::from("s1"),
            Arc::new(NullProgressEmitter),
            Duration::from_secs(60),
            Arc::new(BTreeMap::new()),
        )
        .with_repo_path(repo.path().to_str().unwrap().to_string());

        let input = step.project_input(&step_ctx).unwrap();
        let output = step.execute(&step_ctx, input).await.unwrap();
        assert_eq!(output["template_name"], "go");
    }
}
