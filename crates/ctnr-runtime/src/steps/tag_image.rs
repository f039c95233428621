//! `TagImage` — applies a registry-qualified tag to the locally built image.
//! `INVALID_PARAMETER` from a bad tag shape is neither retryable nor fixable,
//! so a malformed tag fails the workflow outright rather than looping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::validators::validate_tag;
use ctnr_core::workflow::{Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct TagImageInput {
    pub image_id: String,
    pub tag: String,
    #[serde(default)]
    pub repository: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagImageOutput {
    pub source: String,
    pub target: String,
}

pub struct TagImageStep {
    ctx: Arc<AppContext>,
}

impl TagImageStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for TagImageStep {
    fn name(&self) -> &'static str {
        "tag_image"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let build_output = ctx
            .output_of("build_image")
            .ok_or_else(|| CtnrError::invalid_state(ErrorDomain::Workflow, "tag_image requires a prior build_image output"))?;
        let image_id = build_output.get("image_id").and_then(|v| v.as_str()).unwrap_or_default();
        let image_name = build_output.get("image_name").and_then(|v| v.as_str()).unwrap_or(image_id);

        Ok(serde_json::json!({
            "image_id": image_id,
            "tag": "latest",
            "repository": image_name,
        }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: TagImageInput = serde_json::from_value(input)?;

        let tag_validation = validate_tag(&input.tag);
        if !tag_validation.is_valid() {
            return Err(CtnrError::new(
                ctnr_core::error::ErrorCode::InvalidParameter,
                ErrorDomain::Docker,
                format!("invalid tag: {}", input.tag),
            )
            .with_context("findings", serde_json::to_value(&tag_validation.findings)?));
        }

        let repository = input.repository.clone().unwrap_or_else(|| input.image_id.clone());
        let target = format!("{repository}:{}", input.tag);

        self.ctx.docker.tag(&input.image_id, &target).await?;

        let output = TagImageOutput {
            source: input.image_id,
            target,
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

    #[test]
    fn project_input_builds_from_prior_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = TagImageStep::new(app_ctx);
        let mut acc = BTreeMap::new();
        acc.insert("build_image".to_string(), serde_json::json!({"image_id": "sha256:abc", "image_name": "app"}));
        let ctx = StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(30), Arc::new(acc));
        let input = step.project_input(&ctx).unwrap();
        assert_eq!(input["repository"], "app");
    }

    #[tokio::test]
    async fn bad_tag_shape_is_invalid_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = TagImageStep::new(app_ctx);
        let input = serde_json::json!({"image_id": "sha256:abc", "tag": "-bad", "repository": "app"});
        let ctx = StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(30), Arc::new(BTreeMap::new()));
        let err = step.execute(&ctx, input).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(!err.is_fixable());
    }
}
