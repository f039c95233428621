//! `PushImage` — pushes the tagged image to its registry, unless
//! `setup_cluster` decided the run takes the local `kind load` path instead
//! (§9 Design Notes), in which case this step is skipped.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::workflow::{SkipDecision, Step, StepContext};
use serde::Deserialize;
use serde_json::Value;

use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PushImageInput {
    pub image_ref: String,
}

pub struct PushImageStep {
    ctx: Arc<AppContext>,
}

impl PushImageStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for PushImageStep {
    fn name(&self) -> &'static str {
        "push_image"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    fn should_skip(&self, ctx: &StepContext) -> SkipDecision {
        let push_required = ctx
            .output_of("setup_cluster")
            .and_then(|v| v.get("registry_push_required"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        if push_required {
            SkipDecision::Run
        } else {
            SkipDecision::Skip {
                reason: "setup_cluster selected the local kind-load path; no registry push needed".to_string(),
            }
        }
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let image_ref = ctx
            .output_of("tag_image")
            .and_then(|v| v.get("target"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CtnrError::invalid_state(ErrorDomain::Workflow, "push_image requires a prior tag_image output"))?;
        Ok(serde_json::json!({ "image_ref": image_ref }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: PushImageInput = serde_json::from_value(input)?;
        let push = self.ctx.docker.push(&input.image_ref).await?;
        Ok(serde_json::json!({ "image_ref": input.image_ref, "digest": push.digest }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctnr_core::progress::NullProgressEmitter;
    use ctnr_core::session::SessionId;
    use std::collections::BTreeMap;

    fn ctx_with(acc: BTreeMap<String, Value>) -> StepContext {
        StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(600), Arc::new(acc))
    }

    #[test]
    fn skips_when_registry_push_not_required() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = PushImageStep::new(app_ctx);
        let mut acc = BTreeMap::new();
        acc.insert("setup_cluster".to_string(), serde_json::json!({"registry_push_required": false}));
        assert!(matches!(step.should_skip(&ctx_with(acc)), SkipDecision::Skip { .. }));
    }

    #[test]
    fn runs_by_default_when_no_setup_cluster_output() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = PushImageStep::new(app_ctx);
        assert!(matches!(step.should_skip(&ctx_with(BTreeMap::new())), SkipDecision::Run));
    }
}
