//! `SecurityScan` — runs the configured scanner over the built image.
//! `SCAN_FAILED` is not in the retry table (a scanner outage isn't fixed by
//! retrying the same input), so this step accepts the orchestrator's default
//! single-attempt behavior for that code.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::workflow::{Step, StepContext};
use serde::Deserialize;
use serde_json::Value;

use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SecurityScanInput {
    pub image_ref: String,
}

pub struct SecurityScanStep {
    ctx: Arc<AppContext>,
}

impl SecurityScanStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for SecurityScanStep {
    fn name(&self) -> &'static str {
        "security_scan"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(600)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let image_ref = ctx
            .output_of("build_image")
            .and_then(|v| v.get("image_id").or_else(|| v.get("image_name")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CtnrError::invalid_state(ErrorDomain::Workflow, "security_scan requires a prior build_image output"))?;
        Ok(serde_json::json!({ "image_ref": image_ref }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: SecurityScanInput = serde_json::from_value(input)?;
        let report = self.ctx.scanner.scan(&input.image_ref).await?;
        Ok(serde_json::to_value(report)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctnr_core::progress::NullProgressEmitter;
    use ctnr_core::session::SessionId;
    use std::collections::BTreeMap;

    #[test]
    fn project_input_requires_prior_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = SecurityScanStep::new(app_ctx);
        let ctx = StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(600), Arc::new(BTreeMap::new()));
        assert!(step.project_input(&ctx).is_err());
    }

    #[test]
    fn project_input_reads_image_id_from_build_output() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = SecurityScanStep::new(app_ctx);
        let mut acc = BTreeMap::new();
        acc.insert("build_image".to_string(), serde_json::json!({"image_id": "sha256:abc"}));
        let ctx = StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(600), Arc::new(acc));
        let input = step.project_input(&ctx).unwrap();
        assert_eq!(input["image_ref"], "sha256:abc");
    }
}
