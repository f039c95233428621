//! `VerifyDeployment` — polls pod readiness for the deployed app, returning
//! a `DEPLOYMENT_FAILED` (retryable, fixable) if pods never settle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::workflow::{Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::kubectl::PodSummary;
use crate::context::AppContext;

const POLL_ATTEMPTS: u32 = 6;
const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct VerifyDeploymentInput {
    pub app_name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyDeploymentOutput {
    pub app_name: String,
    pub namespace: String,
    pub pods: Vec<PodSummary>,
    pub all_ready: bool,
    pub logs_tail: String,
}

pub struct VerifyDeploymentStep {
    ctx: Arc<AppContext>,
}

impl VerifyDeploymentStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for VerifyDeploymentStep {
    fn name(&self) -> &'static str {
        "verify_deployment"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let app_name = ctx.session_id.0.split('-').next().unwrap_or("app").to_string();
        let namespace = ctx.output_of("deploy_application").and_then(|v| v.get("namespace")).and_then(|v| v.as_str()).map(str::to_string);
        Ok(serde_json::json!({ "app_name": app_name, "namespace": namespace }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: VerifyDeploymentInput = serde_json::from_value(input)?;
        let namespace = input.namespace.clone().unwrap_or_else(|| "default".to_string());

        let mut pods = Vec::new();
        let mut all_ready = false;
        for attempt in 0..POLL_ATTEMPTS {
            pods = self.ctx.kubectl.get_pods(&input.app_name, &namespace).await?;
            all_ready = !pods.is_empty() && pods.iter().all(|p| p.ready);
            if all_ready || attempt + 1 == POLL_ATTEMPTS {
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        if !all_ready {
            let logs_tail = if let Some(pod) = pods.first() {
                self.ctx.kubectl.logs(&pod.name, &namespace, 50).await.unwrap_or_default()
            } else {
                String::new()
            };

            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("pods for {} are not ready after {POLL_ATTEMPTS} checks", input.app_name),
            )
            .with_context("pods", serde_json::to_value(&pods)?)
            .with_context("logs_tail", logs_tail));
        }

        let logs_tail = if let Some(pod) = pods.first() {
            self.ctx.kubectl.logs(&pod.name, &namespace, 50).await.unwrap_or_default()
        } else {
            String::new()
        };

        let output = VerifyDeploymentOutput {
            app_name: input.app_name,
            namespace,
            pods,
            all_ready,
            logs_tail,
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
    fn project_input_derives_app_name_from_session_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = VerifyDeploymentStep::new(app_ctx);
        let ctx = StepContext::new(SessionId::from("myapp-999"), Arc::new(NullProgressEmitter), Duration::from_secs(120), Arc::new(BTreeMap::new()));
        let input = step.project_input(&ctx).unwrap();
        assert_eq!(input["app_name"], "myapp");
    }
}
