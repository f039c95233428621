//! `SetupCluster` — ensures a local `kind` cluster and target namespace
//! exist, and decides whether the run needs a registry push or can load the
//! image directly into the cluster (§9 Design Notes, resolved Open Question).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::Result;
use ctnr_core::workflow::{Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SetupClusterInput {
    #[serde(default)]
    pub cluster_name: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupClusterOutput {
    pub cluster_name: String,
    pub namespace: String,
    pub registry_push_required: bool,
}

pub struct SetupClusterStep {
    ctx: Arc<AppContext>,
}

impl SetupClusterStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Step for SetupClusterStep {
    fn name(&self) -> &'static str {
        "setup_cluster"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let project_name = ctx.session_id.0.split('-').next().unwrap_or(&self.ctx.config.project.name).to_string();
        Ok(serde_json::json!({
            "cluster_name": format!("{project_name}-dev"),
            "namespace": "default",
        }))
    }

    async fn execute(&self, _ctx: &StepContext, input: Value) -> Result<Value> {
        let input: SetupClusterInput = serde_json::from_value(input)?;
        let cluster_name = input.cluster_name.unwrap_or_else(|| format!("{}-dev", self.ctx.config.project.name));
        let namespace = input.namespace.unwrap_or_else(|| "default".to_string());

        self.ctx.kind.create_cluster(&cluster_name).await?;
        self.ctx.kubectl.create_namespace_if_absent(&namespace).await?;

        let registry_push_required = std::env::var("CTNR_LOCAL_CLUSTER_ONLY").is_err();

        let output = SetupClusterOutput {
            cluster_name,
            namespace,
            registry_push_required,
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
    fn project_input_derives_cluster_name_from_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = SetupClusterStep::new(app_ctx);
        let ctx = StepContext::new(SessionId::from("myapp-555"), Arc::new(NullProgressEmitter), Duration::from_secs(300), Arc::new(BTreeMap::new()));
        let input = step.project_input(&ctx).unwrap();
        assert_eq!(input["cluster_name"], "myapp-dev");
    }
}
