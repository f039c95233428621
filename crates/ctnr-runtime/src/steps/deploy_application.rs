//! `DeployApplication` — applies the rendered deployment manifest with
//! kubectl, loading the image into the local cluster first on the
//! no-registry-push path `setup_cluster` may have selected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorDomain, Result};
use ctnr_core::workflow::{ErrorHistoryEntry, Fixer, Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::ChatMessage;
use crate::context::AppContext;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct DeployApplicationInput {
    pub manifest_path: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployApplicationOutput {
    pub namespace: String,
    pub applied_output: String,
}

struct DeploymentManifestFixer {
    ctx: Arc<AppContext>,
}

#[async_trait]
impl Fixer for DeploymentManifestFixer {
    async fn fix(&self, input: &Value, error: &CtnrError, _history: &[ErrorHistoryEntry]) -> std::result::Result<Value, CtnrError> {
        let input: DeployApplicationInput = serde_json::from_value(input.clone())?;
        let current = std::fs::read_to_string(&input.manifest_path).unwrap_or_default();

        let prompt = vec![
            ChatMessage::system("You repair a Kubernetes deployment manifest that `kubectl apply` rejected. Reply with the full corrected YAML only."),
            ChatMessage::user(format!("Current manifest:\n{current}\n\nkubectl error:\n{}", error.message)),
        ];
        let revised = self.ctx.llm.complete(prompt).await?;
        std::fs::write(&input.manifest_path, revised.trim())?;

        Ok(serde_json::to_value(input)?)
    }
}

pub struct DeployApplicationStep {
    ctx: Arc<AppContext>,
    fixer: DeploymentManifestFixer,
}

impl DeployApplicationStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            fixer: DeploymentManifestFixer { ctx: ctx.clone() },
            ctx,
        }
    }
}

#[async_trait]
impl Step for DeployApplicationStep {
    fn name(&self) -> &'static str {
        "deploy_application"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(180)
    }

    fn fixer(&self) -> Option<&dyn Fixer> {
        Some(&self.fixer)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let manifest_path = ctx
            .output_of("verify_manifests")
            .and_then(|v| v.get("deployment_path"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CtnrError::invalid_state(ErrorDomain::Workflow, "deploy_application requires a prior verify_manifests output"))?;
        let namespace = ctx.output_of("setup_cluster").and_then(|v| v.get("namespace")).and_then(|v| v.as_str()).map(str::to_string);

        Ok(serde_json::json!({ "manifest_path": manifest_path, "namespace": namespace }))
    }

    async fn execute(&self, ctx: &StepContext, input: Value) -> Result<Value> {
        let input: DeployApplicationInput = serde_json::from_value(input)?;
        let namespace = input.namespace.clone().unwrap_or_else(|| "default".to_string());

        let registry_push_required = ctx
            .output_of("setup_cluster")
            .and_then(|v| v.get("registry_push_required"))
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        if !registry_push_required {
            if let (Some(image_ref), Some(cluster_name)) = (
                ctx.output_of("tag_image").and_then(|v| v.get("target")).and_then(|v| v.as_str()),
                ctx.output_of("setup_cluster").and_then(|v| v.get("cluster_name")).and_then(|v| v.as_str()),
            ) {
                self.ctx.kind.load_image(image_ref, cluster_name).await?;
            }
        }

        let applied_output = self.ctx.kubectl.apply(&input.manifest_path, &namespace).await?;

        let output = DeployApplicationOutput { namespace, applied_output };
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
    fn project_input_requires_prior_verify_manifests_output() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "x");
        let step = DeployApplicationStep::new(app_ctx);
        let ctx = StepContext::new(SessionId::from("s1"), Arc::new(NullProgressEmitter), Duration::from_secs(180), Arc::new(BTreeMap::new()));
        assert!(step.project_input(&ctx).is_err());
    }

    #[tokio::test]
    async fn fixer_rewrites_manifest_from_kubectl_error() {
        let dir = tempfile::tempdir().unwrap();
        let manifest_path = dir.path().join("deployment.yaml");
        std::fs::write(&manifest_path, "kind: Deploymentx\n").unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "kind: Deployment\n");

        let step = DeployApplicationStep::new(app_ctx);
        let input = serde_json::json!({"manifest_path": manifest_path.to_str().unwrap()});
        let err = CtnrError::new(ctnr_core::error::ErrorCode::ManifestInvalid, ErrorDomain::Kubernetes, "no matches for kind Deploymentx");
        step.fixer().unwrap().fix(&input, &err, &[]).await.unwrap();
        let contents = std::fs::read_to_string(&manifest_path).unwrap();
        assert!(contents.contains("kind: Deployment"));
    }
}
