//! `VerifyManifests` — renders the deployment/service/configmap manifests
//! from the template catalog for the chosen image and app name, writes them
//! to disk, and validates each against [`validate_manifest_yaml`]. Backs the
//! standalone `generate_k8s_manifests` tool as well as the full pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::validate::{Severity, ValidationResult};
use ctnr_core::validators::validate_manifest_yaml;
use ctnr_core::workflow::{ErrorHistoryEntry, Fixer, Step, StepContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapters::ChatMessage;
use crate::context::AppContext;
use crate::templates::TemplateCategory;

const KINDS: &[&str] = &["deployment", "service", "configmap"];

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct VerifyManifestsInput {
    pub image_ref: String,
    pub app_name: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub template_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyManifestsOutput {
    pub manifests_dir: String,
    pub deployment_path: String,
    pub service_path: String,
    pub configmap_path: String,
    pub quality_score: u32,
}

fn manifests_dir(repo_path: &str, app_name: &str) -> String {
    if repo_path.is_empty() {
        std::env::temp_dir().join(format!("ctnr-manifests-{app_name}")).to_string_lossy().into_owned()
    } else {
        format!("{}/k8s", repo_path.trim_end_matches('/'))
    }
}

fn manifest_path(dir: &str, kind: &str) -> String {
    format!("{dir}/{kind}.yaml")
}

struct ManifestFixer {
    ctx: Arc<AppContext>,
}

#[async_trait]
impl Fixer for ManifestFixer {
    async fn fix(&self, input: &Value, error: &CtnrError, _history: &[ErrorHistoryEntry]) -> std::result::Result<Value, CtnrError> {
        let findings: Vec<ctnr_core::validate::Finding> = error
            .context
            .get("findings")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();

        for kind in KINDS {
            let bad = findings.iter().any(|f| f.path.contains(&format!(".{kind}.")));
            if !bad {
                continue;
            }
            let dir = error.context.get("manifests_dir").and_then(|v| v.as_str()).unwrap_or_default();
            let path = manifest_path(dir, kind);
            let current = std::fs::read_to_string(&path).unwrap_or_default();
            let kind_findings: Vec<&ctnr_core::validate::Finding> = findings.iter().filter(|f| f.path.contains(&format!(".{kind}."))).collect();
            let findings_text = kind_findings.iter().map(|f| format!("- {}: {}", f.code, f.message)).collect::<Vec<_>>().join("\n");

            let prompt = vec![
                ChatMessage::system("You repair Kubernetes manifest YAML. Reply with the full corrected YAML only, no commentary."),
                ChatMessage::user(format!("Current {kind} manifest:\n{current}\n\nValidation issues:\n{findings_text}")),
            ];
            let revised = self.ctx.llm.complete(prompt).await?;
            std::fs::write(&path, revised.trim())?;
        }

        Ok(input.clone())
    }
}

pub struct VerifyManifestsStep {
    ctx: Arc<AppContext>,
    fixer: ManifestFixer,
}

impl VerifyManifestsStep {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self {
            fixer: ManifestFixer { ctx: ctx.clone() },
            ctx,
        }
    }
}

#[async_trait]
impl Step for VerifyManifestsStep {
    fn name(&self) -> &'static str {
        "verify_manifests"
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(60)
    }

    fn fixer(&self) -> Option<&dyn Fixer> {
        Some(&self.fixer)
    }

    fn project_input(&self, ctx: &StepContext) -> Result<Value> {
        let image_ref = ctx
            .output_of("push_image")
            .and_then(|v| v.get("image_ref"))
            .or_else(|| ctx.output_of("tag_image").and_then(|v| v.get("target")))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| CtnrError::invalid_state(ErrorDomain::Workflow, "verify_manifests requires a prior tag_image or push_image output"))?;

        let project_name = ctx.session_id.0.split('-').next().unwrap_or("app").to_string();

        Ok(serde_json::json!({
            "image_ref": image_ref,
            "app_name": project_name,
            "namespace": Value::Null,
            "template_name": Value::Null,
        }))
    }

    async fn execute(&self, ctx: &StepContext, input: Value) -> Result<Value> {
        let input: VerifyManifestsInput = serde_json::from_value(input)?;

        let language = ctx.output_of("analyze_repository").and_then(|v| v.get("language")).and_then(|v| v.as_str()).unwrap_or("generic");

        let known = self.ctx.templates.list(TemplateCategory::Manifest);
        let template_name = match &input.template_name {
            Some(hint) if known.contains(hint) => hint.clone(),
            _ => self.ctx.templates.resolve_language(language),
        };

        let dir = manifests_dir(&ctx.repo_path, &input.app_name);
        std::fs::create_dir_all(&dir)?;

        let mut result = ValidationResult::ok();
        let mut paths = std::collections::HashMap::new();
        for kind in KINDS {
            let rendered = self.ctx.templates.render_manifest(&template_name, kind, &input.image_ref, &input.app_name)?;
            let path = manifest_path(&dir, kind);
            std::fs::write(&path, &rendered)?;
            result = result.merge(validate_manifest_yaml(&format!("{kind}.yaml"), &rendered));
            paths.insert(kind.to_string(), path);
        }

        if !result.is_valid() {
            return Err(CtnrError::new(
                ErrorCode::ManifestInvalid,
                ErrorDomain::Workflow,
                format!("rendered manifests failed validation: {} error(s)", result.count(Severity::Error)),
            )
            .with_context("manifests_dir", dir)
            .with_context("findings", serde_json::to_value(&result.findings)?));
        }

        let output = VerifyManifestsOutput {
            manifests_dir: dir,
            deployment_path: paths.remove("deployment").unwrap_or_default(),
            service_path: paths.remove("service").unwrap_or_default(),
            configmap_path: paths.remove("configmap").unwrap_or_default(),
            quality_score: result.quality_score(),
        };
        Ok(serde_json::to_value(output)?)
    }
}
