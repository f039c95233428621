//! Registry of the eleven steps named in [`ctnr_core::workflow::DEFAULT_WORKFLOW_STEPS`].
//!
//! Built once at process startup from a shared [`AppContext`] and handed to
//! both the orchestrator (full `containerize_and_deploy` runs) and the
//! dispatcher (single-tool calls that drive exactly one step).

pub mod analyze_repository;
pub mod build_image;
pub mod deploy_application;
pub mod push_image;
pub mod resolve_base_images;
pub mod security_scan;
pub mod setup_cluster;
pub mod tag_image;
pub mod verify_deployment;
pub mod verify_dockerfile;
pub mod verify_manifests;

use std::collections::HashMap;
use std::sync::Arc;

use ctnr_core::workflow::Step;

use crate::context::AppContext;

use analyze_repository::AnalyzeRepositoryStep;
use build_image::BuildImageStep;
use deploy_application::DeployApplicationStep;
use push_image::PushImageStep;
use resolve_base_images::ResolveBaseImagesStep;
use security_scan::SecurityScanStep;
use setup_cluster::SetupClusterStep;
use tag_image::TagImageStep;
use verify_deployment::VerifyDeploymentStep;
use verify_dockerfile::VerifyDockerfileStep;
use verify_manifests::VerifyManifestsStep;

/// Name → step lookup used by both the orchestrator and the dispatcher.
pub struct StepRegistry {
    steps: HashMap<&'static str, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let mut steps: HashMap<&'static str, Arc<dyn Step>> = HashMap::new();

        let entries: Vec<Arc<dyn Step>> = vec![
            Arc::new(AnalyzeRepositoryStep::new(ctx.clone())),
            Arc::new(ResolveBaseImagesStep::new(ctx.clone())),
            Arc::new(VerifyDockerfileStep::new(ctx.clone())),
            Arc::new(BuildImageStep::new(ctx.clone())),
            Arc::new(SecurityScanStep::new(ctx.clone())),
            Arc::new(TagImageStep::new(ctx.clone())),
            Arc::new(PushImageStep::new(ctx.clone())),
            Arc::new(VerifyManifestsStep::new(ctx.clone())),
            Arc::new(SetupClusterStep::new(ctx.clone())),
            Arc::new(DeployApplicationStep::new(ctx.clone())),
            Arc::new(VerifyDeploymentStep::new(ctx)),
        ];

        for step in entries {
            steps.insert(step.name(), step);
        }

        Self { steps }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.keys().copied().collect()
    }

    /// Swap in a test double for one registered step, leaving the rest of the
    /// real pipeline untouched.
    #[cfg(test)]
    pub fn with_step_override(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.insert(step.name(), step);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_default_workflow_step() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "node");
        let registry = StepRegistry::new(app_ctx);

        for name in ctnr_core::workflow::DEFAULT_WORKFLOW_STEPS {
            assert!(registry.get(name).is_some(), "missing step {name}");
        }
    }
}
