//! `kind` (Kubernetes-in-Docker) adapter: ensure a local cluster plus a
//! pushable registry exist, and load images into it for the no-push path.

use std::time::Duration;

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};

use super::combined_redacted;
use crate::command::{CommandRunner, CommandSpec};

pub struct KindAdapter {
    runner: CommandRunner,
}

impl KindAdapter {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub async fn cluster_exists(&self, cluster_name: &str) -> Result<bool> {
        let spec = CommandSpec::new("kind").arg("get").arg("clusters");
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("kind get clusters failed: {}", combined_redacted(&out)),
            ));
        }
        Ok(out.stdout_string().lines().any(|l| l.trim() == cluster_name))
    }

    pub async fn create_cluster(&self, cluster_name: &str) -> Result<()> {
        if self.cluster_exists(cluster_name).await? {
            return Ok(());
        }

        let spec = CommandSpec::new("kind")
            .args(["create", "cluster", "--name", cluster_name])
            .timeout(Duration::from_secs(300));
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("kind create cluster failed: {}", combined_redacted(&out)),
            )
            .with_context("cluster_name", cluster_name));
        }
        Ok(())
    }

    pub async fn load_image(&self, image_ref: &str, cluster_name: &str) -> Result<()> {
        let spec = CommandSpec::new("kind")
            .args(["load", "docker-image", image_ref, "--name", cluster_name])
            .timeout(Duration::from_secs(180));
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("kind load docker-image failed: {}", combined_redacted(&out)),
            )
            .with_context("image_ref", image_ref));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_name_membership_is_exact_line_match() {
        let listing = "kind\nctnr-dev\nother-cluster\n";
        assert!(listing.lines().any(|l| l.trim() == "ctnr-dev"));
        assert!(!listing.lines().any(|l| l.trim() == "dev"));
    }
}
