//! kubectl CLI adapter: apply manifests, read back pod status and logs.

use std::time::Duration;

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use serde::{Deserialize, Serialize};

use super::{classify_auth_failure, combined_redacted};
use crate::command::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restart_count: i64,
}

pub struct KubectlAdapter {
    runner: CommandRunner,
}

impl KubectlAdapter {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub async fn apply(&self, manifest_path: &str, namespace: &str) -> Result<String> {
        let spec = CommandSpec::new("kubectl")
            .args(["apply", "-f", manifest_path, "-n", namespace])
            .timeout(Duration::from_secs(120));
        let out = self.runner.run(spec).await?;
        let combined = combined_redacted(&out);

        if !out.success() {
            if let Some(err) = classify_auth_failure(ErrorDomain::Kubernetes, &combined, namespace) {
                return Err(err);
            }
            let code = if combined.to_lowercase().contains("invalid") || combined.to_lowercase().contains("no matches for kind") {
                ErrorCode::ManifestInvalid
            } else {
                ErrorCode::DeploymentFailed
            };
            return Err(CtnrError::new(code, ErrorDomain::Kubernetes, format!("kubectl apply failed: {combined}"))
                .with_context("manifest_path", manifest_path)
                .with_context("namespace", namespace));
        }

        Ok(out.stdout_string())
    }

    pub async fn get_pods(&self, app_name: &str, namespace: &str) -> Result<Vec<PodSummary>> {
        let spec = CommandSpec::new("kubectl").args([
            "get",
            "pods",
            "-n",
            namespace,
            "-l",
            &format!("app={app_name}"),
            "-o",
            "json",
        ]);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("kubectl get pods failed: {}", combined_redacted(&out)),
            ));
        }

        parse_pod_list(&out.stdout_string())
    }

    pub async fn logs(&self, pod_name: &str, namespace: &str, tail_lines: u32) -> Result<String> {
        let spec = CommandSpec::new("kubectl").args([
            "logs",
            pod_name,
            "-n",
            namespace,
            "--tail",
            &tail_lines.to_string(),
        ]);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::NotFound,
                ErrorDomain::Kubernetes,
                format!("kubectl logs failed for {pod_name}: {}", combined_redacted(&out)),
            ));
        }
        Ok(out.stdout_string())
    }

    pub async fn create_namespace_if_absent(&self, namespace: &str) -> Result<()> {
        let spec = CommandSpec::new("kubectl").args(["create", "namespace", namespace]);
        let out = self.runner.run(spec).await?;
        if !out.success() && !combined_redacted(&out).to_lowercase().contains("already exists") {
            return Err(CtnrError::new(
                ErrorCode::DeploymentFailed,
                ErrorDomain::Kubernetes,
                format!("failed to create namespace {namespace}: {}", combined_redacted(&out)),
            ));
        }
        Ok(())
    }
}

/// Minimal subset of `kubectl get pods -o json` we actually read: name, phase,
/// container-ready aggregate, restart count.
fn parse_pod_list(json: &str) -> Result<Vec<PodSummary>> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let items = value.get("items").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut pods = Vec::new();
    for item in items {
        let name = item
            .pointer("/metadata/name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let phase = item
            .pointer("/status/phase")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown")
            .to_string();

        let container_statuses = item
            .pointer("/status/containerStatuses")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        let ready = !container_statuses.is_empty()
            && container_statuses
                .iter()
                .all(|c| c.get("ready").and_then(|v| v.as_bool()).unwrap_or(false));
        let restart_count = container_statuses
            .iter()
            .filter_map(|c| c.get("restartCount").and_then(|v| v.as_i64()))
            .sum();

        pods.push(PodSummary {
            name,
            phase,
            ready,
            restart_count,
        });
    }

    Ok(pods)
}
