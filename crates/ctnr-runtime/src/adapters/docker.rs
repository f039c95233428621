//! Docker CLI adapter: build, tag, push, inspect.

use std::time::Duration;

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};

use super::{classify_auth_failure, combined_redacted};
use crate::command::{CommandRunner, CommandSpec};
use crate::redact::redact;

/// Outcome of a `docker build`.
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub image_id: String,
    pub log_tail: String,
}

#[derive(Debug, Clone)]
pub struct PushOutput {
    pub digest: Option<String>,
}

pub struct DockerAdapter {
    runner: CommandRunner,
}

impl DockerAdapter {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub async fn build(&self, dockerfile_path: &str, context_dir: &str, image_name: &str) -> Result<BuildOutput> {
        let spec = CommandSpec::new("docker")
            .args(["build", "-f", dockerfile_path, "-t", image_name, context_dir])
            .timeout(Duration::from_secs(900));

        let out = self.runner.run(spec).await?;
        let combined = combined_redacted(&out);

        if !out.success() {
            if let Some(err) = classify_auth_failure(ErrorDomain::Docker, &combined, image_name) {
                return Err(err);
            }
            return Err(CtnrError::new(
                ErrorCode::ImageBuildFailed,
                ErrorDomain::Docker,
                format!("docker build failed (exit {}): {}", out.exit_code, tail(&combined, 20)),
            )
            .with_context("image_name", image_name)
            .with_context("log_tail", tail(&combined, 40)));
        }

        let image_id = self.inspect_id(image_name).await.unwrap_or_else(|_| image_name.to_string());

        Ok(BuildOutput {
            image_id,
            log_tail: tail(&combined, 40),
        })
    }

    pub async fn inspect_id(&self, image_ref: &str) -> Result<String> {
        let spec = CommandSpec::new("docker").args(["inspect", "--format", "{{.Id}}", image_ref]);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::NotFound,
                ErrorDomain::Docker,
                format!("image {image_ref} not found locally"),
            ));
        }
        Ok(out.stdout_string().trim().to_string())
    }

    pub async fn tag(&self, source: &str, target: &str) -> Result<()> {
        let spec = CommandSpec::new("docker").args(["tag", source, target]);
        let out = self.runner.run(spec).await?;
        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::InvalidParameter,
                ErrorDomain::Docker,
                format!("docker tag failed: {}", combined_redacted(&out)),
            ));
        }
        Ok(())
    }

    pub async fn push(&self, image_ref: &str) -> Result<PushOutput> {
        let spec = CommandSpec::new("docker")
            .args(["push", image_ref])
            .timeout(Duration::from_secs(600));
        let out = self.runner.run(spec).await?;
        let combined = combined_redacted(&out);

        if !out.success() {
            if let Some(err) = classify_auth_failure(ErrorDomain::Docker, &combined, image_ref) {
                return Err(err);
            }
            let code = if combined.to_lowercase().contains("network") || combined.to_lowercase().contains("timeout") {
                ErrorCode::NetworkError
            } else {
                ErrorCode::ImagePushFailed
            };
            return Err(CtnrError::new(code, ErrorDomain::Docker, format!("docker push failed: {}", tail(&combined, 20)))
                .with_context("image_ref", image_ref));
        }

        let digest = combined
            .lines()
            .find_map(|l| l.trim().strip_prefix("digest: ").map(|d| d.split_whitespace().next().unwrap_or(d).to_string()));

        Ok(PushOutput { digest })
    }

    pub async fn pull(&self, image_ref: &str) -> Result<()> {
        let spec = CommandSpec::new("docker").args(["pull", image_ref]).timeout(Duration::from_secs(600));
        let out = self.runner.run(spec).await?;
        if !out.success() {
            let combined = combined_redacted(&out);
            if let Some(err) = classify_auth_failure(ErrorDomain::Docker, &combined, image_ref) {
                return Err(err);
            }
            return Err(CtnrError::new(
                ErrorCode::ImagePullFailed,
                ErrorDomain::Docker,
                format!("docker pull failed: {}", tail(&combined, 20)),
            ));
        }
        Ok(())
    }
}

fn tail(s: &str, lines: usize) -> String {
    let all: Vec<&str> = s.lines().collect();
    let start = all.len().saturating_sub(lines);
    redact(&all[start..].join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_with_unknown_binary_surfaces_io_error() {
        let adapter = DockerAdapter::new(CommandRunner::new());
        // docker is very unlikely to exist in a sandboxed test runner; this
        // exercises the failure path rather than asserting CI has it.
        let result = adapter.build("Dockerfile", ".", "nonexistent-ctnr-test:latest").await;
        assert!(result.is_err());
    }

    #[test]
    fn tail_limits_to_requested_line_count() {
        let text = (0..100).map(|i| format!("line {i}")).collect::<Vec<_>>().join("\n");
        let result = tail(&text, 5);
        assert_eq!(result.lines().count(), 5);
        assert!(result.starts_with("line 95"));
    }
}
