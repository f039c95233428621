//! Thin capability interfaces over the command runner (and, for the LLM
//! adapter, over HTTP) implementing §4.3. Each adapter is stateless between
//! calls and classifies its underlying failure into a structured
//! [`ctnr_core::error::CtnrError`] before it ever reaches a step.

pub mod docker;
pub mod kind;
pub mod kubectl;
pub mod llm;
pub mod scanner;

pub use docker::DockerAdapter;
pub use kind::KindAdapter;
pub use kubectl::KubectlAdapter;
pub use llm::{ChatMessage, LlmAdapter, StaticLlmAdapter};
pub use scanner::ScannerAdapter;

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain};

use crate::command::CommandOutput;
use crate::redact::redact;

/// Registry hosts this orchestrator knows remediation text for. Matched as a
/// substring against the image reference / stderr so `docker login` style
/// guidance can be registry-specific.
const REGISTRY_GUIDANCE: &[(&str, &[&str])] = &[
    (
        "docker.io",
        &["Run `docker login` to authenticate with Docker Hub."],
    ),
    (
        "ghcr.io",
        &["Run `docker login ghcr.io -u <user> --password-stdin` with a PAT that has `write:packages`."],
    ),
    (
        "azurecr.io",
        &["Run `az acr login --name <registry>` to refresh your Azure Container Registry credentials."],
    ),
    (
        "amazonaws.com",
        &["Run `aws ecr get-login-password | docker login --username AWS --password-stdin <registry>`."],
    ),
    (
        "gcr.io",
        &["Run `gcloud auth configure-docker` to refresh Google Container Registry credentials."],
    ),
];

const AUTH_PATTERNS: &[&str] = &[
    "401",
    "unauthorized",
    "authentication failed",
    "authentication required",
    "denied: requested access to the resource is denied",
    "permission_denied",
    "forbidden",
];

/// Detect an authentication failure in combined stderr/stdout and build a
/// `PERMISSION_DENIED` error carrying registry-specific remediation text.
/// Returns `None` when the output doesn't look like an auth failure, so
/// callers fall back to their own domain-specific classification.
pub(crate) fn classify_auth_failure(
    domain: ErrorDomain,
    combined_output: &str,
    registry_hint: &str,
) -> Option<CtnrError> {
    let lower = combined_output.to_lowercase();
    if !AUTH_PATTERNS.iter().any(|p| lower.contains(p)) {
        return None;
    }

    let mut guidance: Vec<&str> = REGISTRY_GUIDANCE
        .iter()
        .filter(|(host, _)| registry_hint.contains(host) || combined_output.contains(host))
        .flat_map(|(_, tips)| tips.iter().copied())
        .collect();
    if guidance.is_empty() {
        guidance.push("Re-authenticate with the target registry (e.g. `docker login <registry>`).");
    }

    let mut err = CtnrError::new(
        ErrorCode::PermissionDenied,
        domain,
        redact(combined_output.lines().next().unwrap_or("authentication failed")),
    );
    for (i, tip) in guidance.into_iter().enumerate() {
        err = err.with_context(format!("suggestion_{i}"), tip);
    }
    Some(err)
}

/// Combine (redacted) stdout+stderr for pattern matching and error messages.
pub(crate) fn combined_redacted(output: &CommandOutput) -> String {
    redact(&format!("{}\n{}", output.stdout_string(), output.stderr_string()))
}
