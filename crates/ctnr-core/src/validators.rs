//! Concrete validators over the tool/step input shapes named in §4.5.
//!
//! Each function is pure given its typed input and returns the findings it
//! produced; callers `ValidationResult::new(...)` (or `.merge`) the results
//! of whichever validators apply to a given tool. The one exception to
//! "no I/O" is [`validate_repo_path`], which has to stat the path to confirm
//! it exists and is non-empty.

use std::path::Path;

use regex::Regex;

use crate::validate::{Finding, ValidationResult};

/// A repository path must exist, be a directory, and contain at least one entry.
pub fn validate_repo_path(repo_path: &str) -> ValidationResult {
    let mut findings = Vec::new();
    let path = Path::new(repo_path);

    if repo_path.trim().is_empty() {
        findings.push(Finding::error("REPO_PATH_EMPTY", "repo_path", "repo_path must not be empty"));
        return ValidationResult::new(findings);
    }

    match path.metadata() {
        Ok(meta) if !meta.is_dir() => {
            findings.push(Finding::error(
                "REPO_PATH_NOT_DIR",
                "repo_path",
                format!("{repo_path} exists but is not a directory"),
            ));
        }
        Ok(_) => match std::fs::read_dir(path) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    findings.push(Finding::warning(
                        "REPO_PATH_EMPTY_DIR",
                        "repo_path",
                        format!("{repo_path} contains no files"),
                    ));
                }
            }
            Err(e) => {
                findings.push(Finding::error(
                    "REPO_PATH_UNREADABLE",
                    "repo_path",
                    format!("cannot list {repo_path}: {e}"),
                ));
            }
        },
        Err(e) => {
            findings.push(Finding::error(
                "REPO_PATH_NOT_FOUND",
                "repo_path",
                format!("{repo_path} does not exist: {e}"),
            ));
        }
    }

    ValidationResult::new(findings)
}

/// Basic Dockerfile well-formedness: non-empty, contains a `FROM`, and
/// doesn't reference an empty base image.
pub fn validate_dockerfile_basic(contents: &str) -> ValidationResult {
    let mut findings = Vec::new();

    if contents.trim().is_empty() {
        findings.push(Finding::error("DOCKERFILE_EMPTY", "dockerfile", "Dockerfile is empty"));
        return ValidationResult::new(findings);
    }

    let lines: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .collect();

    let has_from = lines.iter().any(|l| l.to_uppercase().starts_with("FROM"));
    if !has_from {
        findings.push(Finding::error(
            "DOCKERFILE_MISSING_FROM",
            "dockerfile.from",
            "Dockerfile has no FROM instruction",
        ));
    }

    if !lines.iter().any(|l| l.to_uppercase().starts_with("CMD") || l.to_uppercase().starts_with("ENTRYPOINT")) {
        findings.push(Finding::warning(
            "DOCKERFILE_MISSING_ENTRYPOINT",
            "dockerfile.entrypoint",
            "Dockerfile has neither CMD nor ENTRYPOINT",
        ));
    }

    if !lines.iter().any(|l| l.to_uppercase().starts_with("EXPOSE")) {
        findings.push(Finding::info(
            "DOCKERFILE_NO_EXPOSE",
            "dockerfile.ports",
            "Dockerfile does not declare an EXPOSE port",
        ));
    }

    ValidationResult::new(findings)
}

/// Manifest YAML parses and contains the fields a Kubernetes object needs
/// (`apiVersion`, `kind`, `metadata.name`).
pub fn validate_manifest_yaml(name: &str, contents: &str) -> ValidationResult {
    let mut findings = Vec::new();

    let value: serde_yaml::Value = match serde_yaml::from_str(contents) {
        Ok(v) => v,
        Err(e) => {
            findings.push(Finding::error(
                "MANIFEST_PARSE_FAILED",
                format!("manifest.{name}"),
                format!("{name} failed to parse as YAML: {e}"),
            ));
            return ValidationResult::new(findings);
        }
    };

    for field in ["apiVersion", "kind"] {
        if value.get(field).is_none() {
            findings.push(Finding::error(
                "MANIFEST_MISSING_FIELD",
                format!("manifest.{name}.{field}"),
                format!("{name} is missing required field `{field}`"),
            ));
        }
    }

    match value.get("metadata").and_then(|m| m.get("name")) {
        None => findings.push(Finding::error(
            "MANIFEST_MISSING_NAME",
            format!("manifest.{name}.metadata.name"),
            format!("{name} is missing metadata.name"),
        )),
        Some(n) if n.as_str().map(str::is_empty).unwrap_or(true) => {
            findings.push(Finding::error(
                "MANIFEST_EMPTY_NAME",
                format!("manifest.{name}.metadata.name"),
                format!("{name}'s metadata.name is empty"),
            ));
        }
        _ => {}
    }

    ValidationResult::new(findings)
}

/// Image reference shape: `[registry/]repository[:tag|@digest]`, lowercase,
/// no whitespace.
pub fn validate_image_ref(image_ref: &str) -> ValidationResult {
    let mut findings = Vec::new();

    if image_ref.trim().is_empty() {
        findings.push(Finding::error("IMAGE_REF_EMPTY", "image_ref", "image reference must not be empty"));
        return ValidationResult::new(findings);
    }

    if image_ref.chars().any(char::is_whitespace) {
        findings.push(Finding::error(
            "IMAGE_REF_WHITESPACE",
            "image_ref",
            "image reference must not contain whitespace",
        ));
    }

    if image_ref.chars().any(|c| c.is_ascii_uppercase()) {
        findings.push(Finding::error(
            "IMAGE_REF_UPPERCASE",
            "image_ref",
            "image reference components must be lowercase",
        ));
    }

    let re = Regex::new(r"^[a-z0-9]+(?:[._-][a-z0-9]+)*(?:/[a-z0-9]+(?:[._-][a-z0-9]+)*)*(?::[\w][\w.-]{0,127}|@sha256:[a-f0-9]{64})?$").unwrap();
    if !re.is_match(image_ref) {
        findings.push(Finding::warning(
            "IMAGE_REF_UNUSUAL_SHAPE",
            "image_ref",
            format!("{image_ref} does not match the common registry/repo:tag shape"),
        ));
    }

    ValidationResult::new(findings)
}

/// Tag shape: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`, per the Docker reference grammar.
pub fn validate_tag(tag: &str) -> ValidationResult {
    let mut findings = Vec::new();
    let re = Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").unwrap();

    if !re.is_match(tag) {
        findings.push(Finding::error(
            "TAG_INVALID_SHAPE",
            "tag",
            format!("{tag} is not a valid image tag"),
        ));
    }

    ValidationResult::new(findings)
}

/// Kubernetes namespace name shape: RFC 1123 label.
pub fn validate_namespace(namespace: &str) -> ValidationResult {
    let mut findings = Vec::new();
    let re = Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").unwrap();

    if !re.is_match(namespace) {
        findings.push(Finding::error(
            "NAMESPACE_INVALID_SHAPE",
            "namespace",
            format!("{namespace} is not a valid Kubernetes namespace name"),
        ));
    }

    ValidationResult::new(findings)
}

/// App/session name shape shared by `generate_k8s_manifests` and
/// `verify_deployment`: must be non-empty and usable as a DNS label prefix.
pub fn validate_app_name(app_name: &str) -> ValidationResult {
    let mut findings = Vec::new();
    let re = Regex::new(r"^[a-z0-9]([a-z0-9-]{0,38}[a-z0-9])?$").unwrap();

    if !re.is_match(app_name) {
        findings.push(Finding::error(
            "APP_NAME_INVALID_SHAPE",
            "app_name",
            format!("{app_name} is not a valid application name"),
        ));
    }

    ValidationResult::new(findings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_path_missing_is_error() {
        let result = validate_repo_path("/no/such/path/ctnr-test");
        assert!(!result.is_valid());
    }

    #[test]
    fn repo_path_existing_dir_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.js"), "console.log('hi')").unwrap();
        let result = validate_repo_path(dir.path().to_str().unwrap());
        assert!(result.is_valid());
    }

    #[test]
    fn dockerfile_requires_from() {
        let result = validate_dockerfile_basic("CMD [\"node\", \"index.js\"]");
        assert!(!result.is_valid());
        assert_eq!(result.count(crate::validate::Severity::Error), 1);
    }

    #[test]
    fn dockerfile_happy_path_has_no_errors() {
        let result = validate_dockerfile_basic("FROM node:20-slim\nEXPOSE 3000\nCMD [\"node\", \"index.js\"]");
        assert!(result.is_valid());
    }

    #[test]
    fn manifest_requires_api_version_kind_and_name() {
        let result = validate_manifest_yaml("deployment.yaml", "spec:\n  replicas: 1");
        assert!(!result.is_valid());
        assert!(result.count(crate::validate::Severity::Error) >= 2);
    }

    #[test]
    fn manifest_with_required_fields_is_valid() {
        let yaml = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: app\n";
        let result = validate_manifest_yaml("deployment.yaml", yaml);
        assert!(result.is_valid());
    }

    #[test]
    fn image_ref_rejects_whitespace_and_uppercase() {
        assert!(!validate_image_ref("My Image").is_valid());
        assert!(!validate_image_ref("MyImage:latest").is_valid());
        assert!(validate_image_ref("registry.example.com/app:v1.0.0").is_valid());
    }

    #[test]
    fn tag_shape() {
        assert!(validate_tag("v1.2.3").is_valid());
        assert!(validate_tag("latest").is_valid());
        assert!(!validate_tag("-bad").is_valid());
    }

    #[test]
    fn namespace_shape() {
        assert!(validate_namespace("default").is_valid());
        assert!(validate_namespace("my-app-ns").is_valid());
        assert!(!validate_namespace("Bad_NS").is_valid());
    }
}
