//! Vulnerability/secret scanner adapter. Shells out to a Trivy-shaped CLI
//! (`trivy image --format json <ref>`) and extracts the documented fields —
//! it does not attempt to fully parse arbitrary scanner output (§1 Non-goals).

use std::time::Duration;

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use serde::{Deserialize, Serialize};

use super::combined_redacted;
use crate::command::{CommandRunner, CommandSpec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VulnSeverity {
    Unknown,
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: String,
    pub package: String,
    pub severity: VulnSeverity,
    pub fixed_version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub image_ref: String,
    pub vulnerabilities: Vec<Vulnerability>,
    pub secrets_found: usize,
    pub critical_count: usize,
    pub high_count: usize,
}

pub struct ScannerAdapter {
    runner: CommandRunner,
}

impl ScannerAdapter {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    pub async fn scan(&self, image_ref: &str) -> Result<ScanReport> {
        let spec = CommandSpec::new("trivy")
            .args(["image", "--format", "json", "--scanners", "vuln,secret", image_ref])
            .timeout(Duration::from_secs(600));
        let out = self.runner.run(spec).await?;

        if !out.success() {
            return Err(CtnrError::new(
                ErrorCode::ScanFailed,
                ErrorDomain::Scanner,
                format!("trivy scan failed: {}", combined_redacted(&out)),
            )
            .with_context("image_ref", image_ref));
        }

        parse_report(image_ref, &out.stdout_string())
    }
}

fn parse_report(image_ref: &str, json: &str) -> Result<ScanReport> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    let results = value.get("Results").and_then(|v| v.as_array()).cloned().unwrap_or_default();

    let mut vulnerabilities = Vec::new();
    let mut secrets_found = 0usize;

    for result in &results {
        if let Some(vulns) = result.get("Vulnerabilities").and_then(|v| v.as_array()) {
            for v in vulns {
                let severity = match v.get("Severity").and_then(|s| s.as_str()).unwrap_or("UNKNOWN") {
                    "LOW" => VulnSeverity::Low,
                    "MEDIUM" => VulnSeverity::Medium,
                    "HIGH" => VulnSeverity::High,
                    "CRITICAL" => VulnSeverity::Critical,
                    _ => VulnSeverity::Unknown,
                };
                vulnerabilities.push(Vulnerability {
                    id: v.get("VulnerabilityID").and_then(|s| s.as_str()).unwrap_or("UNKNOWN").to_string(),
                    package: v.get("PkgName").and_then(|s| s.as_str()).unwrap_or("unknown").to_string(),
                    severity,
                    fixed_version: v.get("FixedVersion").and_then(|s| s.as_str()).map(str::to_string),
                });
            }
        }
        if let Some(secrets) = result.get("Secrets").and_then(|v| v.as_array()) {
            secrets_found += secrets.len();
        }
    }

    let critical_count = vulnerabilities.iter().filter(|v| v.severity == VulnSeverity::Critical).count();
    let high_count = vulnerabilities.iter().filter(|v| v.severity == VulnSeverity::High).count();

    Ok(ScanReport {
        image_ref: image_ref.to_string(),
        vulnerabilities,
        secrets_found,
        critical_count,
        high_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_vulnerabilities_and_secrets() {
        let json = serde_json::json!({
            "Results": [{
                "Vulnerabilities": [
                    {"VulnerabilityID": "CVE-2024-1", "PkgName": "openssl", "Severity": "CRITICAL", "FixedVersion": "3.0.1"},
                    {"VulnerabilityID": "CVE-2024-2", "PkgName": "curl", "Severity": "LOW"}
                ],
                "Secrets": [{"RuleID": "aws-access-key"}]
            }]
        })
        .to_string();

        let report = parse_report("app:latest", &json).unwrap();
        assert_eq!(report.vulnerabilities.len(), 2);
        assert_eq!(report.critical_count, 1);
        assert_eq!(report.secrets_found, 1);
    }

    #[test]
    fn empty_results_is_a_clean_report() {
        let json = serde_json::json!({"Results": []}).to_string();
        let report = parse_report("app:latest", &json).unwrap();
        assert!(report.vulnerabilities.is_empty());
        assert_eq!(report.secrets_found, 0);
    }
}
