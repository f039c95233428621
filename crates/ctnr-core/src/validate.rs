use serde::{Deserialize, Serialize};

/// Severity of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single issue surfaced by a validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub code: String,
    pub severity: Severity,
    /// Path within the validated input this finding refers to (dotted, e.g. `dockerfile.ports`).
    pub path: String,
    pub message: String,
}

impl Finding {
    pub fn error(code: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn warning(code: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn info(code: impl Into<String>, path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: Severity::Info,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Aggregate result of running one or more validators over a single input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        !self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    /// `max(0, 100 - 20*errors - 5*warnings - 1*infos)`.
    pub fn quality_score(&self) -> u32 {
        let errors = self.count(Severity::Error) as i64;
        let warnings = self.count(Severity::Warning) as i64;
        let infos = self.count(Severity::Info) as i64;
        (100 - 20 * errors - 5 * warnings - infos).max(0) as u32
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Associative merge: concatenates findings from both results.
    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.findings.extend(other.findings);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_result_is_valid_with_full_score() {
        let result = ValidationResult::ok();
        assert!(result.is_valid());
        assert_eq!(result.quality_score(), 100);
    }

    #[test]
    fn errors_make_result_invalid() {
        let result = ValidationResult::new(vec![Finding::error("E1", "dockerfile", "missing FROM")]);
        assert!(!result.is_valid());
        assert_eq!(result.quality_score(), 80);
    }

    #[test]
    fn score_floors_at_zero() {
        let findings = (0..10).map(|i| Finding::error(format!("E{i}"), "x", "bad")).collect();
        let result = ValidationResult::new(findings);
        assert_eq!(result.quality_score(), 0);
    }

    #[test]
    fn merge_is_associative() {
        let a = ValidationResult::new(vec![Finding::warning("W1", "a", "m")]);
        let b = ValidationResult::new(vec![Finding::error("E1", "b", "m")]);
        let c = ValidationResult::new(vec![Finding::info("I1", "c", "m")]);

        let left = a.clone().merge(b.clone()).merge(c.clone());
        let right = a.merge(b.merge(c));

        assert_eq!(left.findings.len(), right.findings.len());
        assert_eq!(left.quality_score(), right.quality_score());
    }
}
