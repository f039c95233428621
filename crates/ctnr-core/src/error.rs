use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable, machine-checkable error classification surfaced to MCP clients.
///
/// Marked `#[non_exhaustive]` so new failure classes can be added without
/// breaking callers that match on a catch-all arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Input
    ValidationFailed,
    InvalidParameter,
    MissingParameter,

    // Resource
    NotFound,
    ToolNotFound,
    AlreadyExists,
    AlreadyInUse,
    ResourceExhausted,

    // I/O
    IoError,
    NetworkError,
    Timeout,

    // Auth
    PermissionDenied,

    // Domain-specific
    ImageBuildFailed,
    ImagePushFailed,
    ImagePullFailed,
    ManifestInvalid,
    DeploymentFailed,
    ScanFailed,

    // State
    InvalidState,
    VersionMismatch,
    SchemaVersionMismatch,

    // Generic
    NotImplemented,
    InternalError,
    Unknown,
    Cancelled,
}

impl ErrorCode {
    /// Whether this class of failure is worth retrying without changing the input.
    ///
    /// Matches the orchestrator's retry classification table exactly: only
    /// the codes named there are retryable, everything else (including
    /// domain codes like `IMAGE_PUSH_FAILED` that aren't in the table) is not.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::NetworkError
                | ErrorCode::ImageBuildFailed
                | ErrorCode::ManifestInvalid
                | ErrorCode::DeploymentFailed
                | ErrorCode::ValidationFailed
        )
    }

    /// Whether a fixer (AI-assisted input repair) should run before retrying.
    pub fn is_fixable(self) -> bool {
        matches!(
            self,
            ErrorCode::ImageBuildFailed
                | ErrorCode::ManifestInvalid
                | ErrorCode::DeploymentFailed
                | ErrorCode::ValidationFailed
        )
    }
}

/// Broad domain a [`CtnrError`] originated in, independent of the specific code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorDomain {
    Session,
    Store,
    Command,
    Docker,
    Kubernetes,
    Scanner,
    Llm,
    Workflow,
    Dispatch,
    Config,
}

/// A single AI-assisted repair attempt recorded against a failing step input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub error_summary: String,
    pub applied: bool,
}

/// Structured, contextual error produced anywhere in the pipeline.
///
/// Carries enough state (`domain`, `step`, `attempt`, `context`, `fix_attempts`)
/// for the orchestrator to decide whether to retry, invoke a fixer, or abort,
/// and for the MCP client to render a useful message without re-deriving it
/// from a bare string.
#[derive(Debug, Error)]
#[error("{code:?} in {domain:?}: {message}")]
pub struct CtnrError {
    pub code: ErrorCode,
    pub domain: ErrorDomain,
    pub message: String,
    pub step: Option<String>,
    pub attempt: u32,
    pub context: BTreeMap<String, serde_json::Value>,
    pub fix_attempts: Vec<FixAttempt>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CtnrError {
    pub fn new(code: ErrorCode, domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self {
            code,
            domain,
            message: message.into(),
            step: None,
            attempt: 1,
            context: BTreeMap::new(),
            fix_attempts: Vec::new(),
            cause: None,
        }
    }

    pub fn with_step(mut self, step: impl Into<String>) -> Self {
        self.step = Some(step.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn record_fix_attempt(&mut self, error_summary: impl Into<String>, applied: bool) {
        self.fix_attempts.push(FixAttempt {
            attempt: self.fix_attempts.len() as u32 + 1,
            at: Utc::now(),
            error_summary: error_summary.into(),
            applied,
        });
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_fixable(&self) -> bool {
        self.code.is_fixable()
    }

    pub fn invalid_argument(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, domain, message)
    }

    pub fn not_found(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, domain, message)
    }

    pub fn invalid_state(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, domain, message)
    }

    pub fn timeout(domain: ErrorDomain, message: impl Into<String>, _elapsed: Duration) -> Self {
        Self::new(ErrorCode::Timeout, domain, message)
    }

    pub fn internal(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, domain, message)
    }

    pub fn cancelled(domain: ErrorDomain, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, domain, message)
    }
}

impl From<std::io::Error> for CtnrError {
    fn from(e: std::io::Error) -> Self {
        CtnrError::new(ErrorCode::IoError, ErrorDomain::Command, e.to_string()).with_cause(e)
    }
}

impl From<serde_json::Error> for CtnrError {
    fn from(e: serde_json::Error) -> Self {
        CtnrError::new(ErrorCode::InvalidParameter, ErrorDomain::Dispatch, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CtnrError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_codes() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::NetworkError.is_retryable());
        assert!(!ErrorCode::InvalidParameter.is_retryable());
        assert!(!ErrorCode::PermissionDenied.is_retryable());
        assert!(!ErrorCode::NotImplemented.is_retryable());
        assert!(!ErrorCode::InvalidState.is_retryable());
        assert!(!ErrorCode::ScanFailed.is_retryable());
    }

    #[test]
    fn fixable_codes() {
        assert!(ErrorCode::ImageBuildFailed.is_fixable());
        assert!(ErrorCode::ManifestInvalid.is_fixable());
        assert!(ErrorCode::DeploymentFailed.is_fixable());
        assert!(ErrorCode::ValidationFailed.is_fixable());
        assert!(!ErrorCode::Timeout.is_fixable());
    }

    #[test]
    fn builder_chain_sets_fields() {
        let err = CtnrError::new(ErrorCode::ImageBuildFailed, ErrorDomain::Docker, "boom")
            .with_step("build_image")
            .with_attempt(2)
            .with_context("image", "app:latest");

        assert_eq!(err.step.as_deref(), Some("build_image"));
        assert_eq!(err.attempt, 2);
        assert_eq!(err.context.get("image").unwrap(), "app:latest");
        assert!(err.is_fixable());
    }

    #[test]
    fn fix_attempt_history_accumulates() {
        let mut err = CtnrError::new(ErrorCode::ValidationFailed, ErrorDomain::Docker, "bad");
        err.record_fix_attempt("missing EXPOSE", true);
        err.record_fix_attempt("missing CMD", false);
        assert_eq!(err.fix_attempts.len(), 2);
        assert_eq!(err.fix_attempts[0].attempt, 1);
        assert!(!err.fix_attempts[1].applied);
    }
}
