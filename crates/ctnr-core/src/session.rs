use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::workflow::ErrorHistoryEntry;

/// Opaque session identifier. Either supplied by the MCP client or minted by
/// the first tool call that needs one (`<tool>-<unix_millis>`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn generate(prefix: &str) -> Self {
        let millis = Utc::now().timestamp_millis();
        Self(format!("{prefix}-{millis}"))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a persisted session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Suspended,
    Expired,
}

/// A persisted unit of pipeline state, keyed by [`SessionId`].
///
/// Owned exclusively by the session store; every other component only ever
/// sees a clone handed back from a store operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Outputs recorded per completed/skipped step, keyed by step name.
    #[serde(default)]
    pub step_outputs: BTreeMap<String, serde_json::Value>,
    /// Name of the last step that failed, if the session's last run ended in failure.
    #[serde(default)]
    pub last_failed_step: Option<String>,
    /// Whether `last_failed_step`'s failure was retryable (drives resume semantics).
    #[serde(default)]
    pub last_failure_retryable: bool,
    /// Rolling record of every failed attempt (and any fixer applied) across
    /// the run, mirrored from the in-flight workflow's bounded history after
    /// each attempt so a caller can observe it even on eventual success.
    #[serde(default)]
    pub fix_history: Vec<ErrorHistoryEntry>,
}

impl Session {
    pub fn new(id: SessionId, ttl: Option<chrono::Duration>) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            expires_at: ttl.map(|d| now + d),
            status: SessionStatus::Active,
            labels: BTreeMap::new(),
            step_outputs: BTreeMap::new(),
            last_failed_step: None,
            last_failure_retryable: false,
            fix_history: Vec::new(),
        }
    }

    /// CAS version token: `updated_at` rendered as Unix nanoseconds.
    pub fn version(&self) -> i64 {
        self.updated_at.timestamp_nanos_opt().unwrap_or(0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(exp) if exp <= now) || self.status == SessionStatus::Expired
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn record_step_output(&mut self, step: impl Into<String>, value: serde_json::Value) {
        self.step_outputs.insert(step.into(), value);
        self.last_failed_step = None;
        self.touch();
    }

    pub fn record_step_failure(&mut self, step: impl Into<String>, retryable: bool) {
        self.last_failed_step = Some(step.into());
        self.last_failure_retryable = retryable;
        self.touch();
    }

    /// Replace the mirrored fix history with the workflow's current
    /// accumulated list. Called after every attempt, success or failure, so
    /// the last write always reflects the full run so far.
    pub fn record_fix_history(&mut self, history: Vec<ErrorHistoryEntry>) {
        self.fix_history = history;
        self.touch();
    }
}

/// AND-combined predicate set for [`crate::store::SessionStore::list`].
///
/// Every field left `None` is ignored; an empty `SessionFilters::default()`
/// matches every session, exactly like the unfiltered call it replaces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilters {
    pub status: Option<SessionStatus>,
}

impl SessionFilters {
    pub fn with_status(status: SessionStatus) -> Self {
        Self { status: Some(status) }
    }

    pub fn matches(&self, session: &Session) -> bool {
        match self.status {
            Some(want) => want == session.status,
            None => true,
        }
    }
}

/// Aggregate counters returned by [`crate::store::SessionStore::stats`].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: usize,
    pub active: usize,
    pub suspended: usize,
    pub expired: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_generate_uses_prefix() {
        let id = SessionId::generate("build_image");
        assert!(id.0.starts_with("build_image-"));
    }

    #[test]
    fn expiry_checks_both_fields() {
        let mut session = Session::new(SessionId::from("s1"), None);
        assert!(!session.is_expired(Utc::now()));

        session.status = SessionStatus::Expired;
        assert!(session.is_expired(Utc::now()));
    }

    #[test]
    fn record_step_output_clears_previous_failure() {
        let mut session = Session::new(SessionId::from("s1"), None);
        session.record_step_failure("build_image", true);
        assert!(session.last_failed_step.is_some());

        session.record_step_output("build_image", serde_json::json!({"image_id": "sha256:abc"}));
        assert!(session.last_failed_step.is_none());
        assert!(session.step_outputs.contains_key("build_image"));
    }

    #[test]
    fn filters_default_matches_everything() {
        let session = Session::new(SessionId::from("s1"), None);
        assert!(SessionFilters::default().matches(&session));
    }

    #[test]
    fn filters_by_status_excludes_non_matching() {
        let mut session = Session::new(SessionId::from("s1"), None);
        session.status = SessionStatus::Suspended;
        let filters = SessionFilters::with_status(SessionStatus::Active);
        assert!(!filters.matches(&session));

        let filters = SessionFilters::with_status(SessionStatus::Suspended);
        assert!(filters.matches(&session));
    }

    #[test]
    fn version_is_monotonic_with_touch() {
        let mut session = Session::new(SessionId::from("s1"), None);
        let v1 = session.version();
        std::thread::sleep(std::time::Duration::from_millis(2));
        session.touch();
        assert!(session.version() > v1);
    }
}
