//! Mock tool dispatcher for testing.
//!
//! Records tool invocations (name, session, arguments) for later
//! verification, the same way a real `ToolDispatcher` would route them to a
//! step or the orchestrator, without any adapter I/O behind it.

use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::error::CtnrError;

/// Record of one tool invocation routed through a mock dispatcher.
#[derive(Debug, Clone)]
pub struct RecordedInvocation {
    pub tool: String,
    pub session_id: String,
    pub args: serde_json::Value,
    pub invoked_at: DateTime<Utc>,
}

/// Mock tool dispatcher for testing.
///
/// ```ignore
/// let dispatch = MockToolDispatch::new();
/// dispatch.record("build_image", "sess-1", json!({"dockerfile_path": "Dockerfile"}));
/// dispatch.assert_invoked("build_image");
/// ```
pub struct MockToolDispatch {
    invocations: RwLock<Vec<RecordedInvocation>>,
}

impl MockToolDispatch {
    pub fn new() -> Self {
        Self {
            invocations: RwLock::new(Vec::new()),
        }
    }

    pub fn record<T: serde::Serialize>(
        &self,
        tool: &str,
        session_id: &str,
        args: T,
    ) -> Result<(), CtnrError> {
        let args_json = serde_json::to_value(args)?;
        self.invocations.write().unwrap().push(RecordedInvocation {
            tool: tool.to_string(),
            session_id: session_id.to_string(),
            args: args_json,
            invoked_at: Utc::now(),
        });
        Ok(())
    }

    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.read().unwrap().clone()
    }

    pub fn invocations_of(&self, tool: &str) -> Vec<RecordedInvocation> {
        self.invocations
            .read()
            .unwrap()
            .iter()
            .filter(|i| i.tool == tool)
            .cloned()
            .collect()
    }

    pub fn assert_invoked(&self, tool: &str) {
        let invocations = self.invocations.read().unwrap();
        let found = invocations.iter().any(|i| i.tool == tool);
        assert!(
            found,
            "Expected tool '{}' to be invoked, but it wasn't. Invoked: {:?}",
            tool,
            invocations.iter().map(|i| &i.tool).collect::<Vec<_>>()
        );
    }

    pub fn assert_invoked_with<F>(&self, tool: &str, predicate: F)
    where
        F: Fn(&serde_json::Value) -> bool,
    {
        let invocations = self.invocations.read().unwrap();
        let found = invocations.iter().any(|i| i.tool == tool && predicate(&i.args));
        assert!(found, "Expected tool '{}' with matching args to be invoked", tool);
    }

    pub fn assert_not_invoked(&self, tool: &str) {
        let invocations = self.invocations.read().unwrap();
        let found = invocations.iter().any(|i| i.tool == tool);
        assert!(!found, "Expected tool '{}' NOT to be invoked, but it was", tool);
    }

    pub fn assert_invoke_count(&self, tool: &str, expected: usize) {
        let invocations = self.invocations.read().unwrap();
        let count = invocations.iter().filter(|i| i.tool == tool).count();
        assert_eq!(
            count, expected,
            "Expected {} invocations of '{}', but found {}",
            expected, tool, count
        );
    }

    pub fn clear(&self) {
        self.invocations.write().unwrap().clear();
    }
}

impl Default for MockToolDispatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_asserts_invocation() {
        let dispatch = MockToolDispatch::new();
        dispatch
            .record("build_image", "sess-1", serde_json::json!({"tag": "app:latest"}))
            .unwrap();

        dispatch.assert_invoked("build_image");
        dispatch.assert_not_invoked("push_image");
        dispatch.assert_invoked_with("build_image", |args| args["tag"] == "app:latest");
    }

    #[test]
    fn counts_repeated_invocations() {
        let dispatch = MockToolDispatch::new();
        dispatch.record("analyze_repository", "s1", serde_json::json!({})).unwrap();
        dispatch.record("analyze_repository", "s2", serde_json::json!({})).unwrap();
        dispatch.record("build_image", "s1", serde_json::json!({})).unwrap();

        dispatch.assert_invoke_count("analyze_repository", 2);
        dispatch.assert_invoke_count("build_image", 1);
    }

    #[test]
    fn clear_empties_log() {
        let dispatch = MockToolDispatch::new();
        dispatch.record("tag_image", "s1", serde_json::json!({})).unwrap();
        assert_eq!(dispatch.invocations().len(), 1);
        dispatch.clear();
        assert_eq!(dispatch.invocations().len(), 0);
    }
}
