use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::progress::SharedProgressEmitter;
use crate::retry::RetryPolicy;
use crate::session::SessionId;

/// Cap on the number of entries kept in a workflow's rolling error history.
pub const ERROR_HISTORY_CAP: usize = 10;

/// A single recorded failure against a step, kept for diagnostics and for
/// the fixer's rolling history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorHistoryEntry {
    pub step: String,
    pub attempt: u32,
    pub cause_summary: String,
    pub fix_applied: bool,
}

/// Static descriptor for one step's place in a workflow's step list.
///
/// Holds only what the orchestrator needs to drive the step by name; the
/// step's own execution, projection, and default retry policy live on its
/// [`super::step::Step`] implementation. `retry_override` lets a workflow
/// tighten or loosen a step's declared policy without changing the step.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: &'static str,
    pub retry_override: Option<RetryPolicy>,
}

impl StepSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            retry_override: None,
        }
    }

    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_override = Some(policy);
        self
    }
}

/// In-memory state for one in-flight workflow execution.
///
/// Not persisted directly: the orchestrator mirrors `results` into the
/// session's `step_outputs` via `UpdateAtomic` after each successful step, so
/// the session store remains the durable source of truth.
pub struct WorkflowState {
    pub session_id: SessionId,
    pub repo_path: String,
    pub steps: Vec<StepSpec>,
    pub current_step: usize,
    pub results: BTreeMap<String, Value>,
    pub progress: SharedProgressEmitter,
    pub history: VecDeque<ErrorHistoryEntry>,
}

impl WorkflowState {
    pub fn new(session_id: SessionId, repo_path: impl Into<String>, steps: Vec<StepSpec>, progress: SharedProgressEmitter) -> Self {
        Self {
            session_id,
            repo_path: repo_path.into(),
            steps,
            current_step: 0,
            results: BTreeMap::new(),
            progress,
            history: VecDeque::with_capacity(ERROR_HISTORY_CAP),
        }
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    pub fn current_step_name(&self) -> Option<&'static str> {
        self.steps.get(self.current_step).map(|s| s.name)
    }

    pub fn record_success(&mut self, step: &str, output: Value) {
        self.results.insert(step.to_string(), output);
        self.current_step += 1;
    }

    /// Push a failure onto the bounded history, dropping the oldest entry once full.
    pub fn record_failure(&mut self, entry: ErrorHistoryEntry) {
        if self.history.len() == ERROR_HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    pub fn accumulated(&self) -> Arc<BTreeMap<String, Value>> {
        Arc::new(self.results.clone())
    }

    pub fn is_complete(&self) -> bool {
        self.current_step >= self.steps.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgressEmitter;

    fn state() -> WorkflowState {
        WorkflowState::new(
            SessionId::from("s1"),
            "/repo",
            vec![StepSpec::new("a"), StepSpec::new("b")],
            Arc::new(NullProgressEmitter),
        )
    }

    #[test]
    fn advances_on_success_and_completes() {
        let mut state = state();
        assert_eq!(state.current_step_name(), Some("a"));
        state.record_success("a", serde_json::json!({}));
        assert_eq!(state.current_step_name(), Some("b"));
        assert!(!state.is_complete());
        state.record_success("b", serde_json::json!({}));
        assert!(state.is_complete());
    }

    #[test]
    fn history_is_bounded() {
        let mut state = state();
        for i in 0..(ERROR_HISTORY_CAP + 5) {
            state.record_failure(ErrorHistoryEntry {
                step: "a".into(),
                attempt: i as u32,
                cause_summary: "boom".into(),
                fix_applied: false,
            });
        }
        assert_eq!(state.history.len(), ERROR_HISTORY_CAP);
        assert_eq!(state.history.back().unwrap().attempt, (ERROR_HISTORY_CAP + 4) as u32);
    }
}
