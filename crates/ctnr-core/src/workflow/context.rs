use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::progress::SharedProgressEmitter;
use crate::session::SessionId;

/// Per-step execution handle passed to [`super::step::Step::execute`].
///
/// Carries everything a step needs that isn't part of its JSON input: the
/// owning session, a handle to emit progress, the deadline this particular
/// attempt must finish within, a read-only view of state already accumulated
/// by steps that ran before it in the same workflow pass, and the
/// cancellation token the orchestrator signals on client disconnect or an
/// explicit cancel request (§4.2, §5).
#[derive(Clone)]
pub struct StepContext {
    pub session_id: SessionId,
    pub progress: SharedProgressEmitter,
    pub deadline: Duration,
    /// Repository path the workflow is running against. Set once per
    /// workflow run (not per step) so the first step in the pipeline has
    /// something to project its input from.
    pub repo_path: String,
    pub cancel: CancellationToken,
    accumulated: Arc<BTreeMap<String, Value>>,
}

impl StepContext {
    pub fn new(
        session_id: SessionId,
        progress: SharedProgressEmitter,
        deadline: Duration,
        accumulated: Arc<BTreeMap<String, Value>>,
    ) -> Self {
        Self {
            session_id,
            progress,
            deadline,
            repo_path: String::new(),
            cancel: CancellationToken::new(),
            accumulated,
        }
    }

    pub fn with_repo_path(mut self, repo_path: impl Into<String>) -> Self {
        self.repo_path = repo_path.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Output previously recorded by `step`, if it has already run in this pass.
    pub fn output_of(&self, step: &str) -> Option<&Value> {
        self.accumulated.get(step)
    }

    /// Full accumulated-state map, for steps that project more than one upstream output.
    pub fn accumulated_ref(&self) -> &BTreeMap<String, Value> {
        &self.accumulated
    }

    pub fn emit(&self, step: &str, percent: u8, message: &str) {
        self.progress.emit(step, percent, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgressEmitter;

    #[test]
    fn output_of_reads_accumulated_state() {
        let mut acc = BTreeMap::new();
        acc.insert(
            "analyze_repository".to_string(),
            serde_json::json!({"language": "node"}),
        );
        let ctx = StepContext::new(
            SessionId::from("s1"),
            Arc::new(NullProgressEmitter),
            Duration::from_secs(60),
            Arc::new(acc),
        );

        assert_eq!(ctx.output_of("analyze_repository").unwrap()["language"], "node");
        assert!(ctx.output_of("build_image").is_none());
    }
}
