use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::context::StepContext;
use super::state::ErrorHistoryEntry;
use crate::error::CtnrError;
use crate::retry::RetryPolicy;

/// Execution state of a single step within one workflow run.
///
/// Mirrors the orchestrator's per-step state machine: `Pending` is the only
/// non-terminal non-running state, `Running` carries the 1-based attempt
/// number, and `Succeeded`/`Failed`/`Skipped` are terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum StepStatus {
    Pending,
    Running { attempt: u32 },
    Succeeded,
    Failed { reason: String },
    Skipped { reason: String },
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Succeeded | StepStatus::Failed { .. } | StepStatus::Skipped { .. })
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running { .. } => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed { .. } => "failed",
            StepStatus::Skipped { .. } => "skipped",
        }
    }
}

/// A decision a step may make about whether it should even run, given the
/// accumulated state it can already see. Used for the `pending → skipped`
/// transition ("no image to push when a load-into-cluster path is chosen").
pub enum SkipDecision {
    Run,
    Skip { reason: String },
}

/// A fixer revises a failing step's input in light of the most recent error
/// and the rolling fix history, or reports that the step cannot be repaired.
///
/// `history` is the workflow's rolling [`ErrorHistoryEntry`] log filtered to
/// this step, oldest first — the same bounded history the orchestrator
/// already records failures into, not a per-error copy.
///
/// Must never mutate session state directly: it only produces a proposed
/// input for the orchestrator to retry with.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(
        &self,
        input: &Value,
        error: &CtnrError,
        history: &[ErrorHistoryEntry],
    ) -> Result<Value, CtnrError>;
}

/// One named unit of work in the containerization pipeline.
///
/// Steps are stateless: all mutable state flows through the session and the
/// [`StepContext`] handed to `execute`. A step never retains state between
/// invocations and never runs concurrently with another step in the same
/// workflow run.
#[async_trait]
pub trait Step: Send + Sync {
    /// Registered name, e.g. `"build_image"`.
    fn name(&self) -> &'static str;

    /// Declared retry policy for this step's error codes.
    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    /// Per-step execution deadline; steps that need more (build, scan) override this.
    fn timeout(&self) -> Duration {
        Duration::from_secs(300)
    }

    /// Optional AI-assisted repair function invoked when the step's error is fixable.
    fn fixer(&self) -> Option<&dyn Fixer> {
        None
    }

    /// Whether this step should run at all given the accumulated state so far.
    fn should_skip(&self, _ctx: &StepContext) -> SkipDecision {
        SkipDecision::Run
    }

    /// Project this step's input from the accumulated output of steps that
    /// ran before it. The default projects the whole accumulated map as a
    /// JSON object; steps with a narrower dependency override this.
    fn project_input(&self, ctx: &StepContext) -> Result<Value, CtnrError> {
        Ok(serde_json::to_value(ctx.accumulated_ref()).unwrap_or(Value::Null))
    }

    /// Run the step against `input` (already projected from accumulated state).
    ///
    /// Returns the step's output on success, merged into accumulated state by
    /// the caller only after this returns `Ok`.
    async fn execute(&self, ctx: &StepContext, input: Value) -> Result<Value, CtnrError>;
}

/// Boxed future alias used by adapters that build steps from closures rather
/// than `impl Step` types (mirrors the pattern used for compensation handlers).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_terminal_classification() {
        assert!(!StepStatus::Pending.is_terminal());
        assert!(!StepStatus::Running { attempt: 1 }.is_terminal());
        assert!(StepStatus::Succeeded.is_terminal());
        assert!(StepStatus::Failed { reason: "x".into() }.is_terminal());
        assert!(StepStatus::Skipped { reason: "x".into() }.is_terminal());
    }

    #[test]
    fn status_labels_match_state_machine_names() {
        assert_eq!(StepStatus::Pending.as_label(), "pending");
        assert_eq!(StepStatus::Running { attempt: 3 }.as_label(), "running");
        assert_eq!(StepStatus::Succeeded.as_label(), "succeeded");
    }
}
