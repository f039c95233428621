//! `WorkflowOrchestrator` — drives the eleven-step `containerize_and_deploy`
//! pipeline end to end (§4.8): sequential execution, per-step retry/fixer
//! handling, progress emission, and session persistence after every step.

use std::sync::Arc;

use ctnr_core::error::{CtnrError, ErrorDomain, FixAttempt, Result};
use ctnr_core::progress::{percent_complete, SharedProgressEmitter};
use ctnr_core::session::{Session, SessionId};
use ctnr_core::workflow::{
    ErrorHistoryEntry, SkipDecision, StepContext, StepSpec, WorkflowState, DEFAULT_WORKFLOW_STEPS,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::steps::StepRegistry;

pub struct WorkflowOrchestrator {
    ctx: Arc<AppContext>,
    registry: Arc<StepRegistry>,
}

impl WorkflowOrchestrator {
    pub fn new(ctx: Arc<AppContext>, registry: Arc<StepRegistry>) -> Self {
        Self { ctx, registry }
    }

    /// Run (or resume) the full pipeline for `session_id` against `repo_path`,
    /// under `cancel` (§4.2, §5): a signal raced against the in-flight step
    /// surfaces as `ErrorCode::Cancelled` within the 5s hard ceiling rather
    /// than waiting for the step's own deadline.
    ///
    /// A session with no prior run starts fresh at step 0. A session whose
    /// last run failed resumes at the failed step if that failure was
    /// retryable; a non-retryable prior failure refuses to resume and
    /// returns `INVALID_STATE` rather than silently restarting.
    pub async fn run(&self, session_id: SessionId, repo_path: String, progress: SharedProgressEmitter, cancel: CancellationToken) -> Result<Value> {
        let existing = self.ctx.store.get(&session_id, &cancel).await?;

        let (start_index, initial_results) = match existing {
            None => {
                let ttl = chrono::Duration::seconds(self.ctx.config.store.session_ttl_secs as i64);
                let session = Session::new(session_id.clone(), Some(ttl));
                self.ctx.store.create(session, &cancel).await?;
                (0usize, std::collections::BTreeMap::new())
            }
            Some(session) => {
                if let Some(failed_step) = &session.last_failed_step {
                    if !session.last_failure_retryable {
                        return Err(CtnrError::invalid_state(
                            ErrorDomain::Workflow,
                            format!("session {session_id} last failed at '{failed_step}' non-retryably; refusing to resume"),
                        ));
                    }
                    let index = DEFAULT_WORKFLOW_STEPS.iter().position(|s| s == failed_step).unwrap_or(0);
                    (index, session.step_outputs.clone())
                } else {
                    let index = session.step_outputs.len().min(DEFAULT_WORKFLOW_STEPS.len());
                    (index, session.step_outputs.clone())
                }
            }
        };

        let step_specs: Vec<StepSpec> = DEFAULT_WORKFLOW_STEPS.iter().map(|name| StepSpec::new(name)).collect();
        let mut state = WorkflowState::new(session_id.clone(), repo_path.clone(), step_specs, progress.clone());
        state.results = initial_results;
        state.current_step = start_index;

        let total = state.total_steps();

        while !state.is_complete() {
            let step_name = state.current_step_name().expect("current_step < total_steps");
            let step = self.registry.get(step_name).ok_or_else(|| {
                CtnrError::internal(ErrorDomain::Workflow, format!("step '{step_name}' is not registered"))
            })?;

            if cancel.is_cancelled() {
                return Err(CtnrError::cancelled(ErrorDomain::Workflow, format!("step '{step_name}' cancelled")));
            }

            let accumulated = state.accumulated();
            let step_ctx = StepContext::new(session_id.clone(), progress.clone(), step.timeout(), accumulated)
                .with_repo_path(repo_path.clone())
                .with_cancel(cancel.clone());

            if let SkipDecision::Skip { reason } = step.should_skip(&step_ctx) {
                let output = serde_json::json!({ "skipped": true, "reason": reason });
                state.record_success(step_name, output.clone());
                self.persist_success(&session_id, step_name, &output, &cancel).await?;
                progress.emit(step_name, percent_complete(state.current_step, total), &format!("skipped: {reason}"));
                continue;
            }

            let retry_policy = step.retry_policy();
            let mut input = step.project_input(&step_ctx)?;
            let mut attempt = 1u32;
            let mut accumulated_fix_attempts: Vec<FixAttempt> = Vec::new();

            loop {
                progress.emit(step_name, percent_complete(state.current_step, total), &format!("attempt {attempt}"));

                let outcome = tokio::select! {
                    result = step.execute(&step_ctx, input.clone()) => result,
                    _ = cancel.cancelled() => Err(CtnrError::cancelled(ErrorDomain::Workflow, format!("step '{step_name}' cancelled"))),
                };

                match outcome {
                    Ok(output) => {
                        state.record_success(step_name, output.clone());
                        self.persist_success(&session_id, step_name, &output, &cancel).await?;
                        progress.emit(step_name, percent_complete(state.current_step, total), "succeeded");
                        break;
                    }
                    Err(mut err) => {
                        err = err.with_step(step_name).with_attempt(attempt);
                        let retryable = err.is_retryable();
                        let fixable = err.is_fixable() && retry_policy.allow_fixer;
                        let mut fix_applied = false;

                        if fixable {
                            if let Some(fixer) = step.fixer() {
                                let step_history: Vec<ErrorHistoryEntry> =
                                    state.history.iter().filter(|e| e.step == step_name).cloned().collect();
                                let (applied, summary) = match fixer.fix(&input, &err, &step_history).await {
                                    Ok(revised) => {
                                        input = revised;
                                        fix_applied = true;
                                        (true, err.message.clone())
                                    }
                                    Err(_) => (false, err.message.clone()),
                                };
                                accumulated_fix_attempts.push(FixAttempt {
                                    attempt: accumulated_fix_attempts.len() as u32 + 1,
                                    at: chrono::Utc::now(),
                                    error_summary: summary,
                                    applied,
                                });
                            }
                        }

                        state.record_failure(ErrorHistoryEntry {
                            step: step_name.to_string(),
                            attempt,
                            cause_summary: err.message.clone(),
                            fix_applied,
                        });
                        let history_so_far: Vec<ErrorHistoryEntry> = state.history.iter().cloned().collect();

                        if retryable && retry_policy.should_retry(attempt) {
                            self.persist_failure(&session_id, step_name, true, history_so_far, &cancel).await?;

                            attempt += 1;
                            let backoff = retry_policy.backoff_for_attempt(attempt);
                            if !backoff.is_zero() {
                                tokio::time::sleep(backoff).await;
                            }
                            continue;
                        }

                        self.persist_failure(&session_id, step_name, retryable, history_so_far, &cancel).await?;
                        progress.emit(step_name, percent_complete(state.current_step, total), "failed");
                        err.fix_attempts = accumulated_fix_attempts;
                        return Err(err);
                    }
                }
            }
        }

        progress.emit("containerize_and_deploy", 100, "completed");
        progress.close();

        Ok(serde_json::to_value(&state.results)?)
    }

    async fn persist_success(&self, session_id: &SessionId, step: &str, output: &Value, cancel: &CancellationToken) -> Result<()> {
        let step = step.to_string();
        let output = output.clone();
        self.ctx
            .store
            .update_atomic(
                session_id,
                Box::new(move |existing| {
                    let mut session = existing.unwrap_or_else(|| Session::new(SessionId(String::new()), None));
                    session.record_step_output(step, output);
                    Some(session)
                }),
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn persist_failure(
        &self,
        session_id: &SessionId,
        step: &str,
        retryable: bool,
        history: Vec<ErrorHistoryEntry>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let step = step.to_string();
        self.ctx
            .store
            .update_atomic(
                session_id,
                Box::new(move |existing| {
                    let mut session = existing.unwrap_or_else(|| Session::new(SessionId(String::new()), None));
                    session.record_step_failure(step, retryable);
                    session.record_fix_history(history);
                    Some(session)
                }),
                cancel,
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctnr_core::progress::NullProgressEmitter;

    #[tokio::test]
    async fn refuses_to_resume_a_non_retryably_failed_session() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "node");
        let registry = Arc::new(StepRegistry::new(app_ctx.clone()));
        let orchestrator = WorkflowOrchestrator::new(app_ctx.clone(), registry);

        let session_id = SessionId::from("stuck-session");
        let mut session = Session::new(session_id.clone(), None);
        session.record_step_failure("build_image", false);
        app_ctx.store.create(session, &CancellationToken::new()).await.unwrap();

        let result = orchestrator
            .run(session_id, "/tmp".to_string(), Arc::new(NullProgressEmitter), CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ctnr_core::error::ErrorCode::InvalidState);
    }

    #[tokio::test]
    async fn runs_full_pipeline_against_a_generic_repo() {
        let store_dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(store_dir.path(), "generic");
        let registry = Arc::new(StepRegistry::new(app_ctx.clone()));
        let orchestrator = WorkflowOrchestrator::new(app_ctx.clone(), registry);

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("README.md"), "hello").unwrap();

        let session_id = SessionId::from("smoke-1");
        let result = orchestrator
            .run(
                session_id,
                repo.path().to_str().unwrap().to_string(),
                Arc::new(NullProgressEmitter),
                CancellationToken::new(),
            )
            .await;

        // docker/kubectl/kind binaries are not expected to exist in the test
        // sandbox, so the pipeline is expected to fail once it reaches the
        // first external command (build_image); the assertion here is that
        // the early pure steps (analyze_repository, resolve_base_images,
        // verify_dockerfile) ran and recorded their outputs before that.
        assert!(result.is_err());
        let session = app_ctx
            .store
            .get(&SessionId::from("smoke-1"), &CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert!(session.step_outputs.contains_key("analyze_repository"));
        assert!(session.step_outputs.contains_key("resolve_base_images"));
    }

    #[tokio::test]
    async fn cancellation_mid_step_stops_the_pipeline_and_persists_prior_steps() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "generic");
        let registry = Arc::new(StepRegistry::new(app_ctx.clone()));
        let orchestrator = WorkflowOrchestrator::new(app_ctx.clone(), registry);

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("README.md"), "hello").unwrap();

        let session_id = SessionId::from("cancel-1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = orchestrator
            .run(session_id.clone(), repo.path().to_str().unwrap().to_string(), Arc::new(NullProgressEmitter), cancel)
            .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().code, ctnr_core::error::ErrorCode::Cancelled);

        let session = app_ctx.store.get(&session_id, &CancellationToken::new()).await.unwrap().unwrap();
        assert!(session.step_outputs.is_empty());
    }

    /// A step double that fails with a fixable, retryable error for its first
    /// `fail_times` attempts, then succeeds.
    struct FlakyStep {
        fail_times: std::sync::atomic::AtomicU32,
    }

    #[async_trait::async_trait]
    impl ctnr_core::workflow::Step for FlakyStep {
        fn name(&self) -> &'static str {
            "analyze_repository"
        }

        fn retry_policy(&self) -> ctnr_core::retry::RetryPolicy {
            ctnr_core::retry::RetryPolicy {
                max_attempts: 3,
                initial_backoff: std::time::Duration::from_millis(1),
                max_backoff: std::time::Duration::from_millis(1),
                strategy: ctnr_core::retry::BackoffStrategy::Fixed,
                allow_fixer: true,
            }
        }

        fn fixer(&self) -> Option<&dyn ctnr_core::workflow::Fixer> {
            Some(self)
        }

        async fn execute(&self, _ctx: &ctnr_core::workflow::StepContext, _input: Value) -> Result<Value> {
            let remaining = self.fail_times.fetch_update(std::sync::atomic::Ordering::SeqCst, std::sync::atomic::Ordering::SeqCst, |n| {
                if n == 0 {
                    None
                } else {
                    Some(n - 1)
                }
            });
            match remaining {
                Ok(_) => Err(CtnrError::new(ctnr_core::error::ErrorCode::ValidationFailed, ErrorDomain::Workflow, "flaky failure")),
                Err(_) => Ok(serde_json::json!({"ok": true})),
            }
        }
    }

    #[async_trait::async_trait]
    impl ctnr_core::workflow::Fixer for FlakyStep {
        async fn fix(&self, input: &Value, _error: &CtnrError, _history: &[ErrorHistoryEntry]) -> Result<Value> {
            Ok(input.clone())
        }
    }

    #[tokio::test]
    async fn fix_history_has_exactly_two_entries_after_two_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let app_ctx = crate::context::test_context(dir.path(), "generic");
        let flaky = Arc::new(FlakyStep {
            fail_times: std::sync::atomic::AtomicU32::new(2),
        });
        let registry = Arc::new(StepRegistry::new(app_ctx.clone()).with_step_override(flaky));
        let orchestrator = WorkflowOrchestrator::new(app_ctx.clone(), registry);

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("README.md"), "hello").unwrap();

        let session_id = SessionId::from("flaky-1");
        let result = orchestrator
            .run(
                session_id.clone(),
                repo.path().to_str().unwrap().to_string(),
                Arc::new(NullProgressEmitter),
                CancellationToken::new(),
            )
            .await;

        // The overridden step only covers "analyze_repository"; the pipeline
        // continues into real steps afterward and is expected to fail later
        // (no docker/kubectl in the sandbox) but the fix history recorded
        // against the flaky step's two failures must survive.
        let _ = result;
        let session = app_ctx.store.get(&session_id, &CancellationToken::new()).await.unwrap().unwrap();
        let flaky_entries: Vec<_> = session.fix_history.iter().filter(|e| e.step == "analyze_repository").collect();
        assert_eq!(flaky_entries.len(), 2);
        assert!(flaky_entries.iter().all(|e| e.fix_applied));
    }
}
