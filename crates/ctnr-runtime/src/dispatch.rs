//! Tool dispatch layer (§4.9): the twelve-entry tool surface the MCP shell
//! exposes, modeled directly on the teacher's function-registry/RPC-handler
//! split. `ToolRegistry` is a static catalog of what each tool is called,
//! what it needs, and what it runs; `ToolDispatcher` is the stateful half
//! that resolves a call, validates its arguments, serializes access to the
//! named session, and runs either a single step, the full pipeline, or a
//! session-management operation against the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex};

use ctnr_core::error::{CtnrError, ErrorCode, ErrorDomain, Result};
use ctnr_core::progress::{percent_complete, SharedProgressEmitter};
use ctnr_core::session::{Session, SessionFilters, SessionId, SessionStatus};
use ctnr_core::workflow::{Step, StepContext};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;
use crate::orchestrator::WorkflowOrchestrator;
use crate::steps::StepRegistry;

/// Which steps a tool drives, or which non-step operation it performs.
enum ToolKind {
    /// Runs one or more steps in sequence, chaining each step's
    /// `project_input` off the accumulated output of the ones before it in
    /// the same call. Length 1 for the ten single-purpose tools; length 2
    /// for `generate_dockerfile`, which collapses `resolve_base_images` and
    /// `verify_dockerfile` into one user-facing call.
    Steps(&'static [&'static str]),
    /// Drives the full eleven-step pipeline via the orchestrator.
    Workflow,
    ListSessions,
    GetSession,
    DeleteSession,
}

/// One entry in the fixed tool surface: its name, description, declared
/// input schema, the arguments that must be present, and what it runs.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub required_args: &'static [&'static str],
    schema_fn: fn() -> Value,
    kind: ToolKind,
}

impl ToolDescriptor {
    pub fn input_schema(&self) -> Value {
        (self.schema_fn)()
    }
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ContainerizeAndDeployArgs {
    repo_path: String,
    #[serde(default)]
    #[allow(dead_code)]
    session_id: Option<String>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct ListSessionsArgs {
    #[serde(default)]
    #[allow(dead_code)]
    status: Option<String>,
}

#[derive(Deserialize, schemars::JsonSchema)]
struct SessionIdArgs {
    #[allow(dead_code)]
    session_id: String,
}

fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Static catalog of every tool the MCP server exposes.
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        use crate::steps::analyze_repository::AnalyzeRepositoryInput;
        use crate::steps::build_image::BuildImageInput;
        use crate::steps::deploy_application::DeployApplicationInput;
        use crate::steps::push_image::PushImageInput;
        use crate::steps::resolve_base_images::ResolveBaseImagesInput;
        use crate::steps::security_scan::SecurityScanInput;
        use crate::steps::setup_cluster::SetupClusterInput;
        use crate::steps::tag_image::TagImageInput;
        use crate::steps::verify_deployment::VerifyDeploymentInput;
        use crate::steps::verify_manifests::VerifyManifestsInput;

        let tools = vec![
            ToolDescriptor {
                name: "analyze_repository",
                description: "Detect a repository's language, framework, entry point, and default port.",
                required_args: &["repo_path"],
                schema_fn: schema_of::<AnalyzeRepositoryInput>,
                kind: ToolKind::Steps(&["analyze_repository"]),
            },
            ToolDescriptor {
                name: "generate_dockerfile",
                description: "Render a Dockerfile for the repository from the template catalog and validate it, repairing it with the LLM if it fails.",
                required_args: &["repo_path"],
                schema_fn: schema_of::<ResolveBaseImagesInput>,
                kind: ToolKind::Steps(&["resolve_base_images", "verify_dockerfile"]),
            },
            ToolDescriptor {
                name: "build_image",
                description: "Build a container image from a Dockerfile.",
                required_args: &["dockerfile_path", "image_name"],
                schema_fn: schema_of::<BuildImageInput>,
                kind: ToolKind::Steps(&["build_image"]),
            },
            ToolDescriptor {
                name: "scan_image",
                description: "Scan a built image for known vulnerabilities and embedded secrets.",
                required_args: &["image_ref"],
                schema_fn: schema_of::<SecurityScanInput>,
                kind: ToolKind::Steps(&["security_scan"]),
            },
            ToolDescriptor {
                name: "tag_image",
                description: "Apply a registry-qualified tag to a built image.",
                required_args: &["image_id", "tag"],
                schema_fn: schema_of::<TagImageInput>,
                kind: ToolKind::Steps(&["tag_image"]),
            },
            ToolDescriptor {
                name: "push_image",
                description: "Push a tagged image to its registry.",
                required_args: &["image_ref"],
                schema_fn: schema_of::<PushImageInput>,
                kind: ToolKind::Steps(&["push_image"]),
            },
            ToolDescriptor {
                name: "generate_k8s_manifests",
                description: "Render and validate Deployment/Service/ConfigMap manifests for an image.",
                required_args: &["image_ref", "app_name"],
                schema_fn: schema_of::<VerifyManifestsInput>,
                kind: ToolKind::Steps(&["verify_manifests"]),
            },
            ToolDescriptor {
                name: "prepare_cluster",
                description: "Ensure a local cluster and target namespace exist.",
                required_args: &[],
                schema_fn: schema_of::<SetupClusterInput>,
                kind: ToolKind::Steps(&["setup_cluster"]),
            },
            ToolDescriptor {
                name: "deploy_application",
                description: "Apply a deployment manifest to the cluster.",
                required_args: &["manifest_path"],
                schema_fn: schema_of::<DeployApplicationInput>,
                kind: ToolKind::Steps(&["deploy_application"]),
            },
            ToolDescriptor {
                name: "verify_deployment",
                description: "Poll pod readiness for a deployed application.",
                required_args: &["app_name"],
                schema_fn: schema_of::<VerifyDeploymentInput>,
                kind: ToolKind::Steps(&["verify_deployment"]),
            },
            ToolDescriptor {
                name: "containerize_and_deploy",
                description: "Run the full containerization pipeline end to end, resuming a prior session if one is given.",
                required_args: &["repo_path"],
                schema_fn: schema_of::<ContainerizeAndDeployArgs>,
                kind: ToolKind::Workflow,
            },
            ToolDescriptor {
                name: "list_sessions",
                description: "List known sessions, optionally filtered by status.",
                required_args: &[],
                schema_fn: schema_of::<ListSessionsArgs>,
                kind: ToolKind::ListSessions,
            },
            ToolDescriptor {
                name: "get_session",
                description: "Fetch a session's full recorded state.",
                required_args: &["session_id"],
                schema_fn: schema_of::<SessionIdArgs>,
                kind: ToolKind::GetSession,
            },
            ToolDescriptor {
                name: "delete_session",
                description: "Delete a session and its recorded state.",
                required_args: &["session_id"],
                schema_fn: schema_of::<SessionIdArgs>,
                kind: ToolKind::DeleteSession,
            },
        ];

        Self { tools }
    }

    pub fn all(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves a tool call to its session, serializes execution per session,
/// and runs it. One instance lives for the whole process.
pub struct ToolDispatcher {
    ctx: Arc<AppContext>,
    steps: Arc<StepRegistry>,
    orchestrator: Arc<WorkflowOrchestrator>,
    registry: ToolRegistry,
    locks: StdMutex<HashMap<SessionId, Arc<AsyncMutex<()>>>>,
}

impl ToolDispatcher {
    pub fn new(ctx: Arc<AppContext>, steps: Arc<StepRegistry>, orchestrator: Arc<WorkflowOrchestrator>) -> Self {
        Self {
            ctx,
            steps,
            orchestrator,
            registry: ToolRegistry::new(),
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    fn lock_for(&self, id: &SessionId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Resolve, validate, lock, and run `tool` with the given decoded
    /// arguments. Returns the `{ok: true, session_id, ...}` envelope on
    /// success; a structured [`CtnrError`] otherwise.
    pub async fn call(&self, tool: &str, args: Value, progress: SharedProgressEmitter, cancel: CancellationToken) -> Result<Value> {
        let descriptor = self
            .registry
            .find(tool)
            .ok_or_else(|| CtnrError::new(ErrorCode::ToolNotFound, ErrorDomain::Dispatch, format!("unknown tool '{tool}'")))?;

        validate_required_args(descriptor, &args)?;

        let session_id = resolve_session_id(tool, &args);
        let lock = self.lock_for(&session_id);
        let _guard = lock.lock().await;

        tracing::info!(tool, session_id = %session_id, "tool call started");

        let payload = match &descriptor.kind {
            ToolKind::Steps(chain) => self.run_step_chain(chain, &session_id, args, &progress, &cancel).await,
            ToolKind::Workflow => self.run_workflow(session_id.clone(), args, progress.clone(), cancel.clone()).await,
            ToolKind::ListSessions => self.list_sessions(&args, &cancel).await,
            ToolKind::GetSession => self.get_session(&session_id, &cancel).await,
            ToolKind::DeleteSession => self.delete_session(&session_id, &cancel).await,
        };

        match payload {
            Ok(value) => {
                tracing::info!(tool, session_id = %session_id, "tool call succeeded");
                Ok(envelope(&session_id, value))
            }
            Err(err) => {
                tracing::warn!(tool, session_id = %session_id, code = ?err.code, "tool call failed");
                Err(err)
            }
        }
    }

    async fn run_workflow(&self, session_id: SessionId, args: Value, progress: SharedProgressEmitter, cancel: CancellationToken) -> Result<Value> {
        let repo_path = args
            .get("repo_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CtnrError::new(ErrorCode::MissingParameter, ErrorDomain::Dispatch, "containerize_and_deploy requires repo_path"))?
            .to_string();

        self.orchestrator.run(session_id, repo_path, progress, cancel).await
    }

    /// Run `chain` against `session_id`, chaining each step after the first
    /// off the accumulated output of the ones that ran before it in this
    /// same call. Persists each step's output (or failure) as it completes,
    /// exactly like a single-step slice of the orchestrator's loop.
    async fn run_step_chain(
        &self,
        chain: &[&'static str],
        session_id: &SessionId,
        args: Value,
        progress: &SharedProgressEmitter,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let existing = self.ctx.store.get(session_id, cancel).await?;
        let mut accumulated: BTreeMap<String, Value> = match existing {
            Some(session) => session.step_outputs,
            None => {
                let ttl = chrono::Duration::seconds(self.ctx.config.store.session_ttl_secs as i64);
                self.ctx.store.create(Session::new(session_id.clone(), Some(ttl)), cancel).await?;
                BTreeMap::new()
            }
        };

        let repo_path = args.get("repo_path").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let total = chain.len();
        let mut merged = serde_json::Map::new();

        for (index, step_name) in chain.iter().enumerate() {
            let step = self
                .steps
                .get(step_name)
                .ok_or_else(|| CtnrError::internal(ErrorDomain::Dispatch, format!("step '{step_name}' is not registered")))?;

            let step_ctx = StepContext::new(session_id.clone(), progress.clone(), step.timeout(), Arc::new(accumulated.clone()))
                .with_repo_path(repo_path.clone())
                .with_cancel(cancel.clone());

            let step_input = if index == 0 { args.clone() } else { step.project_input(&step_ctx)? };

            progress.emit(step_name, percent_complete(index, total), "started");

            let outcome = tokio::select! {
                result = step.execute(&step_ctx, step_input) => result,
                _ = cancel.cancelled() => Err(CtnrError::cancelled(ErrorDomain::Dispatch, format!("step '{step_name}' cancelled"))),
            };

            match outcome {
                Ok(output) => {
                    accumulated.insert(step_name.to_string(), output.clone());
                    self.persist_step_output(session_id, step_name, &output, cancel).await?;
                    if let Value::Object(obj) = &output {
                        merged.extend(obj.clone());
                    }
                    progress.emit(step_name, percent_complete(index + 1, total), "succeeded");
                }
                Err(mut err) => {
                    err = err.with_step(step_name);
                    self.persist_step_failure(session_id, step_name, err.is_retryable(), cancel).await?;
                    progress.emit(step_name, percent_complete(index, total), "failed");
                    progress.close();
                    return Err(err);
                }
            }
        }

        progress.close();
        Ok(Value::Object(merged))
    }

    async fn persist_step_output(&self, session_id: &SessionId, step: &str, output: &Value, cancel: &CancellationToken) -> Result<()> {
        let step = step.to_string();
        let output = output.clone();
        self.ctx
            .store
            .update_atomic(
                session_id,
                Box::new(move |existing| {
                    let mut session = existing?;
                    session.record_step_output(step, output);
                    Some(session)
                }),
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn persist_step_failure(&self, session_id: &SessionId, step: &str, retryable: bool, cancel: &CancellationToken) -> Result<()> {
        let step = step.to_string();
        self.ctx
            .store
            .update_atomic(
                session_id,
                Box::new(move |existing| {
                    let mut session = existing?;
                    session.record_step_failure(step, retryable);
                    Some(session)
                }),
                cancel,
            )
            .await?;
        Ok(())
    }

    async fn list_sessions(&self, args: &Value, cancel: &CancellationToken) -> Result<Value> {
        let status = args
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| serde_json::from_value::<SessionStatus>(Value::String(s.to_string())))
            .transpose()
            .map_err(|e| CtnrError::new(ErrorCode::InvalidParameter, ErrorDomain::Dispatch, format!("invalid status filter: {e}")))?;

        let filters = SessionFilters { status };
        let sessions = self.ctx.store.list(&filters, cancel).await?;
        Ok(serde_json::json!({ "sessions": sessions }))
    }

    async fn get_session(&self, session_id: &SessionId, cancel: &CancellationToken) -> Result<Value> {
        let session = self
            .ctx
            .store
            .get(session_id, cancel)
            .await?
            .ok_or_else(|| CtnrError::not_found(ErrorDomain::Session, format!("session '{session_id}' not found")))?;
        Ok(serde_json::to_value(session)?)
    }

    async fn delete_session(&self, session_id: &SessionId, cancel: &CancellationToken) -> Result<Value> {
        let deleted = self.ctx.store.delete(session_id, cancel).await?;
        if !deleted {
            return Err(CtnrError::not_found(ErrorDomain::Session, format!("session '{session_id}' not found")));
        }
        Ok(serde_json::json!({ "deleted": true }))
    }
}

fn resolve_session_id(tool: &str, args: &Value) -> SessionId {
    args.get("session_id")
        .and_then(|v| v.as_str())
        .map(SessionId::from)
        .unwrap_or_else(|| SessionId::generate(tool))
}

fn validate_required_args(descriptor: &ToolDescriptor, args: &Value) -> Result<()> {
    let missing: Vec<&str> = descriptor
        .required_args
        .iter()
        .filter(|key| args.get(**key).and_then(|v| v.as_str()).map_or(true, str::is_empty))
        .copied()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    Err(CtnrError::new(
        ErrorCode::MissingParameter,
        ErrorDomain::Dispatch,
        format!("{} is missing required argument(s): {}", descriptor.name, missing.join(", ")),
    )
    .with_context("missing", missing))
}

fn envelope(session_id: &SessionId, payload: Value) -> Value {
    let mut map = match payload {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("result".to_string(), other);
            map
        }
    };
    map.insert("ok".to_string(), Value::Bool(true));
    map.insert("session_id".to_string(), Value::String(session_id.0.clone()));
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctnr_core::progress::NullProgressEmitter;

    fn dispatcher(store_dir: &std::path::Path) -> ToolDispatcher {
        let app_ctx = crate::context::test_context(store_dir, "generic");
        let steps = Arc::new(StepRegistry::new(app_ctx.clone()));
        let orchestrator = Arc::new(WorkflowOrchestrator::new(app_ctx.clone(), steps.clone()));
        ToolDispatcher::new(app_ctx, steps, orchestrator)
    }

    #[test]
    fn registry_carries_every_fixed_tool() {
        let registry = ToolRegistry::new();
        for name in [
            "analyze_repository",
            "generate_dockerfile",
            "build_image",
            "scan_image",
            "tag_image",
            "push_image",
            "generate_k8s_manifests",
            "prepare_cluster",
            "deploy_application",
            "verify_deployment",
            "containerize_and_deploy",
            "list_sessions",
            "get_session",
            "delete_session",
        ] {
            assert!(registry.find(name).is_some(), "missing tool {name}");
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let err = dispatcher.call("not_a_real_tool", serde_json::json!({}), Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn missing_required_argument_is_missing_parameter() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let err = dispatcher.call("analyze_repository", serde_json::json!({}), Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingParameter);
    }

    #[tokio::test]
    async fn analyze_repository_dispatches_the_single_step_and_envelopes_the_result() {
        let store_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(store_dir.path());

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("go.mod"), "module example.com/app").unwrap();

        let args = serde_json::json!({"repo_path": repo.path().to_str().unwrap(), "session_id": "dispatch-test-1"});
        let result = dispatcher.call("analyze_repository", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap();

        assert_eq!(result["ok"], true);
        assert_eq!(result["session_id"], "dispatch-test-1");
        assert_eq!(result["language"], "go");

        let session = dispatcher.ctx.store.get(&SessionId::from("dispatch-test-1"), &CancellationToken::new()).await.unwrap().unwrap();
        assert!(session.step_outputs.contains_key("analyze_repository"));
    }

    #[tokio::test]
    async fn generate_dockerfile_chains_resolve_and_verify() {
        let store_dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(store_dir.path());

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("package.json"), "{}").unwrap();

        let args = serde_json::json!({"repo_path": repo.path().to_str().unwrap(), "session_id": "dispatch-test-2"});
        let result = dispatcher.call("generate_dockerfile", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap();

        assert_eq!(result["ok"], true);
        assert!(result.get("dockerfile_path").is_some());
        assert!(result.get("quality_score").is_some());

        let session = dispatcher.ctx.store.get(&SessionId::from("dispatch-test-2"), &CancellationToken::new()).await.unwrap().unwrap();
        assert!(session.step_outputs.contains_key("resolve_base_images"));
        assert!(session.step_outputs.contains_key("verify_dockerfile"));
    }

    #[tokio::test]
    async fn get_session_on_missing_session_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        let args = serde_json::json!({"session_id": "does-not-exist"});
        let err = dispatcher.call("get_session", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn delete_session_removes_a_created_session() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        dispatcher.ctx.store.create(Session::new(SessionId::from("to-delete"), None), &CancellationToken::new()).await.unwrap();

        let args = serde_json::json!({"session_id": "to-delete"});
        let result = dispatcher.call("delete_session", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap();
        assert_eq!(result["deleted"], true);
        assert!(dispatcher.ctx.store.get(&SessionId::from("to-delete"), &CancellationToken::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_sessions_filters_by_status() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = dispatcher(dir.path());
        dispatcher.ctx.store.create(Session::new(SessionId::from("active-1"), None), &CancellationToken::new()).await.unwrap();

        let args = serde_json::json!({"status": "active"});
        let result = dispatcher.call("list_sessions", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await.unwrap();
        let sessions = result["sessions"].as_array().unwrap();
        assert!(!sessions.is_empty());
    }

    #[tokio::test]
    async fn concurrent_calls_against_the_same_session_serialize() {
        let store_dir = tempfile::tempdir().unwrap();
        let dispatcher = Arc::new(dispatcher(store_dir.path()));

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("README.md"), "hi").unwrap();
        let repo_path = repo.path().to_str().unwrap().to_string();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let dispatcher = dispatcher.clone();
            let repo_path = repo_path.clone();
            handles.push(tokio::spawn(async move {
                let args = serde_json::json!({"repo_path": repo_path, "session_id": "shared-session"});
                dispatcher.call("analyze_repository", args, Arc::new(NullProgressEmitter), CancellationToken::new()).await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
    }
}
