//! Wires `ctnr-core` contracts to `ctnr-runtime` implementations into one
//! running process (§2's "MCP server shell", out-of-scope "server bootstrap"
//! kept deliberately thin per `SPEC_FULL.md` §2). Shared by both the `serve`
//! CLI command and the crate's integration tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ctnr_core::config::CtnrConfig;
use ctnr_runtime::adapters::llm::{LlmAdapter, ReqwestLlmAdapter, StaticLlmAdapter};
use ctnr_runtime::{AppContext, SledSessionStore, StepRegistry, ToolDispatcher, WorkflowOrchestrator};

/// Everything the `serve` command needs to hand off to the MCP transport,
/// plus the handle the periodic cleanup sweep runs against.
pub struct Runtime {
    pub dispatcher: Arc<ToolDispatcher>,
    pub ctx: Arc<AppContext>,
}

/// Build the session store, adapters, step registry, orchestrator, and tool
/// dispatcher from a resolved [`CtnrConfig`]. Does not start any background
/// task or transport — callers decide that.
pub fn build(config: CtnrConfig) -> Result<Runtime> {
    let config = Arc::new(config);

    let store = SledSessionStore::open(&config.store.path, config.store.max_sessions)
        .with_context(|| format!("opening session store at {}", config.store.path))?;

    let llm = resolve_llm_adapter();

    let ctx = Arc::new(AppContext::new(config, Arc::new(store), llm));
    let steps = Arc::new(StepRegistry::new(ctx.clone()));
    let orchestrator = Arc::new(WorkflowOrchestrator::new(ctx.clone(), steps.clone()));
    let dispatcher = Arc::new(ToolDispatcher::new(ctx.clone(), steps, orchestrator));

    Ok(Runtime { dispatcher, ctx })
}

/// `LLM_API_KEY` (plus optional `LLM_BASE_URL` / `LLM_MODEL`) selects the
/// real chat-completion adapter used by AI-assisted fixers. Without a key,
/// fixers still run but against a fixed reply — step retries proceed
/// without AI-assisted repair rather than failing the whole process to
/// start.
fn resolve_llm_adapter() -> Arc<dyn LlmAdapter> {
    match std::env::var("LLM_API_KEY") {
        Ok(api_key) => {
            let base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
            Arc::new(ReqwestLlmAdapter::new(base_url, api_key, model))
        }
        Err(_) => {
            tracing::warn!("LLM_API_KEY not set; AI-assisted fixers are disabled for this run");
            Arc::new(StaticLlmAdapter::new("generic"))
        }
    }
}

/// Spawn the background sweep that deletes expired sessions on an interval
/// (§4.1 `Cleanup`, §9 "TTL with explicit delete"). The store itself never
/// spawns tasks; this loop is the process's only caller of `cleanup()`.
pub fn spawn_cleanup_sweep(ctx: Arc<AppContext>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(ctx.config.store.cleanup_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match ctx.store.cleanup(&tokio_util::sync::CancellationToken::new()).await {
                Ok(count) if count > 0 => tracing::info!(count, "swept expired sessions"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "session cleanup sweep failed"),
            }
        }
    })
}
