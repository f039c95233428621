//! MCP server shell (§4's "MCP server shell" row, §6 Transport).
//!
//! Deliberately thin: this module only translates between `rmcp`'s tool
//! protocol and the [`ToolDispatcher`] built in `dispatch.rs`. Capability
//! negotiation advertises the `tools` capability (plus `logging`); tool
//! listing is generated from [`crate::dispatch::ToolRegistry`]; tool calls
//! decode arguments, hand them to the dispatcher, and translate the
//! `Result<Value, CtnrError>` back into a `CallToolResult`. No business
//! logic lives here.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use ctnr_core::error::CtnrError;
use ctnr_core::progress::ProgressEmitter;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorData as McpError, Implementation,
    ListToolsResult, PaginatedRequestParam, ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ServerHandler;
use serde_json::Value;

use crate::dispatch::ToolDispatcher;

/// Forwards progress events to the MCP client's progress notification
/// channel for the token supplied with the originating tool call, clamping
/// percent to be non-decreasing (§4.6, §5 "monotonic non-decreasing percent").
pub struct RmcpProgressEmitter {
    peer: rmcp::service::Peer<RoleServer>,
    token: rmcp::model::ProgressToken,
    last: AtomicU8,
}

impl RmcpProgressEmitter {
    pub fn new(peer: rmcp::service::Peer<RoleServer>, token: rmcp::model::ProgressToken) -> Self {
        Self {
            peer,
            token,
            last: AtomicU8::new(0),
        }
    }
}

impl ProgressEmitter for RmcpProgressEmitter {
    fn emit(&self, step: &str, percent: u8, message: &str) {
        let clamped = percent.min(100);
        let prev = self.last.fetch_max(clamped, Ordering::SeqCst);
        let to_send = clamped.max(prev);

        let peer = self.peer.clone();
        let token = self.token.clone();
        let message = format!("{step}: {message}");

        // `emit` must not block the step; the notification write happens on
        // its own task and any delivery failure is logged once, never
        // propagated back into the workflow (§4.6).
        tokio::spawn(async move {
            let params = rmcp::model::ProgressNotificationParam {
                progress_token: token,
                progress: to_send as f64,
                total: Some(100.0),
                message: Some(message),
            };
            if let Err(e) = peer.notify_progress(params).await {
                tracing::warn!(error = %e, "failed to deliver progress notification");
            }
        });
    }
}

/// Picks a real emitter when the client supplied a progress token on this
/// call, or the null emitter otherwise (§4.6).
fn progress_emitter_for(
    context: &RequestContext<RoleServer>,
    request: &CallToolRequestParam,
) -> Arc<dyn ProgressEmitter> {
    let token = request
        .meta()
        .and_then(|meta| meta.get_progress_token())
        .or_else(|| context.meta.get_progress_token());

    match token {
        Some(token) => Arc::new(RmcpProgressEmitter::new(context.peer.clone(), token)),
        None => Arc::new(ctnr_core::progress::NullProgressEmitter),
    }
}

/// Flattens a `schemars` JSON schema `Value` into the `Map<String, Value>`
/// shape `rmcp::model::Tool::input_schema` expects; falls back to an empty
/// object schema if the generated schema is somehow not an object.
fn schema_to_map(schema: Value) -> serde_json::Map<String, Value> {
    match schema {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    }
}

/// Renders a [`CtnrError`] as the structured JSON body carried back in an
/// error `CallToolResult` — code, domain, step, attempt, context, and fix
/// history, exactly the fields §3/§7 require the client be able to see.
/// `Display`/`to_string()` never embeds raw adapter output (that's only
/// ever present, already redacted, inside `context`), so this never needs
/// its own redaction pass.
fn error_payload(err: &CtnrError) -> Value {
    serde_json::json!({
        "ok": false,
        "code": err.code,
        "domain": err.domain,
        "message": err.message,
        "step": err.step,
        "attempt": err.attempt,
        "context": err.context,
        "fix_attempts": err.fix_attempts.iter().map(|f| serde_json::json!({
            "attempt": f.attempt,
            "at": f.at,
            "error_summary": f.error_summary,
            "applied": f.applied,
        })).collect::<Vec<_>>(),
    })
}

/// The `rmcp` service handle for the whole tool surface. One instance lives
/// for the process and is shared across concurrent MCP requests; all mutable
/// state lives behind the [`ToolDispatcher`] it wraps.
#[derive(Clone)]
pub struct CtnrMcpServer {
    dispatcher: Arc<ToolDispatcher>,
}

impl CtnrMcpServer {
    pub fn new(dispatcher: Arc<ToolDispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl ServerHandler for CtnrMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_logging()
                .build(),
            server_info: Implementation {
                name: "ctnr".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "Drives a repository through analyze -> dockerfile -> build -> scan -> tag -> \
                 push -> manifests -> cluster -> deploy -> verify. Call containerize_and_deploy \
                 to run the whole pipeline, or the individual tools to drive one step at a time; \
                 pass session_id to resume or inspect a prior attempt."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self
            .dispatcher
            .registry()
            .all()
            .iter()
            .map(|descriptor| Tool {
                name: descriptor.name.into(),
                description: Some(descriptor.description.into()),
                input_schema: Arc::new(schema_to_map(descriptor.input_schema())),
                annotations: None,
            })
            .collect();

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let args = request
            .arguments
            .clone()
            .map(Value::Object)
            .unwrap_or(Value::Null);

        let progress = progress_emitter_for(&context, &request);
        let cancel = context.ct.clone();

        match self.dispatcher.call(request.name.as_ref(), args, progress, cancel).await {
            Ok(value) => {
                let text = serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| value.to_string());
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(err) => {
                let payload = error_payload(&err);
                let text = serde_json::to_string_pretty(&payload).unwrap_or_else(|_| payload.to_string());
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
        }
    }
}

/// Serve over MCP stdio framing (§6, the default transport). Blocks until
/// the client disconnects or the process receives a shutdown signal.
pub async fn serve_stdio(dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let server = CtnrMcpServer::new(dispatcher);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

/// Serve the same tool surface over the HTTP streamable transport
/// (`TRANSPORT_TYPE=http`), plus a plain `/healthz` endpoint outside the MCP
/// framing for load balancer probes.
pub async fn serve_http(dispatcher: Arc<ToolDispatcher>, bind: std::net::SocketAddr) -> anyhow::Result<()> {
    use rmcp::transport::streamable_http_server::{
        session::local::LocalSessionManager, StreamableHttpService,
    };

    let mcp_service = StreamableHttpService::new(
        move || Ok(CtnrMcpServer::new(dispatcher.clone())),
        Arc::new(LocalSessionManager::default()),
        Default::default(),
    );

    let router = axum::Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .nest_service("/mcp", mcp_service);

    tracing::info!(%bind, "MCP HTTP transport listening");
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn healthz() -> axum::Json<BTreeMap<&'static str, &'static str>> {
    axum::Json(BTreeMap::from([("status", "ok")]))
}
