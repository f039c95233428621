//! Concrete runtime for the containerization workflow orchestrator.
//!
//! `ctnr-core` defines the contracts (session store, step, error model);
//! this crate supplies the implementations that talk to the outside world —
//! external commands, the Docker/kubectl/kind/scanner/LLM adapters, the
//! embedded template catalog, the sled-backed session store, the eleven
//! workflow steps, the orchestrator that drives them, tool dispatch, and the
//! MCP server shell that exposes all of it.

pub mod adapters;
pub mod command;
pub mod context;
pub mod dispatch;
pub mod mcp;
pub mod orchestrator;
pub mod redact;
pub mod steps;
pub mod store_sled;
pub mod templates;

pub use adapters::{DockerAdapter, KindAdapter, KubectlAdapter, LlmAdapter, ScannerAdapter};
pub use command::{CommandOutput, CommandRunner, CommandSpec};
pub use context::AppContext;
pub use dispatch::{ToolDispatcher, ToolRegistry};
pub use mcp::{serve_http, serve_stdio, CtnrMcpServer};
pub use orchestrator::WorkflowOrchestrator;
pub use steps::StepRegistry;
pub use store_sled::SledSessionStore;
pub use templates::{TemplateCatalog, TemplateCategory};
