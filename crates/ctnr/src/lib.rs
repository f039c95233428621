//! `ctnr` — process bootstrap and CLI for the Containerization Workflow
//! Orchestrator.
//!
//! `ctnr-core` declares the contracts (session store, step, error model,
//! retry policy); `ctnr-runtime` supplies the concrete adapters, steps,
//! orchestrator, and MCP server shell. This crate is the thin binary that
//! wires a resolved [`ctnr_core::config::CtnrConfig`] into a running
//! [`bootstrap::Runtime`] and exposes it as the `ctnr serve` command.

pub mod bootstrap;
pub mod cli;

pub use bootstrap::{build, spawn_cleanup_sweep, Runtime};
