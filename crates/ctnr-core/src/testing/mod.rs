//! Testing utilities.
//!
//! In-crate mock adapters and assertion helpers used by step, orchestrator,
//! and dispatch tests throughout the workspace: a [`mock_http::MockHttp`]
//! for LLM/scanner HTTP calls, a [`mock_dispatch::MockToolDispatch`] for
//! tool-dispatch recording, and a handful of assertion macros.

pub mod assertions;
pub mod mock_dispatch;
pub mod mock_http;

pub use assertions::*;
pub use mock_dispatch::{MockToolDispatch, RecordedInvocation};
pub use mock_http::{MockHttp, MockHttpBuilder, MockRequest, MockResponse};

use std::time::Duration;

/// Default timeout for a single test waiting on an async operation.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for a test driving a single step.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a test driving the full orchestrator.
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(60);
