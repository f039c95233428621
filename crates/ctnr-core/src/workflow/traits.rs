use std::str::FromStr;
use std::time::Duration;

/// Static metadata describing a registered workflow kind.
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub name: &'static str,
    pub version: u32,
    /// Default timeout for the entire workflow run, independent of any
    /// single step's deadline.
    pub timeout: Duration,
    pub deprecated: bool,
}

impl Default for WorkflowInfo {
    fn default() -> Self {
        Self {
            name: "",
            version: 1,
            timeout: Duration::from_secs(3600),
            deprecated: false,
        }
    }
}

/// Workflow-level execution status: the conjunction of its steps' terminal
/// states, or an in-progress/cancelled marker while steps are still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Created,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl FromStr for WorkflowStatus {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "created" => Self::Created,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            _ => Self::Created,
        })
    }
}
