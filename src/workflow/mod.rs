//! Workflow engine: runs declared tool steps serially or all in parallel,
//! with per-step retry, timeout and compensation, and persists one report
//! per run.

mod engine;
mod report;

pub use engine::{DENYLISTED_TOOLS, WorkflowEngine, WorkflowRun};
pub use report::resolve_output_path;

use chrono::{DateTime, Utc};
use rmcp::model::JsonObject;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ToolName;

/// Input of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRequest {
    pub steps: Vec<WorkflowStep>,
    /// Launch every step at once instead of one after another.
    #[serde(default)]
    pub parallel: bool,
    /// Report destination; relative paths resolve under the log directory.
    #[serde(default)]
    pub output_file: Option<String>,
}

/// One forward action plus its optional compensating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    pub tool: ToolName,
    #[serde(default)]
    pub args: JsonObject,
    /// Extra attempts after the first one.
    #[serde(default)]
    pub retry: u32,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub compensation: Option<Compensation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Compensation {
    pub tool: ToolName,
    #[serde(default)]
    pub args: JsonObject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
}

/// Overall status of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Lifecycle of a run. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunState {
    /// Terminal state for a finished set of step results.
    pub fn settle(steps: &[StepResult]) -> Self {
        if steps.iter().all(|s| s.status == StepStatus::Success) {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }

    pub fn run_status(self) -> Option<RunStatus> {
        match self {
            Self::Succeeded => Some(RunStatus::Success),
            Self::Failed => Some(RunStatus::Failed),
            Self::Pending | Self::Running => None,
        }
    }
}

/// What happened to a step's compensating action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationResult {
    pub tool: ToolName,
    pub status: StepStatus,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub index: usize,
    pub tool: ToolName,
    pub status: StepStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensation: Option<CompensationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub total_duration_ms: u64,
    pub parallel: bool,
    /// Always ordered by `index`.
    pub steps: Vec<StepResult>,
}
