use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rmcp::model::CallToolResult;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ToolboxConfig;
use crate::error::{ToolboxError, ToolboxResult};
use crate::tools::{Dispatcher, result_text};
use crate::types::CallerId;
use crate::workflow::report::{resolve_output_path, save_report};
use crate::workflow::{
    CompensationResult, RunState, RunStatus, StepResult, StepStatus, WorkflowReport, WorkflowRequest,
    WorkflowStep,
};

/// Tools a workflow may not invoke, as a step or as a compensation.
pub const DENYLISTED_TOOLS: &[&str] = &["workflow_tool", "reload_tool"];

/// A finished run together with where its report was written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRun {
    #[serde(flatten)]
    pub report: WorkflowReport,
    pub output_file: PathBuf,
}

#[derive(Clone)]
pub struct WorkflowEngine {
    dispatcher: Dispatcher,
    log_dir: PathBuf,
    max_parallel: usize,
}

impl WorkflowEngine {
    pub fn new(dispatcher: Dispatcher, config: &ToolboxConfig) -> Self {
        Self {
            dispatcher,
            log_dir: config.log_dir.clone(),
            max_parallel: config.workflow_max_parallel.max(1),
        }
    }

    /// Check a request without running anything. Returns the report path.
    pub fn validate(&self, request: &WorkflowRequest) -> ToolboxResult<PathBuf> {
        if request.steps.is_empty() {
            return Err(ToolboxError::validation(
                "Workflow must contain at least one step",
            ));
        }

        for step in &request.steps {
            let tools = std::iter::once(step.tool.as_str())
                .chain(step.compensation.as_ref().map(|c| c.tool.as_str()));
            for tool in tools {
                if DENYLISTED_TOOLS.contains(&tool) {
                    return Err(ToolboxError::validation(format!(
                        "Workflow cannot include {} tool.",
                        tool
                    )));
                }
            }
        }

        resolve_output_path(&self.log_dir, request.output_file.as_deref(), Utc::now())
    }

    /// Validate, execute and persist one workflow run.
    ///
    /// The run itself is spawned: if the caller stops awaiting, the steps
    /// still finish and the report is still written.
    pub async fn run(&self, request: WorkflowRequest) -> ToolboxResult<WorkflowRun> {
        let output_file = self.validate(&request)?;
        let engine = self.clone();
        tokio::spawn(async move { engine.execute(request, output_file).await })
            .await
            .map_err(|e| ToolboxError::ToolExecution(format!("workflow run aborted: {}", e)))?
    }

    async fn execute(
        &self,
        request: WorkflowRequest,
        output_file: PathBuf,
    ) -> ToolboxResult<WorkflowRun> {
        let mut state = RunState::Pending;
        debug!(steps = request.steps.len(), ?state, "Workflow accepted");

        let started_at = Utc::now();
        let start = Instant::now();
        state = RunState::Running;
        info!(
            steps = request.steps.len(),
            parallel = request.parallel,
            ?state,
            "Workflow started"
        );

        let steps = if request.parallel {
            self.run_parallel(request.steps).await
        } else {
            self.run_serial(request.steps).await
        };

        state = RunState::settle(&steps);
        let status = state.run_status().unwrap_or(RunStatus::Failed);
        let report = WorkflowReport {
            status,
            started_at,
            total_duration_ms: elapsed_ms(start),
            parallel: request.parallel,
            steps,
        };
        info!(
            ?state,
            duration_ms = report.total_duration_ms,
            output = %output_file.display(),
            "Workflow finished"
        );

        save_report(&report, &output_file).await?;
        Ok(WorkflowRun {
            report,
            output_file,
        })
    }

    async fn run_serial(&self, steps: Vec<WorkflowStep>) -> Vec<StepResult> {
        let mut results = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            results.push(self.run_step(index, step).await);
        }
        results
    }

    async fn run_parallel(&self, steps: Vec<WorkflowStep>) -> Vec<StepResult> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut handles: Vec<(usize, WorkflowStep, JoinHandle<StepResult>)> =
            Vec::with_capacity(steps.len());

        for (index, step) in steps.into_iter().enumerate() {
            // Acquire before spawning so steps start in declaration order.
            let permit = semaphore.clone().acquire_owned().await.ok();
            let engine = self.clone();
            let owned = step.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                engine.run_step(index, owned).await
            });
            handles.push((index, step, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (index, step, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(index, tool = %step.tool, "Workflow step task failed: {}", e);
                    StepResult {
                        index,
                        tool: step.tool,
                        status: StepStatus::Failed,
                        started_at: Utc::now(),
                        duration_ms: 0,
                        attempts: 0,
                        result: None,
                        error: Some(format!("step task aborted: {}", e)),
                        compensation: None,
                    }
                }
            };
            results.push(result);
        }
        results.sort_by_key(|r| r.index);
        results
    }

    async fn run_step(&self, index: usize, step: WorkflowStep) -> StepResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut last_result = None;
        let mut last_error = None;

        for _ in 0..=step.retry {
            attempts += 1;
            match self.attempt(index, &step).await {
                Ok(value) => {
                    last_result = Some(value);
                    last_error = None;
                    break;
                }
                Err(message) => {
                    debug!(index, tool = %step.tool, attempts, "Workflow step attempt failed: {}", message);
                    last_error = Some(message);
                }
            }
        }

        let status = if last_result.is_some() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };

        let compensation = match (&status, &step.compensation) {
            (StepStatus::Failed, Some(_)) => self.compensate(index, &step).await,
            _ => None,
        };

        StepResult {
            index,
            tool: step.tool,
            status,
            started_at,
            duration_ms: elapsed_ms(start),
            attempts,
            result: last_result,
            error: last_error,
            compensation,
        }
    }

    /// One dispatch of the step's forward action.
    async fn attempt(&self, index: usize, step: &WorkflowStep) -> Result<Value, String> {
        let call = self.dispatcher.dispatch(
            step.tool.as_str(),
            step.args.clone(),
            CallerId::workflow_step(index),
        );

        let result = match step.timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), call)
                .await
                .map_err(|_| format!("Step timed out after {} ms", ms))?,
            None => call.await,
        };

        if result.is_error.unwrap_or(false) {
            Err(result_text(&result))
        } else {
            Ok(result_value(&result))
        }
    }

    async fn compensate(&self, index: usize, step: &WorkflowStep) -> Option<CompensationResult> {
        let compensation = step.compensation.as_ref()?;
        let start = Instant::now();
        let result = self
            .dispatcher
            .dispatch(
                compensation.tool.as_str(),
                compensation.args.clone(),
                CallerId::workflow_compensation(index),
            )
            .await;

        let (status, error) = if result.is_error.unwrap_or(false) {
            let err = ToolboxError::CompensationFailure(result_text(&result));
            warn!(index, tool = %compensation.tool, "{}", err);
            (StepStatus::Failed, Some(err.to_string()))
        } else {
            (StepStatus::Success, None)
        };

        Some(CompensationResult {
            tool: compensation.tool.clone(),
            status,
            duration_ms: elapsed_ms(start),
            error,
        })
    }
}

/// Text content of a result, parsed as JSON when it is JSON.
fn result_value(result: &CallToolResult) -> Value {
    let text = result_text(result);
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
