//! The single entry point for invoking a tool by name.
//!
//! Every caller (the MCP server, workflow steps, scheduled firings, the CLI)
//! goes through [`Dispatcher::dispatch`]. It resolves the handler from one
//! registry snapshot, times the call, records exactly one
//! [`ExecutionOutcome`], and always answers with a `CallToolResult`.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ToolboxError;
use crate::execution_log::{ExecutionLog, ExecutionOutcome, OutcomeStatus};
use crate::tools::{ToolContext, ToolRegistry, result_text};
use crate::types::{CallerId, ToolName};

/// Cheap-to-clone handle used by every component to call tools.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    log: Arc<dyn ExecutionLog>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, log: Arc<dyn ExecutionLog>) -> Self {
        Self { registry, log }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke `name` with `args` on behalf of `caller`.
    ///
    /// Never fails: an unknown tool, a handler error, an `is_error` result or
    /// a handler panic all come back as an `is_error` result. The handler
    /// runs on its own task, so the outcome is still recorded if the caller
    /// stops awaiting this future.
    pub async fn dispatch(&self, name: &str, args: JsonObject, caller: CallerId) -> CallToolResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let tool = ToolName::new(name);
        let args_value = Value::Object(args.clone());

        let Some(handler) = self.registry.get(name).await else {
            let err = ToolboxError::ToolNotFound(name.to_string());
            warn!(tool = %tool, caller = %caller, "Dispatch to unknown tool");
            self.record(&ExecutionOutcome {
                ts: started_at,
                tool,
                caller,
                args: args_value,
                status: OutcomeStatus::Error,
                duration_ms: elapsed_ms(start),
                payload: None,
                error: Some(err.to_string()),
                error_kind: Some(err.kind().to_string()),
                trace: None,
            })
            .await;
            return err.to_tool_result();
        };

        debug!(tool = %tool, caller = %caller, "Dispatching tool call");

        let dispatcher = self.clone();
        let call = tokio::spawn(async move {
            let ctx = ToolContext {
                caller: caller.clone(),
                dispatcher: dispatcher.clone(),
            };
            let invocation =
                tokio::spawn(async move { handler.execute(args, &ctx).await });

            let (result, status, error, trace) = match invocation.await {
                Ok(Ok(result)) if result.is_error.unwrap_or(false) => {
                    let message = result_text(&result);
                    (result, OutcomeStatus::Error, Some(message), None)
                }
                Ok(Ok(result)) => (result, OutcomeStatus::Success, None, None),
                Ok(Err(e)) => {
                    let err = ToolboxError::ToolExecution(format!("{:#}", e));
                    (
                        err.to_tool_result(),
                        OutcomeStatus::Error,
                        Some(err.to_string()),
                        Some(format!("{:?}", e)),
                    )
                }
                Err(join_err) => {
                    let reason = if join_err.is_panic() {
                        "tool panicked"
                    } else {
                        "tool task was cancelled"
                    };
                    let err = ToolboxError::ToolExecution(reason.to_string());
                    (
                        err.to_tool_result(),
                        OutcomeStatus::Error,
                        Some(err.to_string()),
                        Some(join_err.to_string()),
                    )
                }
            };

            let duration_ms = elapsed_ms(start);
            if status == OutcomeStatus::Error {
                warn!(
                    tool = %tool,
                    caller = %caller,
                    duration_ms,
                    "Tool call failed: {}",
                    error.as_deref().unwrap_or_default()
                );
            }

            let outcome = ExecutionOutcome {
                ts: started_at,
                tool,
                caller,
                args: args_value,
                status,
                duration_ms,
                payload: match status {
                    OutcomeStatus::Success => serde_json::to_value(&result).ok(),
                    OutcomeStatus::Error => None,
                },
                error_kind: error.as_ref().map(|_| "ToolExecutionError".to_string()),
                error,
                trace,
            };
            dispatcher.record(&outcome).await;
            result
        });

        match call.await {
            Ok(result) => result,
            // Only reachable while the runtime is shutting down.
            Err(e) => ToolboxError::ToolExecution(format!("dispatch aborted: {}", e)).to_tool_result(),
        }
    }

    async fn record(&self, outcome: &ExecutionOutcome) {
        if let Err(e) = self.log.record(outcome).await {
            warn!(tool = %outcome.tool, "Failed to record execution outcome: {:#}", e);
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
