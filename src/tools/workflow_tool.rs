//! Handler for the `workflow_tool` tool.

use std::future::Future;
use std::pin::Pin;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::{Value, json};

use crate::tools::{ToolContext, ToolHandler, error_result, json_result, schema_object};
use crate::workflow::{WorkflowEngine, WorkflowRequest};

/// Runs a workflow and answers with its report.
///
/// A run whose steps failed still answers successfully: the failure is in
/// the report. Only rejected requests and unwritable reports are errors.
#[derive(Clone)]
pub struct WorkflowToolHandler {
    engine: WorkflowEngine,
}

impl WorkflowToolHandler {
    pub fn new(engine: WorkflowEngine) -> Self {
        Self { engine }
    }
}

impl ToolHandler for WorkflowToolHandler {
    fn name(&self) -> &str {
        "workflow_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("Run Workflow")
    }

    fn description(&self) -> &str {
        "Run a list of tool steps serially or in parallel, with per-step retry, timeout \
         and compensation. Writes a JSON report and returns it."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "array",
                    "minItems": 1,
                    "items": {
                        "type": "object",
                        "properties": {
                            "tool": {"type": "string"},
                            "args": {"type": "object"},
                            "retry": {"type": "integer", "minimum": 0, "default": 0},
                            "timeoutMs": {"type": "integer", "minimum": 1},
                            "compensation": {
                                "type": "object",
                                "properties": {
                                    "tool": {"type": "string"},
                                    "args": {"type": "object"}
                                },
                                "required": ["tool"]
                            }
                        },
                        "required": ["tool"]
                    }
                },
                "parallel": {"type": "boolean", "default": false},
                "outputFile": {
                    "type": "string",
                    "description": "Report path. Relative paths resolve under the log directory."
                }
            },
            "required": ["steps"]
        }))
    }

    fn execute(
        &self,
        args: JsonObject,
        _ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let engine = self.engine.clone();

        Box::pin(async move {
            let request: WorkflowRequest = match serde_json::from_value(Value::Object(args)) {
                Ok(request) => request,
                Err(e) => return Ok(error_result(format!("Invalid workflow: {}", e))),
            };

            Ok(match engine.run(request).await {
                Ok(run) => json_result(&run),
                Err(e) => error_result(e.to_string()),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolboxConfig;
    use crate::execution_log::MemoryExecutionLog;
    use crate::tools::{Dispatcher, TimeToolHandler, ToolCatalog, ToolRegistry, result_text};
    use crate::types::CallerId;
    use std::sync::Arc;

    async fn dispatcher(config: &ToolboxConfig) -> Dispatcher {
        let registry = Arc::new(ToolRegistry::default());
        let dispatcher = Dispatcher::new(registry.clone(), Arc::new(MemoryExecutionLog::new()));
        let engine = WorkflowEngine::new(dispatcher.clone(), config);
        registry
            .set_catalog(
                ToolCatalog::new()
                    .register_handler(WorkflowToolHandler::new(engine))
                    .register_handler(TimeToolHandler::new()),
            )
            .await;
        registry.load().await;
        dispatcher
    }

    async fn run(dispatcher: &Dispatcher, args: Value) -> CallToolResult {
        dispatcher
            .dispatch(
                "workflow_tool",
                args.as_object().cloned().unwrap_or_default(),
                CallerId::mcp(),
            )
            .await
    }

    #[tokio::test]
    async fn test_returns_report_with_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolboxConfig::for_data_dir(dir.path());
        let dispatcher = dispatcher(&config).await;

        let result = run(
            &dispatcher,
            json!({"steps": [
                {"tool": "time_tool", "args": {"format": "timestamp"}},
                {"tool": "time_tool", "args": {"format": "custom"}}
            ]}),
        )
        .await;

        // Step failures live in the report, not in is_error.
        assert_ne!(result.is_error, Some(true));
        let body: Value = serde_json::from_str(&result_text(&result)).unwrap();
        assert_eq!(body["status"], "failed");
        assert_eq!(body["steps"][0]["status"], "success");
        assert_eq!(body["steps"][1]["status"], "failed");

        let path = std::path::PathBuf::from(body["outputFile"].as_str().unwrap());
        assert!(path.starts_with(&config.log_dir));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_rejects_nested_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let config = ToolboxConfig::for_data_dir(dir.path());
        let dispatcher = dispatcher(&config).await;

        let result = run(&dispatcher, json!({"steps": [{"tool": "workflow_tool"}]})).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result_text(&result), "Workflow cannot include workflow_tool tool.");

        let malformed = run(&dispatcher, json!({"steps": "time_tool"})).await;
        assert_eq!(malformed.is_error, Some(true));
        assert!(result_text(&malformed).starts_with("Invalid workflow"));
    }
}
