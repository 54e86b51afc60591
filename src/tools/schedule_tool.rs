//! Handler for the `schedule_tool` tool.
//!
//! Thin adapter from JSON arguments onto [`Scheduler`]. The scheduler itself
//! is owned by the composition root, so reloading this tool never touches
//! live timers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{CallToolResult, JsonObject};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::ToolboxError;
use crate::scheduler::{CreateTask, Scheduler};
use crate::tools::{ToolContext, ToolHandler, error_result, json_result, schema_object};

/// What a `schedule_tool` call asks the scheduler to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerAction {
    Create,
    Cancel,
    List,
    CancelAllOnce,
    CancelAllRecurring,
}

#[derive(Clone)]
pub struct ScheduleToolHandler {
    scheduler: Arc<Scheduler>,
}

impl ScheduleToolHandler {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self { scheduler }
    }
}

impl ToolHandler for ScheduleToolHandler {
    fn name(&self) -> &str {
        "schedule_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("Scheduled Tasks")
    }

    fn description(&self) -> &str {
        "Manage scheduled tool invocations: create one-off (absolute time or delay) and \
         recurring (every@<N><s|m|h|d>) tasks, cancel them, or list them."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "cancel", "list", "cancel_all_once", "cancel_all_recurring"]
                },
                "toolName": {"type": "string", "description": "Tool to run, e.g. time_tool."},
                "toolArgs": {"type": "object", "description": "Arguments for the tool."},
                "time": {
                    "type": "string",
                    "description": "Absolute time (RFC 3339 or YYYY-MM-DD HH:mm:ss), or every@<N><s|m|h|d> for a recurring task."
                },
                "delaySeconds": {"type": "integer", "minimum": 1},
                "interval": {"type": "string", "description": "Recurring interval, e.g. every@5m."},
                "startTime": {"type": "string", "description": "First firing of a recurring task."},
                "id": {"type": "string", "description": "Task id, required for cancel."}
            },
            "required": ["action"]
        }))
    }

    fn execute(
        &self,
        args: JsonObject,
        _ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let scheduler = self.scheduler.clone();

        Box::pin(async move {
            let action = match args.get("action").cloned().map(serde_json::from_value) {
                Some(Ok(action)) => action,
                Some(Err(_)) => return Ok(error_result("Invalid action type")),
                None => return Ok(error_result("Missing parameter: action")),
            };

            Ok(match run_action(&scheduler, action, args).await {
                Ok(body) => json_result(&body),
                Err(e) => error_result(e.to_string()),
            })
        })
    }
}

async fn run_action(
    scheduler: &Arc<Scheduler>,
    action: SchedulerAction,
    args: JsonObject,
) -> Result<Value, ToolboxError> {
    match action {
        SchedulerAction::Create => {
            let request: CreateTask = serde_json::from_value(Value::Object(args))
                .map_err(|e| ToolboxError::validation(format!("Invalid arguments: {}", e)))?;
            let task = scheduler.create(request).await?;
            Ok(json!({
                "message": format!("Scheduled task created. ID: {}", task.id),
                "task": task,
            }))
        }
        SchedulerAction::Cancel => {
            let raw = args
                .get("id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolboxError::validation("Missing parameter: id"))?;
            let id = Uuid::parse_str(raw.trim())
                .map_err(|_| ToolboxError::validation(format!("Invalid task id: {}", raw)))?;
            let removed = scheduler.cancel(id).await?;
            Ok(json!({
                "message": format!("Task canceled. ID: {}", id),
                "removed": removed,
            }))
        }
        SchedulerAction::List => Ok(json!(scheduler.list().await)),
        SchedulerAction::CancelAllOnce => {
            let removed = scheduler.cancel_all_once().await?;
            Ok(json!({"message": "All one-time tasks cleared", "removed": removed}))
        }
        SchedulerAction::CancelAllRecurring => {
            let removed = scheduler.cancel_all_recurring().await?;
            Ok(json!({"message": "All recurring tasks cleared", "removed": removed}))
        }
    }
}
