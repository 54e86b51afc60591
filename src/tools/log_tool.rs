//! Handler for the `log_tool` tool.
//!
//! Queries the JSON-lines execution log written by the dispatcher.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;

use crate::execution_log::{JsonlExecutionLog, LogQuery, MAX_QUERY_RESULTS, OutcomeStatus};
use crate::tools::{ToolContext, ToolHandler, error_result, json_result};

pub struct LogToolHandler {
    log: Arc<JsonlExecutionLog>,
}

impl LogToolHandler {
    pub fn new(log: Arc<JsonlExecutionLog>) -> Self {
        Self { log }
    }

    fn input_schema(&self) -> JsonObject {
        let mut schema = JsonObject::new();
        schema.insert("type".to_string(), json!("object"));

        let mut properties = serde_json::Map::new();
        properties.insert(
            "page".to_string(),
            json!({"type": "integer", "minimum": 1, "default": 1, "description": "Page number (>= 1)."}),
        );
        properties.insert(
            "pageSize".to_string(),
            json!({
                "type": "integer",
                "minimum": 1,
                "maximum": MAX_QUERY_RESULTS,
                "default": 10,
                "description": "Entries per page (1-100)."
            }),
        );
        properties.insert(
            "toolName".to_string(),
            json!({"type": "string", "description": "Regex matched against the tool name."}),
        );
        properties.insert(
            "status".to_string(),
            json!({"type": "string", "enum": ["success", "error"]}),
        );
        properties.insert(
            "minDuration".to_string(),
            json!({"type": "integer", "description": "Minimum duration in ms."}),
        );
        properties.insert(
            "maxDuration".to_string(),
            json!({"type": "integer", "description": "Maximum duration in ms."}),
        );
        properties.insert(
            "startTime".to_string(),
            json!({"type": "string", "description": "Earliest start time (RFC 3339)."}),
        );
        properties.insert(
            "endTime".to_string(),
            json!({"type": "string", "description": "Latest start time (RFC 3339)."}),
        );

        schema.insert("properties".to_string(), json!(properties));
        schema.insert("required".to_string(), json!([]));
        schema
    }
}

impl ToolHandler for LogToolHandler {
    fn name(&self) -> &str {
        "log_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("Query Execution Log")
    }

    fn description(&self) -> &str {
        "Query recorded tool executions with filtering and pagination. \
         At most 100 matching entries are scanned."
    }

    fn input_schema(&self) -> JsonObject {
        self.input_schema()
    }

    fn execute(
        &self,
        args: JsonObject,
        _ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let log = self.log.clone();

        Box::pin(async move {
            let query = match query_from_args(&args) {
                Ok(query) => query,
                Err(message) => return Ok(error_result(message)),
            };

            match log.query(&query).await {
                Ok(entries) => Ok(json_result(&entries)),
                Err(e) => Ok(error_result(format!("Query failed: {:#}", e))),
            }
        })
    }
}

fn query_from_args(args: &JsonObject) -> Result<LogQuery, String> {
    let mut query = LogQuery::default();

    if let Some(page) = args.get("page").and_then(|v| v.as_u64()) {
        query.page = usize::try_from(page).unwrap_or(usize::MAX).max(1);
    }
    if let Some(size) = args.get("pageSize").and_then(|v| v.as_u64()) {
        query.page_size = usize::try_from(size)
            .unwrap_or(MAX_QUERY_RESULTS)
            .clamp(1, MAX_QUERY_RESULTS);
    }

    if let Some(pattern) = args.get("toolName").and_then(|v| v.as_str()) {
        let regex =
            Regex::new(pattern).map_err(|e| format!("Invalid toolName pattern: {}", e))?;
        query.tool_pattern = Some(regex);
    }

    query.status = match args.get("status").and_then(|v| v.as_str()) {
        None => None,
        Some("success") => Some(OutcomeStatus::Success),
        Some("error") => Some(OutcomeStatus::Error),
        Some(other) => return Err(format!("Invalid status: {}", other)),
    };

    query.min_duration_ms = args.get("minDuration").and_then(|v| v.as_u64());
    query.max_duration_ms = args.get("maxDuration").and_then(|v| v.as_u64());
    query.start = parse_time(args, "startTime")?;
    query.end = parse_time(args, "endTime")?;

    Ok(query)
}

fn parse_time(args: &JsonObject, key: &str) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = args.get(key).and_then(|v| v.as_str()) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| format!("Invalid {}: {}", key, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_log::ExecutionOutcome;
    use crate::tools::{Dispatcher, ToolCatalog, ToolRegistry, result_text};
    use crate::types::{CallerId, ToolName};
    use serde_json::Value;

    fn args(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_query_from_args_defaults_and_clamps() {
        let query = query_from_args(&JsonObject::new()).unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 10);

        let query = query_from_args(&args(json!({"page": 0, "pageSize": 500}))).unwrap();
        assert_eq!(query.page, 1);
        assert_eq!(query.page_size, 100);
    }

    #[test]
    fn test_query_from_args_rejects_bad_input() {
        assert!(query_from_args(&args(json!({"toolName": "(unclosed"}))).is_err());
        assert!(query_from_args(&args(json!({"status": "maybe"}))).is_err());
        assert!(query_from_args(&args(json!({"startTime": "yesterday"}))).is_err());
    }

    #[tokio::test]
    async fn test_filters_and_paginates_recorded_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(JsonlExecutionLog::new(dir.path().join("ToolBox.log")));

        for (tool, status, duration_ms) in [
            ("time_tool", OutcomeStatus::Success, 5),
            ("time_tool", OutcomeStatus::Error, 50),
            ("schedule_tool", OutcomeStatus::Success, 500),
            ("time_tool", OutcomeStatus::Success, 7),
        ] {
            let outcome = ExecutionOutcome {
                ts: Utc::now(),
                tool: ToolName::new(tool),
                caller: CallerId::mcp(),
                args: json!({}),
                status,
                duration_ms,
                payload: None,
                error: None,
                error_kind: None,
                trace: None,
            };
            crate::execution_log::ExecutionLog::record(log.as_ref(), &outcome)
                .await
                .unwrap();
        }

        let registry = Arc::new(ToolRegistry::new(
            ToolCatalog::new().register("log_tool", {
                let log = log.clone();
                move || Ok(Arc::new(LogToolHandler::new(log.clone())) as Arc<dyn ToolHandler>)
            }),
        ));
        registry.load().await;
        // A separate sink so querying does not append to the file under test.
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(crate::execution_log::MemoryExecutionLog::new()),
        );

        let query = |value: Value| {
            let dispatcher = dispatcher.clone();
            async move {
                let result = dispatcher
                    .dispatch("log_tool", args(value), CallerId::cli())
                    .await;
                assert_ne!(result.is_error, Some(true));
                serde_json::from_str::<Vec<Value>>(&result_text(&result)).unwrap()
            }
        };

        let time_ok = query(json!({"toolName": "^time", "status": "success"})).await;
        assert_eq!(time_ok.len(), 2);

        let slow = query(json!({"minDuration": 40, "maxDuration": 100})).await;
        assert_eq!(slow.len(), 1);
        assert_eq!(slow[0]["status"], "error");

        let page_two = query(json!({"page": 2, "pageSize": 3})).await;
        assert_eq!(page_two.len(), 1);
        assert_eq!(page_two[0]["durationMs"], 7);

        let far_page = query(json!({"page": u64::MAX, "pageSize": 100})).await;
        assert!(far_page.is_empty());
    }
}
