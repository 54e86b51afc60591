//! Tool handlers, the registry that holds them, and the dispatcher that
//! invokes them.
//!
//! The built-in tools live here as well; each one is a thin adapter from
//! JSON arguments onto a core component (workflow engine, scheduler,
//! registry, execution log).

mod dispatcher;
mod registry;

pub use dispatcher::Dispatcher;
pub use registry::{
    FailedTool, LoadReport, ToolCatalog, ToolContext, ToolFactory, ToolHandler, ToolRegistry,
    ToolSet,
};

// Tool handler implementations
mod log_tool;
mod reload_tool;
mod schedule_tool;
mod time_tool;
mod workflow_tool;

pub use log_tool::LogToolHandler;
pub use reload_tool::ReloadToolHandler;
pub use schedule_tool::ScheduleToolHandler;
pub use time_tool::TimeToolHandler;
pub use workflow_tool::WorkflowToolHandler;

use rmcp::model::{CallToolResult, Content, JsonObject};
use serde::Serialize;

/// Concatenated text content of a tool result.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Successful result carrying `value` as pretty-printed JSON text.
pub(crate) fn json_result<T: Serialize>(value: &T) -> CallToolResult {
    let text = serde_json::to_string_pretty(value)
        .unwrap_or_else(|_| "internal serialization error".to_string());
    CallToolResult::success(vec![Content::text(text)])
}

/// Failed result with a human-readable message.
pub(crate) fn error_result(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message.into())])
}

/// Build a JSON-Schema object from a `json!` literal.
pub(crate) fn schema_object(value: serde_json::Value) -> JsonObject {
    match value {
        serde_json::Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
