//! Handler for the `reload_tool` tool.

use std::future::Future;
use std::pin::Pin;

use rmcp::model::{CallToolResult, JsonObject};
use serde_json::json;
use tracing::info;

use crate::tools::{ToolContext, ToolHandler, json_result, schema_object};

/// Rebuilds the registry from its catalog through the calling dispatcher.
#[derive(Clone, Default)]
pub struct ReloadToolHandler;

impl ReloadToolHandler {
    pub fn new() -> Self {
        Self
    }
}

impl ToolHandler for ReloadToolHandler {
    fn name(&self) -> &str {
        "reload_tool"
    }

    fn title(&self) -> Option<&str> {
        Some("Reload Tools")
    }

    fn description(&self) -> &str {
        "Tear down every loaded tool and rebuild the tool set. \
         Returns the new generation plus the loaded and failed tools."
    }

    fn input_schema(&self) -> JsonObject {
        schema_object(json!({"type": "object", "properties": {}, "required": []}))
    }

    fn output_schema(&self) -> Option<JsonObject> {
        Some(schema_object(json!({
            "type": "object",
            "properties": {
                "generation": {"type": "integer"},
                "loaded": {"type": "array", "items": {"type": "string"}},
                "failed": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "factory": {"type": "string"},
                            "error": {"type": "string"}
                        }
                    }
                }
            }
        })))
    }

    fn execute(
        &self,
        _args: JsonObject,
        ctx: &ToolContext,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<CallToolResult>> + Send + '_>> {
        let registry = ctx.dispatcher.registry().clone();
        let caller = ctx.caller.clone();

        Box::pin(async move {
            info!(caller = %caller, "Reload requested");
            let report = registry.reload().await;
            Ok(json_result(&report))
        })
    }
}
