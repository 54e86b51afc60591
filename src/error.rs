//! Error taxonomy shared by the dispatcher, workflow engine and scheduler.
//!
//! Most internal plumbing returns `anyhow::Result`. `ToolboxError` is used
//! where a caller needs to branch on the kind of failure, and it is the
//! shape every failure takes once it reaches a tool result.

use rmcp::model::{CallToolResult, Content};
use serde_json::json;
use thiserror::Error;

/// Errors that can surface from the orchestration core.
#[derive(Debug, Clone, Error)]
pub enum ToolboxError {
    /// Dispatch was asked for a name the active tool set does not contain.
    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    /// A handler returned an error, returned an error result, or panicked.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Malformed scheduler or workflow input. Raised before any side effect.
    #[error("{0}")]
    Validation(String),

    /// A compensation action failed. Logged and recorded, never fatal.
    #[error("Compensation failed: {0}")]
    CompensationFailure(String),

    /// Writing the task store or a workflow report failed.
    #[error("Persistence failed: {0}")]
    Persistence(String),
}

/// Result type for orchestration operations.
pub type ToolboxResult<T> = Result<T, ToolboxError>;

impl ToolboxError {
    /// Build a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build a persistence error from any displayable cause.
    pub fn persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ToolNotFound(_) => "ToolNotFound",
            Self::ToolExecution(_) => "ToolExecutionError",
            Self::Validation(_) => "ValidationError",
            Self::CompensationFailure(_) => "CompensationFailure",
            Self::Persistence(_) => "PersistenceError",
        }
    }

    /// Convert this error into an `is_error` tool result.
    ///
    /// The text body is a JSON object so that callers (and the workflow
    /// report) can tell the failure kind apart from the message.
    pub fn to_tool_result(&self) -> CallToolResult {
        let payload = json!({
            "status": "error",
            "kind": self.kind(),
            "reason": self.to_string(),
        });
        let text = serde_json::to_string(&payload)
            .unwrap_or_else(|_| "internal serialization error".to_string());
        CallToolResult::error(vec![Content::text(text)])
    }
}

impl From<anyhow::Error> for ToolboxError {
    fn from(err: anyhow::Error) -> Self {
        Self::ToolExecution(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(ToolboxError::ToolNotFound("x".into()).kind(), "ToolNotFound");
        assert_eq!(
            ToolboxError::ToolExecution("x".into()).kind(),
            "ToolExecutionError"
        );
        assert_eq!(ToolboxError::validation("x").kind(), "ValidationError");
        assert_eq!(ToolboxError::persistence("x").kind(), "PersistenceError");
    }

    #[test]
    fn test_to_tool_result_is_error() {
        let result = ToolboxError::ToolNotFound("nope".into()).to_tool_result();
        assert_eq!(result.is_error, Some(true));

        let text = &result.content[0].as_text().unwrap().text;
        let body: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(body["kind"], "ToolNotFound");
        assert_eq!(body["reason"], "Unknown tool: nope");
    }

    #[test]
    fn test_validation_display_is_bare_message() {
        let err = ToolboxError::validation("Scheduled time must be in the future");
        assert_eq!(err.to_string(), "Scheduled time must be in the future");
    }
}
