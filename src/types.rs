//! NewType wrappers for the identifiers that flow through the dispatcher.
//!
//! A tool name and a caller id are both plain strings on the wire; keeping
//! them as distinct types stops one from being passed where the other is
//! expected (they sit next to each other in every dispatch call).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Registered name of a tool (e.g. "time_tool").
    ///
    /// This is the key of the registry's active tool set and the name
    /// callers use over MCP, in workflow steps and in scheduled tasks.
    ToolName
);

newtype_string!(
    /// Identifies who asked for a dispatch.
    ///
    /// Recorded verbatim in every execution outcome so that the execution
    /// log can tell a direct MCP call apart from a workflow step or a
    /// scheduled firing.
    CallerId
);

impl CallerId {
    /// Caller id used for requests arriving over the MCP transport.
    pub fn mcp() -> Self {
        Self::new("mcp")
    }

    /// Caller id used by the command line `call` subcommand.
    pub fn cli() -> Self {
        Self::new("cli")
    }

    /// Caller id for the forward action of workflow step `index`.
    pub fn workflow_step(index: usize) -> Self {
        Self(format!("workflow_tool_step_{}", index))
    }

    /// Caller id for the compensation action of workflow step `index`.
    pub fn workflow_compensation(index: usize) -> Self {
        Self(format!("workflow_tool_compensation_{}", index))
    }

    /// Caller id for a scheduled task firing.
    pub fn scheduled(task_id: &uuid::Uuid) -> Self {
        Self(format!("schedule_tool_{}", task_id))
    }
}
