//! MCP server implementation using rmcp.
//!
//! Exposes the active tool set over MCP, either on stdio or as a streamable
//! HTTP service. Every `tools/call` goes through the dispatcher, so tool
//! failures come back as `is_error` results rather than protocol errors.

use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use rmcp::transport::streamable_http_server::{
    StreamableHttpService, session::local::LocalSessionManager,
};
use rmcp::{
    ErrorData as McpError,
    handler::server::ServerHandler,
    model::*,
    service::{RequestContext, RoleServer},
};
use tracing::{debug, info};

use crate::tools::{Dispatcher, ToolRegistry};
use crate::types::CallerId;

/// MCP server that delegates every tool call to the dispatcher.
#[derive(Clone)]
pub struct McpServer {
    dispatcher: Dispatcher,
}

impl McpServer {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tool_registry(&self) -> &Arc<ToolRegistry> {
        self.dispatcher.registry()
    }
}

impl ServerHandler for McpServer {
    fn list_tools(
        &self,
        request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let cursor = request.and_then(|r| r.cursor);
        let registry = self.tool_registry().clone();

        async move {
            let (tools, next_cursor) = registry.list_tools(cursor.as_deref()).await;
            Ok(ListToolsResult {
                tools,
                next_cursor,
                ..Default::default()
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_name = request.name.to_string();
        let args = request.arguments.unwrap_or_default();
        let dispatcher = self.dispatcher.clone();

        async move {
            debug!(tool = %tool_name, "MCP tool call");
            Ok(dispatcher.dispatch(&tool_name, args, CallerId::mcp()).await)
        }
    }

    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Toolbox server: runs tools directly, composes them into workflows with \
                 retry and compensation (workflow_tool), and schedules them for later or \
                 recurring execution (schedule_tool)."
                    .to_string(),
            ),
        }
    }
}

/// Serve `server` as an MCP Streamable HTTP endpoint at `/mcp` on `bind`,
/// e.g. `127.0.0.1:3942`.
///
/// Each session gets a clone of the server; all clones share one dispatcher.
pub async fn start_mcp_http(server: Arc<McpServer>, bind: &str) -> Result<()> {
    let service = StreamableHttpService::new(
        {
            let server = server.clone();
            move || Ok(server.as_ref().clone())
        },
        LocalSessionManager::default().into(),
        Default::default(),
    );

    let router = Router::new().nest_service("/mcp", service);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("MCP HTTP server listening on http://{}/mcp", bind);

    axum::serve(listener, router).await?;
    Ok(())
}
