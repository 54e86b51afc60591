// Core modules
mod config;
mod error;
mod execution_log;
mod storage;
mod types;

pub mod scheduler;
pub mod server;
pub mod tools;
pub mod workflow;


pub use config::ToolboxConfig;
pub use error::{ToolboxError, ToolboxResult};
pub use execution_log::{
    ExecutionLog, ExecutionOutcome, JsonlExecutionLog, LogQuery, MemoryExecutionLog,
    OutcomeStatus,
};
pub use scheduler::{CreateTask, ScheduledTask, Scheduler, TaskKind, TaskStore};
pub use server::McpServer;
pub use tools::{Dispatcher, LoadReport, ToolCatalog, ToolContext, ToolHandler, ToolRegistry};
pub use types::{CallerId, ToolName};
pub use workflow::{WorkflowEngine, WorkflowReport, WorkflowRequest};

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use tools::{
    LogToolHandler, ReloadToolHandler, ScheduleToolHandler, TimeToolHandler, WorkflowToolHandler,
};

/// Registration table for the built-in tools.
pub fn builtin_catalog(
    scheduler: &Arc<Scheduler>,
    engine: &WorkflowEngine,
    execution_log: &Arc<JsonlExecutionLog>,
) -> ToolCatalog {
    let scheduler = scheduler.clone();
    let engine = engine.clone();
    let execution_log = execution_log.clone();

    ToolCatalog::new()
        .register_handler(WorkflowToolHandler::new(engine))
        .register_handler(ScheduleToolHandler::new(scheduler))
        .register_handler(ReloadToolHandler::new())
        .register_handler(TimeToolHandler::new())
        .register("log_tool", move || {
            Ok(Arc::new(LogToolHandler::new(execution_log.clone())) as Arc<dyn ToolHandler>)
        })
}

/// Composition root: owns every long-lived component of a toolbox process.
///
/// The registry is created empty so the dispatcher, scheduler and workflow
/// engine can be wired first; the catalog that needs them is installed last.
pub struct Toolbox {
    config: ToolboxConfig,
    registry: Arc<ToolRegistry>,
    dispatcher: Dispatcher,
    scheduler: Arc<Scheduler>,
    engine: WorkflowEngine,
    execution_log: Arc<JsonlExecutionLog>,
}

impl Toolbox {
    /// Build and load everything. Scheduled tasks are not armed until
    /// [`Toolbox::start_scheduler`].
    pub async fn bootstrap(config: ToolboxConfig) -> Result<Self> {
        config.ensure_dirs()?;

        let execution_log = Arc::new(JsonlExecutionLog::new(&config.log_file));
        let registry = Arc::new(ToolRegistry::default());
        let dispatcher = Dispatcher::new(registry.clone(), execution_log.clone());
        let scheduler = Scheduler::new(dispatcher.clone(), &config);
        let engine = WorkflowEngine::new(dispatcher.clone(), &config);

        registry
            .set_catalog(builtin_catalog(&scheduler, &engine, &execution_log))
            .await;
        let report = registry.load().await;
        for failed in &report.failed {
            warn!(factory = %failed.factory, "Tool not loaded: {}", failed.error);
        }
        info!(
            tools = report.loaded.len(),
            log_file = %config.log_file.display(),
            "Toolbox ready"
        );

        Ok(Self {
            config,
            registry,
            dispatcher,
            scheduler,
            engine,
            execution_log,
        })
    }

    /// Re-arm persisted scheduled tasks. Returns how many timers were armed.
    pub async fn start_scheduler(&self) -> usize {
        self.scheduler.rearm().await
    }

    /// Stop every timer, tear down every loaded tool and close the registry.
    /// Dispatches after shutdown find no tools.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.registry.close().await;
        info!("Toolbox shut down");
    }

    pub fn mcp_server(&self) -> McpServer {
        McpServer::new(self.dispatcher.clone())
    }

    pub fn config(&self) -> &ToolboxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn workflow_engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    pub fn execution_log(&self) -> &Arc<JsonlExecutionLog> {
        &self.execution_log
    }
}

/// Convenience function to create a ready-to-serve MCP server.
///
/// Bootstraps a [`Toolbox`], arms its scheduled tasks, and returns both: the
/// toolbox is needed again for [`Toolbox::shutdown`].
pub async fn create_server(config: ToolboxConfig) -> Result<(Arc<Toolbox>, Arc<McpServer>)> {
    let toolbox = Arc::new(Toolbox::bootstrap(config).await?);
    let armed = toolbox.start_scheduler().await;
    info!(armed, "Scheduler started");

    let server = Arc::new(toolbox.mcp_server());
    Ok((toolbox, server))
}
