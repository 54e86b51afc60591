use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rmcp::model::JsonObject;
use tracing::info;
use tracing_subscriber::EnvFilter;

use toolbox::server::start_mcp_http;
use toolbox::tools::result_text;
use toolbox::{CallerId, TaskStore, Toolbox, ToolboxConfig, create_server};

// rmcp imports for MCP stdio server mode
use rmcp::service::ServiceExt;
use rmcp::transport::stdio;

#[derive(Parser)]
#[command(name = "toolbox")]
#[command(about = "MCP tool server with workflows and scheduled tasks")]
struct Cli {
    /// Root directory for logs, reports and scheduled tasks
    #[arg(long, global = true, env = "TOOLBOX_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run as an MCP stdio server (for use in mcp.json)
    McpStdio,
    /// Run as an MCP HTTP server
    McpHttp {
        /// Bind address, e.g. 0.0.0.0:3942
        #[arg(long, default_value = "127.0.0.1:3942")]
        bind: String,
    },
    /// List the loaded tools
    ListTools,
    /// Invoke one tool and print its result
    Call {
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Print the persisted scheduled tasks
    Tasks,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout belongs to the MCP stdio transport.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("toolbox=info".parse()?)
                .add_directive("rmcp=warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.data_dir {
        Some(dir) => ToolboxConfig::for_data_dir(dir),
        None => ToolboxConfig::default(),
    };

    match cli.command {
        Commands::McpStdio => {
            info!("Starting MCP stdio server (rmcp)");
            let (toolbox, server) = create_server(config).await?;

            let service = server
                .as_ref()
                .clone()
                .serve(stdio())
                .await
                .inspect_err(|e| tracing::error!("serving error: {:?}", e))?;

            // Block until the MCP session ends.
            service.waiting().await?;
            toolbox.shutdown().await;
            info!("MCP stdio server session ended");
        }
        Commands::McpHttp { bind } => {
            info!("Starting MCP HTTP server (rmcp) on {}", bind);
            let (toolbox, server) = create_server(config).await?;

            tokio::select! {
                result = start_mcp_http(server, &bind) => result?,
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
            toolbox.shutdown().await;
        }
        Commands::ListTools => {
            let toolbox = Toolbox::bootstrap(config).await?;
            let set = toolbox.registry().snapshot().await;
            for name in set.names() {
                let description = set
                    .get(&name)
                    .map(|h| h.description().to_string())
                    .unwrap_or_default();
                println!("{:<16} {}", name, description);
            }
        }
        Commands::Call { tool, args } => {
            let args: JsonObject = serde_json::from_str(&args)
                .with_context(|| format!("--args must be a JSON object, got {}", args))?;

            let toolbox = Toolbox::bootstrap(config).await?;
            let result = toolbox
                .dispatcher()
                .dispatch(&tool, args, CallerId::cli())
                .await;

            println!("{}", result_text(&result));
            if result.is_error.unwrap_or(false) {
                std::process::exit(1);
            }
        }
        Commands::Tasks => {
            let tasks = TaskStore::new(&config.tasks_file).load().await;
            if tasks.is_empty() {
                println!("No scheduled tasks.");
                return Ok(());
            }
            println!("{}", serde_json::to_string_pretty(&tasks)?);
        }
    }

    Ok(())
}
