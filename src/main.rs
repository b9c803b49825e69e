// Talon - MCP client engine
// CLI entry point: connect to configured servers, list or call their tools

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use talon::{load_config, ConnectionOptions, McpRegistry};

#[derive(Parser)]
#[command(name = "talon", version, about = "MCP client engine")]
struct Cli {
    /// Path to the server configuration document (JSON)
    #[arg(long, default_value = "servers.json")]
    config: PathBuf,

    /// Per-call timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to every configured server and print its tools
    List,

    /// Call one tool and print its text output
    Call {
        /// Server name from the configuration document
        server: String,
        /// Tool name as declared by the server
        tool: String,
        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let configs = load_config(&cli.config)?;
    let options = ConnectionOptions {
        call_timeout: Duration::from_secs(cli.timeout),
    };

    let registry = McpRegistry::from_config_with(&configs, options).await;

    let outcome = run(&cli.command, &registry).await;

    // Teardown errors shouldn't mask the command's own result
    if let Err(e) = registry.close_all().await {
        eprintln!("Warning: {}", e);
    }

    outcome
}

async fn run(command: &Command, registry: &McpRegistry) -> Result<()> {
    match command {
        Command::List => {
            let mut names = registry.servers().await;
            names.sort();
            if names.is_empty() {
                println!("No servers connected.");
                return Ok(());
            }
            for name in names {
                println!("{}:", name);
                for tool in registry.tools_for(&name).await.unwrap_or_default() {
                    match &tool.description {
                        Some(desc) => println!("  {} - {}", tool.name, desc),
                        None => println!("  {}", tool.name),
                    }
                }
            }
        }
        Command::Call { server, tool, args } => {
            let arguments: serde_json::Value =
                serde_json::from_str(args).context("Tool arguments must be a JSON object")?;
            let output = registry
                .execute_tool(&format!("{}/{}", server, tool), arguments)
                .await?;
            println!("{}", output);
        }
    }
    Ok(())
}
