// Registry of named MCP server connections
//
// Owns every connection as a group: connect-and-discover on add, aggregate
// tool listing, group teardown. Tool names are qualified as
// "<server>/<tool>" at this layer so two servers can declare the same tool
// name without colliding.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::connection::{ConnectionOptions, McpConnection};
use crate::config::{ServerConfig, TransportConfig};
use crate::error::McpError;
use crate::protocol::{CallToolResult, ToolDescriptor};

struct ServerEntry {
    connection: Arc<McpConnection>,
    tools: Vec<ToolDescriptor>,
}

pub struct McpRegistry {
    servers: RwLock<HashMap<String, ServerEntry>>,
    options: ConnectionOptions,
}

impl McpRegistry {
    pub fn new() -> Self {
        Self::with_options(ConnectionOptions::default())
    }

    pub fn with_options(options: ConnectionOptions) -> Self {
        Self {
            servers: RwLock::new(HashMap::new()),
            options,
        }
    }

    /// Connect every enabled entry of a configuration document. Individual
    /// failures are logged and skipped so one bad server doesn't take down
    /// the rest.
    pub async fn from_config(configs: &HashMap<String, ServerConfig>) -> Self {
        Self::from_config_with(configs, ConnectionOptions::default()).await
    }

    /// [`from_config`](Self::from_config) with explicit connection options
    pub async fn from_config_with(
        configs: &HashMap<String, ServerConfig>,
        options: ConnectionOptions,
    ) -> Self {
        let registry = Self::with_options(options);

        for (name, config) in configs {
            if !config.enabled {
                tracing::debug!("Skipping disabled MCP server '{}'", name);
                continue;
            }
            if let Err(e) = registry.add_server(name, &config.transport).await {
                warn!("Failed to connect to MCP server '{}': {}", name, e);
            }
        }

        registry
    }

    /// Connect a new server and discover its tools. Fails without touching
    /// existing state if the name is taken, and registers nothing if the
    /// connection or the discovery fails.
    pub async fn add_server(&self, name: &str, config: &TransportConfig) -> Result<()> {
        if self.servers.read().await.contains_key(name) {
            anyhow::bail!("MCP server '{}' already exists", name);
        }

        let connection = McpConnection::connect(name, config, self.options.clone())
            .await
            .with_context(|| format!("Failed to connect to MCP server '{}'", name))?;

        let tools = match connection.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e)
                    .with_context(|| format!("Failed to list tools for MCP server '{}'", name));
            }
        };

        let mut servers = self.servers.write().await;
        if servers.contains_key(name) {
            // Lost a race with a concurrent add of the same name; back out
            // our connection and leave the winner untouched.
            let _ = connection.close().await;
            anyhow::bail!("MCP server '{}' already exists", name);
        }

        info!("Connected to MCP server '{}' with {} tools", name, tools.len());
        servers.insert(name.to_string(), ServerEntry { connection, tools });
        Ok(())
    }

    /// Close one server's connection and forget it
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let entry = self
            .servers
            .write()
            .await
            .remove(name)
            .with_context(|| format!("MCP server '{}' not found", name))?;

        entry
            .connection
            .close()
            .await
            .with_context(|| format!("Failed to close MCP server '{}'", name))?;
        info!("Disconnected from MCP server '{}'", name);
        Ok(())
    }

    /// Names of all registered servers
    pub async fn servers(&self) -> Vec<String> {
        self.servers.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.servers.read().await.contains_key(name)
    }

    /// Tools declared by one server, as of its last discovery
    pub async fn tools_for(&self, name: &str) -> Option<Vec<ToolDescriptor>> {
        self.servers
            .read()
            .await
            .get(name)
            .map(|entry| entry.tools.clone())
    }

    /// Every registered server's tools, concatenated. Order across servers
    /// is unspecified; order within one server matches its last discovery.
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        self.servers
            .read()
            .await
            .values()
            .flat_map(|entry| entry.tools.iter().cloned())
            .collect()
    }

    /// Raw dispatch to one server, result returned as the server sent it
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> Result<CallToolResult> {
        let connection = {
            let servers = self.servers.read().await;
            let entry = servers
                .get(server)
                .with_context(|| format!("MCP server '{}' not found", server))?;
            entry.connection.clone()
        };

        connection
            .call_tool(tool, arguments)
            .await
            .with_context(|| format!("Tool call '{}/{}' failed", server, tool))
    }

    /// Host-facing entry point: invoke a tool by its qualified
    /// "<server>/<tool>" name and return its text output. A result the
    /// server flagged with `isError` comes back as a typed failure carrying
    /// the tool's text, never as a success payload.
    pub async fn execute_tool(&self, qualified_name: &str, arguments: Value) -> Result<String> {
        let (server, tool) = qualified_name
            .split_once('/')
            .with_context(|| format!("Invalid qualified tool name: '{}'", qualified_name))?;

        let result = self.call_tool(server, tool, arguments).await?;
        if result.is_error() {
            return Err(McpError::ToolFailed(result.text()).into());
        }
        Ok(result.text())
    }

    /// Close every connection and clear the registry. Close errors are
    /// collected and reported together; the registry ends up empty either
    /// way.
    pub async fn close_all(&self) -> Result<()> {
        let entries: Vec<_> = self.servers.write().await.drain().collect();

        let mut errors = Vec::new();
        for (name, entry) in entries {
            if let Err(e) = entry.connection.close().await {
                errors.push(format!("{}: {}", name, e));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Close(errors).into())
        }
    }
}

impl Default for McpRegistry {
    fn default() -> Self {
        Self::new()
    }
}
