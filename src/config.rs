// Server configuration
//
// The configuration document maps server names to connection settings:
// either a command to spawn (stdio transport) or a host/port to dial (TCP
// transport). The two shapes are distinguished by their fields, no explicit
// tag on the wire.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// One named server entry in the configuration document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(flatten)]
    pub transport: TransportConfig,

    /// Disabled entries are kept in the document but skipped at connect time
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Connection settings for one server, one variant per transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransportConfig {
    /// Spawn a local process and talk over its standard streams
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Merged onto the inherited environment
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Dial a TCP endpoint. An empty host means `localhost`.
    Tcp {
        #[serde(default)]
        host: String,
        port: u16,
    },
}

impl ServerConfig {
    pub fn validate(&self, name: &str) -> Result<()> {
        match &self.transport {
            TransportConfig::Stdio { command, .. } => {
                if command.is_empty() {
                    anyhow::bail!("MCP server '{}': stdio transport requires a command", name);
                }
            }
            TransportConfig::Tcp { port, .. } => {
                if *port == 0 {
                    anyhow::bail!("MCP server '{}': TCP transport requires a nonzero port", name);
                }
            }
        }
        Ok(())
    }
}

/// Load the configuration document from a JSON file
pub fn load_config(path: impl AsRef<Path>) -> Result<HashMap<String, ServerConfig>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let servers: HashMap<String, ServerConfig> = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    for (name, config) in &servers {
        config.validate(name)?;
    }

    Ok(servers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stdio_entry_parses() {
        let config: ServerConfig = serde_json::from_str(
            r#"{"command":"npx","args":["-y","@modelcontextprotocol/server-filesystem"],"env":{"DEBUG":"1"}}"#,
        )
        .unwrap();

        match &config.transport {
            TransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 2);
                assert_eq!(env.get("DEBUG").unwrap(), "1");
            }
            TransportConfig::Tcp { .. } => panic!("Expected stdio transport"),
        }
        assert!(config.enabled);
    }

    #[test]
    fn test_tcp_entry_parses() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"host":"tools.internal","port":9100}"#).unwrap();

        match &config.transport {
            TransportConfig::Tcp { host, port } => {
                assert_eq!(host, "tools.internal");
                assert_eq!(*port, 9100);
            }
            TransportConfig::Stdio { .. } => panic!("Expected TCP transport"),
        }
    }

    #[test]
    fn test_tcp_host_defaults_empty() {
        let config: ServerConfig = serde_json::from_str(r#"{"port":9100}"#).unwrap();
        match &config.transport {
            TransportConfig::Tcp { host, .. } => assert_eq!(host, ""),
            TransportConfig::Stdio { .. } => panic!("Expected TCP transport"),
        }
    }

    #[test]
    fn test_disabled_entry() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"command":"some-server","enabled":false}"#).unwrap();
        assert!(!config.enabled);
    }

    #[test]
    fn test_neither_shape_rejected() {
        assert!(serde_json::from_str::<ServerConfig>(r#"{"enabled":true}"#).is_err());
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let config: ServerConfig = serde_json::from_str(r#"{"command":""}"#).unwrap();
        let err = config.validate("bad").unwrap_err();
        assert!(err.to_string().contains("bad"));
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let config: ServerConfig = serde_json::from_str(r#"{"host":"x","port":0}"#).unwrap();
        assert!(config.validate("bad").is_err());
    }

    #[test]
    fn test_load_config_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(
            &path,
            r#"{
                "files": {"command": "mcp-files", "args": ["--root", "/tmp"]},
                "search": {"host": "localhost", "port": 9200}
            }"#,
        )
        .unwrap();

        let servers = load_config(&path).unwrap();
        assert_eq!(servers.len(), 2);
        assert!(servers.contains_key("files"));
        assert!(servers.contains_key("search"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let err = load_config("/nonexistent/servers.json").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
