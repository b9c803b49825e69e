// Talon - MCP client engine
// Library exports

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

pub use client::{ConnectionOptions, McpConnection, McpRegistry};
pub use config::{load_config, ServerConfig, TransportConfig};
pub use error::McpError;
