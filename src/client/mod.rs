// MCP client: per-server connections and the multi-server registry
//
// McpConnection is one session against one server (correlation engine,
// receive loop, handshake). McpRegistry owns a set of named connections
// and aggregates their tools.

pub mod connection;
pub mod registry;

pub use connection::{ConnectionOptions, McpConnection};
pub use registry::McpRegistry;
