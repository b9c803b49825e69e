// Error taxonomy for the MCP client engine
//
// Callers need to distinguish "the server reported an error" from "we gave
// up waiting" from "the connection is gone", so these are separate variants
// rather than stringly-typed anyhow errors.

use std::time::Duration;

/// Errors surfaced by connections, transports, and the registry call path
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// TCP dial did not complete within the connect timeout
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Underlying I/O failure (spawn, pipe, socket read/write)
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A wire message could not be encoded or decoded
    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The server answered with a JSON-RPC error object
    #[error("server error {code}: {message}")]
    Protocol {
        code: i64,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// No response arrived within the configured call timeout
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired before a response arrived
    #[error("call cancelled by caller")]
    Cancelled,

    /// The connection was closed (explicitly or by the server) while the
    /// call was outstanding
    #[error("connection closed")]
    ConnectionClosed,

    /// The tool ran but reported failure (`isError` in the result)
    #[error("tool reported failure: {0}")]
    ToolFailed(String),

    /// One or more errors during teardown, aggregated
    #[error("close failed: {}", .0.join("; "))]
    Close(Vec<String>),
}
