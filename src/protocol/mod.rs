// Wire protocol: JSON-RPC envelopes and MCP payload shapes

pub mod jsonrpc;
pub mod types;

pub use jsonrpc::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
    JSONRPC_VERSION,
};
pub use types::{
    CallToolParams, CallToolResult, ClientCapabilities, ContentBlock, Implementation,
    InitializeParams, InitializeResult, ListToolsResult, ToolDescriptor, PROTOCOL_VERSION,
};
