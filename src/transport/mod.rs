// Duplex message channels to tool servers
//
// Two concrete transports, selected by configuration: a spawned local
// subprocess wired over stdio, and a raw TCP socket. Both frame messages as
// one JSON document per line, symmetric for send and receive. The set is
// closed on purpose - a future transport is a new variant here, not a
// change to any caller.

pub mod stdio;
pub mod tcp;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::TransportConfig;
use crate::error::McpError;
use crate::protocol::JsonRpcResponse;

pub use stdio::StdioTransport;
pub use tcp::{TcpTransport, CONNECT_TIMEOUT};

pub enum Transport {
    Stdio(StdioTransport),
    Tcp(TcpTransport),
}

impl Transport {
    /// Establish the channel described by `config`. Failure leaves no
    /// partial resource behind (no half-spawned process, no open socket).
    pub async fn connect(config: &TransportConfig) -> Result<Self, McpError> {
        match config {
            TransportConfig::Stdio { command, args, env } => {
                Ok(Transport::Stdio(StdioTransport::spawn(command, args, env)?))
            }
            TransportConfig::Tcp { host, port } => {
                Ok(Transport::Tcp(TcpTransport::connect(host, *port).await?))
            }
        }
    }

    /// Write one framed message. Safe to call concurrently; the underlying
    /// write half is serialized internally.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.send(message).await,
            Transport::Tcp(t) => t.send(message).await,
        }
    }

    /// Block until one full message arrives and decode it. Called only by
    /// the connection's single receive loop, never concurrently.
    pub async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        match self {
            Transport::Stdio(t) => t.receive().await,
            Transport::Tcp(t) => t.receive().await,
        }
    }

    /// Release the underlying OS resources. Safe to call more than once.
    pub async fn close(&self) -> Result<(), McpError> {
        match self {
            Transport::Stdio(t) => t.close().await,
            Transport::Tcp(t) => t.close().await,
        }
    }
}

/// Serialize `message` and write it as one line
async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), McpError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one non-blank line and decode it as a response. EOF reads as
/// [`McpError::ConnectionClosed`].
async fn read_frame<R>(reader: &mut R) -> Result<JsonRpcResponse, McpError>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let mut line = String::new();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Err(McpError::ConnectionClosed);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return Ok(serde_json::from_str(trimmed)?);
    }
}
