// TCP socket transport
//
// Dials a tool server listening on a raw socket. Same newline framing as
// the stdio transport.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use super::{read_frame, write_frame};
use crate::error::McpError;
use crate::protocol::JsonRpcResponse;

/// Bound on how long a dial may take before the attempt is abandoned
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
pub struct TcpTransport {
    /// Write half. `None` after close; the mutex serializes concurrent sends.
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Read half. `None` after close; locked only by the connection's
    /// receive loop.
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
}

impl TcpTransport {
    /// Dial `host:port`. An empty host defaults to `localhost`. Times out
    /// after [`CONNECT_TIMEOUT`]; on timeout or refusal nothing is left
    /// open.
    pub async fn connect(host: &str, port: u16) -> Result<Self, McpError> {
        let host = if host.is_empty() { "localhost" } else { host };
        let addr = format!("{}:{}", host, port);
        debug!(addr = %addr, "Dialing MCP server");

        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&addr))
            .await
            .map_err(|_| McpError::ConnectTimeout(CONNECT_TIMEOUT))??;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            writer: Mutex::new(Some(write_half)),
            reader: Mutex::new(Some(BufReader::new(read_half))),
        })
    }

    pub async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        write_frame(writer, message).await
    }

    pub async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        read_frame(reader).await
    }

    /// Shut down the write half and drop the read half. The receive loop
    /// must already be stopped, otherwise it still holds the reader lock.
    /// Both halves are released when this returns, not at transport drop.
    pub async fn close(&self) -> Result<(), McpError> {
        let mut errors = Vec::new();

        if let Some(mut writer) = self.writer.lock().await.take() {
            if let Err(e) = writer.shutdown().await {
                errors.push(format!("socket: {}", e));
            }
        }
        drop(self.reader.lock().await.take());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Close(errors))
        }
    }
}
