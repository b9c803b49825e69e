// Subprocess transport
//
// Spawns a tool server as a child process and frames messages over its
// standard streams. Environment overrides are merged onto the inherited
// environment, not a replacement for it.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex as StdMutex;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::debug;

use super::{read_frame, write_frame};
use crate::error::McpError;
use crate::protocol::JsonRpcResponse;

#[derive(Debug)]
pub struct StdioTransport {
    /// Write half. `None` after close; the mutex serializes concurrent sends.
    stdin: Mutex<Option<ChildStdin>>,
    /// Read half. `None` after close; locked only by the connection's
    /// receive loop.
    stdout: Mutex<Option<BufReader<ChildStdout>>>,
    /// Child handle, taken exactly once at close time
    child: StdMutex<Option<Child>>,
}

impl StdioTransport {
    /// Spawn `command args...` with `env` merged onto the inherited
    /// environment. If any pipe is missing after spawn the child is killed
    /// before the error is returned, so no half-wired process is left
    /// behind.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> Result<Self, McpError> {
        debug!(command, ?args, "Spawning MCP server process");

        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = match child.stdin.take() {
            Some(pipe) => pipe,
            None => {
                let _ = child.start_kill();
                return Err(missing_pipe("stdin"));
            }
        };
        let stdout = match child.stdout.take() {
            Some(pipe) => pipe,
            None => {
                let _ = child.start_kill();
                return Err(missing_pipe("stdout"));
            }
        };
        let stderr = match child.stderr.take() {
            Some(pipe) => pipe,
            None => {
                let _ = child.start_kill();
                return Err(missing_pipe("stderr"));
            }
        };

        // Drain stderr so a chatty server can't block on a full pipe. The
        // task ends on its own when the child exits and the pipe hits EOF.
        let server = command.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %server, "server stderr: {}", line);
            }
        });

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(Some(BufReader::new(stdout))),
            child: StdMutex::new(Some(child)),
        })
    }

    pub async fn send<T: serde::Serialize>(&self, message: &T) -> Result<(), McpError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        write_frame(stdin, message).await
    }

    pub async fn receive(&self) -> Result<JsonRpcResponse, McpError> {
        let mut guard = self.stdout.lock().await;
        let stdout = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        read_frame(stdout).await
    }

    /// Close stdin, terminate the child, then drop the stdout reader so
    /// every pipe is released when this returns. The receive loop must
    /// already be stopped, otherwise it still holds the stdout lock. Errors
    /// from the individual steps are aggregated rather than short-circuited
    /// so a failed stream shutdown never leaves the process running.
    pub async fn close(&self) -> Result<(), McpError> {
        let mut errors = Vec::new();

        if let Some(mut stdin) = self.stdin.lock().await.take() {
            if let Err(e) = stdin.shutdown().await {
                errors.push(format!("stdin: {}", e));
            }
        }

        // Take the handle out so a second close is a no-op. The std lock is
        // released before the await below.
        let child = self.child.lock().expect("child lock poisoned").take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                errors.push(format!("kill: {}", e));
            }
        }

        drop(self.stdout.lock().await.take());

        if errors.is_empty() {
            Ok(())
        } else {
            Err(McpError::Close(errors))
        }
    }
}

fn missing_pipe(name: &str) -> McpError {
    McpError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("child process {} was not captured", name),
    ))
}
