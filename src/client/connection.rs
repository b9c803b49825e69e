// A single MCP server connection
//
// Owns one transport and the pending-call table, assigns correlation IDs,
// and runs one background receive loop that routes incoming responses to
// waiting callers. All session state lives here; nothing is shared between
// two connections.
//
// The pending table is the only mutable state touched from both the
// callers and the receive loop. Every path that can resolve a call
// (response delivery, timeout, cancellation, close) removes the entry
// under the same lock, so exactly one path wins and nothing is delivered
// twice. Delivering to an entry that is already gone is a no-op by design:
// it means the caller resolved first.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TransportConfig;
use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, RequestId,
    ToolDescriptor,
};
use crate::transport::Transport;

/// Immutable per-connection settings, fixed at construction. There is no
/// way to change the timeout on a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// How long one call may wait for its response
    pub call_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Per-connection protocol state, guarded by one async lock so the
/// handshake runs at most once
struct Session {
    state: SessionState,
    server_info: Option<Implementation>,
    tools: Vec<ToolDescriptor>,
    tool_index: HashMap<String, usize>,
}

type PendingMap = HashMap<String, oneshot::Sender<JsonRpcResponse>>;

pub struct McpConnection {
    name: String,
    transport: Arc<Transport>,
    options: ConnectionOptions,
    /// Monotonically increasing; an ID is never reused while pending
    next_id: AtomicI64,
    pending: Arc<StdMutex<PendingMap>>,
    session: Mutex<Session>,
    closed: AtomicBool,
    recv_task: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for McpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpConnection")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl McpConnection {
    /// Establish the transport and start the receive loop. The session is
    /// left uninitialized; the handshake runs on first use (or an explicit
    /// [`initialize`](Self::initialize)).
    pub async fn connect(
        name: impl Into<String>,
        config: &TransportConfig,
        options: ConnectionOptions,
    ) -> Result<Arc<Self>, McpError> {
        let name = name.into();
        let transport = Arc::new(Transport::connect(config).await?);

        let connection = Arc::new(Self {
            name: name.clone(),
            transport: transport.clone(),
            options,
            next_id: AtomicI64::new(1),
            pending: Arc::new(StdMutex::new(HashMap::new())),
            session: Mutex::new(Session {
                state: SessionState::Uninitialized,
                server_info: None,
                tools: Vec::new(),
                tool_index: HashMap::new(),
            }),
            closed: AtomicBool::new(false),
            recv_task: StdMutex::new(None),
        });

        let handle = tokio::spawn(receive_loop(
            transport,
            connection.pending.clone(),
            name,
        ));
        *connection.recv_task.lock().expect("recv_task lock poisoned") = Some(handle);

        Ok(connection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Server identity recorded from the handshake result
    pub async fn server_info(&self) -> Option<Implementation> {
        self.session.lock().await.server_info.clone()
    }

    /// Tools cached by the last `list_tools`
    pub async fn tools(&self) -> Vec<ToolDescriptor> {
        self.session.lock().await.tools.clone()
    }

    /// Look up one cached tool by name
    pub async fn find_tool(&self, name: &str) -> Option<ToolDescriptor> {
        let session = self.session.lock().await;
        session
            .tool_index
            .get(name)
            .map(|&index| session.tools[index].clone())
    }

    pub async fn is_ready(&self) -> bool {
        self.session.lock().await.state == SessionState::Ready
    }

    /// Number of calls still waiting for a response. Mostly useful for
    /// diagnostics and tests.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }

    /// Run the handshake: an `initialize` request followed by the
    /// `notifications/initialized` notification. Idempotent; a call on an
    /// already-ready session does nothing. On any failure the session
    /// drops back to uninitialized and the error is returned.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let mut session = self.session.lock().await;
        match session.state {
            SessionState::Ready => return Ok(()),
            SessionState::Closed => return Err(McpError::ConnectionClosed),
            SessionState::Uninitialized | SessionState::Initializing => {}
        }
        session.state = SessionState::Initializing;

        let params = serde_json::to_value(InitializeParams::new())?;
        let result = match self.call("initialize", Some(params), None).await {
            Ok(value) => value,
            Err(e) => {
                session.state = SessionState::Uninitialized;
                return Err(e);
            }
        };

        let init: InitializeResult = match serde_json::from_value(result) {
            Ok(init) => init,
            Err(e) => {
                session.state = SessionState::Uninitialized;
                return Err(McpError::Decode(e));
            }
        };
        session.server_info = init.server_info;

        // The server must observe the notification only after it answered
        // the initialize request; the session becomes ready only after the
        // notification went out.
        let note = JsonRpcNotification::new("notifications/initialized", None);
        if let Err(e) = self.transport.send(&note).await {
            session.state = SessionState::Uninitialized;
            return Err(e);
        }

        session.state = SessionState::Ready;
        info!(
            server = %self.name,
            server_info = ?session.server_info,
            "MCP session initialized"
        );
        Ok(())
    }

    /// Fetch the server's tool list, replacing the cached list and name
    /// index together. Initializes the session first if that has not
    /// happened yet.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        self.ensure_initialized().await?;

        let value = self.call("tools/list", None, None).await?;
        let result: ListToolsResult = serde_json::from_value(value)?;

        let mut session = self.session.lock().await;
        session.tool_index = result
            .tools
            .iter()
            .enumerate()
            .map(|(index, tool)| (tool.name.clone(), index))
            .collect();
        session.tools = result.tools.clone();

        debug!(server = %self.name, count = result.tools.len(), "Tool list refreshed");
        Ok(result.tools)
    }

    /// Invoke one tool. The result's `isError` flag is returned as-is;
    /// interpreting failed content is the caller's concern.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        self.call_tool_with(name, arguments, None).await
    }

    /// Like [`call_tool`](Self::call_tool) with a caller-supplied
    /// cancellation token. Cancelling ends only this caller's wait; no
    /// cancel message is sent on the wire and the server may still run the
    /// tool to completion.
    pub async fn call_tool_with(
        &self,
        name: &str,
        arguments: Value,
        cancel: Option<&CancellationToken>,
    ) -> Result<CallToolResult, McpError> {
        self.ensure_initialized().await?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let value = self.call("tools/call", Some(params), cancel).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Generic request/response path used by every protocol method.
    ///
    /// Registers a pending entry, then races the whole send-plus-wait
    /// against the configured timeout and the caller's cancellation, so a
    /// provider that stops reading cannot block a caller past its budget.
    /// The losing paths never touch an entry the winner already removed.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, McpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionClosed);
        }

        let id = RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = id.key();

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.insert(key.clone(), tx);
        }
        // A close that raced the insert above has already drained the map;
        // don't leave an entry it will never fail.
        if self.closed.load(Ordering::SeqCst) {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&key);
            return Err(McpError::ConnectionClosed);
        }

        let request = JsonRpcRequest::new(id, method, params);

        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        // The timeout bounds the send as well as the wait: a send
        // abandoned mid-frame can garble the stream, after which the
        // receive loop's decode error degrades the engine - the same
        // documented outcome as any other wire fault.
        let work = async {
            self.transport.send(&request).await?;
            match rx.await {
                Ok(response) => response.into_result(),
                // Sender dropped without a send: close() failed this call
                Err(_) => Err(McpError::ConnectionClosed),
            }
        };
        tokio::pin!(work);

        let outcome = tokio::select! {
            result = &mut work => result,
            _ = tokio::time::sleep(self.options.call_timeout) => {
                Err(McpError::Timeout(self.options.call_timeout))
            }
            _ = cancelled => Err(McpError::Cancelled),
        };

        if outcome.is_err() {
            // Whichever path lost, the entry must not linger; removing an
            // entry another path already resolved is a no-op.
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&key);
        }
        outcome
    }

    /// Close the session: fail every still-pending call with a
    /// closed-connection outcome, stop the receive loop, release the
    /// transport. Calling this twice is safe; a call that is mid-delivery
    /// on the normal path is not failed a second time.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self
            .recv_task
            .lock()
            .expect("recv_task lock poisoned")
            .take()
        {
            handle.abort();
        }

        // Dropping the senders resolves every waiter with ConnectionClosed.
        // Entries the receive loop already completed are no longer in the
        // map, so they cannot be failed again here.
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        let outstanding = drained.len();
        drop(drained);
        if outstanding > 0 {
            debug!(server = %self.name, outstanding, "Failed outstanding calls on close");
        }

        let result = self.transport.close().await;

        self.session.lock().await.state = SessionState::Closed;
        info!(server = %self.name, "MCP connection closed");
        result
    }

    async fn ensure_initialized(&self) -> Result<(), McpError> {
        {
            let session = self.session.lock().await;
            match session.state {
                SessionState::Ready => return Ok(()),
                SessionState::Closed => return Err(McpError::ConnectionClosed),
                _ => {}
            }
        }
        self.initialize().await
    }
}

/// Single receive loop per connection. Routes each decoded response to the
/// pending entry matching its correlation ID; responses nobody is waiting
/// for anymore are dropped silently (the waiter already resolved by
/// timeout, cancellation, or close). A decode or connection error ends the
/// loop permanently - outstanding calls then resolve only via timeout,
/// cancellation, or an explicit close.
async fn receive_loop(
    transport: Arc<Transport>,
    pending: Arc<StdMutex<PendingMap>>,
    name: String,
) {
    loop {
        match transport.receive().await {
            Ok(response) => {
                let key = response.id.key();
                let sender = pending.lock().expect("pending lock poisoned").remove(&key);
                match sender {
                    Some(tx) => {
                        // Send fails if the waiter gave up between removal
                        // and delivery; that race is already resolved.
                        let _ = tx.send(response);
                    }
                    None => {
                        debug!(server = %name, id = %key, "Dropping response with no pending call");
                    }
                }
            }
            Err(McpError::ConnectionClosed) => {
                debug!(server = %name, "Server closed the connection; receive loop ending");
                break;
            }
            Err(e) => {
                warn!(server = %name, "Receive loop terminated: {}", e);
                break;
            }
        }
    }
}
