//! One live MCP server connection over line-delimited JSON-RPC
//!
//! A connection owns two background tasks: a writer that serializes every
//! outbound frame through the child's stdin (so frames never interleave),
//! and a reader that routes responses to waiters by correlation id.
//! Unmatched ids are logged and dropped; notifications and server-initiated
//! requests are ignored. When either side of the pipe fails, all pending
//! waiters resolve with `ServerDead`.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::McpServerConfig;
use super::error::McpError;
use super::protocol::{
    CallToolResult, Incoming, InitializeResult, Notification, PROTOCOL_VERSION, Request, ToolsListResult,
    parse_incoming,
};

/// Client name reported in the initialize handshake.
const CLIENT_NAME: &str = "taskweave";

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>;

struct ConnShared {
    server: String,
    next_id: AtomicU64,
    pending: PendingMap,
    alive: AtomicBool,
    close: CancellationToken,
}

impl ConnShared {
    /// Flip to dead and fail every waiter.
    fn mark_dead(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!(server = %self.server, "connection: marking dead");
        }
        self.close.cancel();
        let drained: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        for (id, waiter) in drained {
            trace!(server = %self.server, id, "connection: failing pending waiter");
            let _ = waiter.send(Err(McpError::ServerDead {
                server: self.server.clone(),
            }));
        }
    }
}

/// Handle to a live server connection. Cheap to clone; all clones share the
/// writer channel and the pending-request table.
#[derive(Clone)]
pub struct McpConnection {
    shared: Arc<ConnShared>,
    writer_tx: mpsc::Sender<String>,
}

impl McpConnection {
    /// Spawn the configured child process and wire up its stdio.
    pub fn spawn_process(server: &str, config: &McpServerConfig) -> Result<Self, McpError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| McpError::Spawn {
            server: server.to_string(),
            message: e.to_string().to_lowercase(),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            message: "child stdin unavailable".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Spawn {
            server: server.to_string(),
            message: "child stdout unavailable".into(),
        })?;

        Ok(Self::from_streams(server, stdout, stdin, Some(child)))
    }

    /// Build a connection over arbitrary streams. Production uses the child's
    /// stdio; tests use in-memory duplex pipes.
    pub fn from_streams<R, W>(server: &str, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(ConnShared {
            server: server.to_string(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            alive: AtomicBool::new(true),
            close: CancellationToken::new(),
        });

        let (writer_tx, writer_rx) = mpsc::channel::<String>(64);

        tokio::spawn(reader_task(Arc::clone(&shared), reader, child));
        tokio::spawn(writer_task(Arc::clone(&shared), writer, writer_rx));

        Self { shared, writer_tx }
    }

    pub fn server(&self) -> &str {
        &self.shared.server
    }

    pub fn is_alive(&self) -> bool {
        self.shared.alive.load(Ordering::SeqCst)
    }

    /// Tear the connection down, killing the child and failing any waiters.
    pub fn shutdown(&self) {
        self.shared.mark_dead();
    }

    /// Send one request and wait for the matching response.
    pub async fn request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, McpError> {
        if !self.is_alive() {
            return Err(McpError::ServerDead {
                server: self.shared.server.clone(),
            });
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        let line = serde_json::to_string(&Request::new(id, method, params)).map_err(|e| McpError::Protocol {
            server: self.shared.server.clone(),
            message: e.to_string(),
        })?;

        trace!(server = %self.shared.server, id, method, "connection: sending request");
        if self.writer_tx.send(line).await.is_err() {
            self.shared.pending.lock().expect("pending lock poisoned").remove(&id);
            return Err(McpError::ServerDead {
                server: self.shared.server.clone(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::ServerDead {
                server: self.shared.server.clone(),
            }),
            Err(_) => {
                self.shared.pending.lock().expect("pending lock poisoned").remove(&id);
                Err(McpError::Timeout {
                    server: self.shared.server.clone(),
                    timeout,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&Notification::new(method, params)).map_err(|e| McpError::Protocol {
            server: self.shared.server.clone(),
            message: e.to_string(),
        })?;
        self.writer_tx.send(line).await.map_err(|_| McpError::ServerDead {
            server: self.shared.server.clone(),
        })
    }

    /// Run the initialize handshake: `initialize` then
    /// `notifications/initialized`.
    pub async fn initialize(&self, timeout: Duration) -> Result<InitializeResult, McpError> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": env!("CARGO_PKG_VERSION") },
        });

        let result = self
            .request("initialize", Some(params), timeout)
            .await
            .map_err(|e| match e {
                McpError::Rpc { server, message, .. } => McpError::Handshake { server, message },
                other => other,
            })?;

        let decoded: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Handshake {
                server: self.shared.server.clone(),
                message: e.to_string(),
            })?;

        self.notify("notifications/initialized", Some(json!({}))).await?;
        debug!(
            server = %self.shared.server,
            protocol_version = %decoded.protocol_version,
            "connection: handshake complete"
        );
        Ok(decoded)
    }

    /// Fetch the server's tool catalog.
    pub async fn list_tools(&self, timeout: Duration) -> Result<ToolsListResult, McpError> {
        let result = self.request("tools/list", Some(json!({})), timeout).await?;
        serde_json::from_value(result).map_err(|e| McpError::Protocol {
            server: self.shared.server.clone(),
            message: e.to_string(),
        })
    }

    /// Invoke one tool by its wire name.
    pub async fn call_tool(
        &self,
        wire_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallToolResult, McpError> {
        let params = json!({ "name": wire_name, "arguments": arguments });
        let result = self.request("tools/call", Some(params), timeout).await?;
        Ok(CallToolResult::from_value(&result))
    }
}

async fn reader_task<R>(shared: Arc<ConnShared>, reader: R, mut child: Option<Child>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = shared.close.cancelled() => break,
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                handle_line(&shared, trimmed);
            }
            Ok(None) => {
                debug!(server = %shared.server, "connection: stdout closed");
                break;
            }
            Err(e) => {
                warn!(server = %shared.server, error = %e, "connection: read error");
                break;
            }
        }
    }

    shared.mark_dead();
    if let Some(child) = child.as_mut() {
        let _ = child.kill().await;
    }
}

fn handle_line(shared: &ConnShared, line: &str) {
    match parse_incoming(line) {
        Ok(Incoming::Response(response)) => {
            let waiter = shared
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&response.id);
            match waiter {
                Some(tx) => {
                    let outcome = match response.error {
                        Some(error) => Err(McpError::rpc(&shared.server, error)),
                        None => Ok(response.result.unwrap_or(Value::Null)),
                    };
                    let _ = tx.send(outcome);
                }
                None => {
                    warn!(server = %shared.server, id = response.id, "connection: unmatched response id");
                }
            }
        }
        Ok(Incoming::ServerRequest { method, .. }) => {
            debug!(server = %shared.server, %method, "connection: ignoring server-initiated request");
        }
        Ok(Incoming::Notification { method }) => {
            trace!(server = %shared.server, %method, "connection: notification ignored");
        }
        Err(e) => {
            warn!(server = %shared.server, error = %e, "connection: unparseable line");
        }
    }
}

async fn writer_task<W>(shared: Arc<ConnShared>, mut writer: W, mut rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    while let Some(line) = rx.recv().await {
        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        };
        if let Err(e) = write.await {
            warn!(server = %shared.server, error = %e, "connection: write error");
            shared.mark_dead();
            return;
        }
    }
    // All handles dropped: close stdin so the child can exit
    let _ = writer.shutdown().await;
}

#[cfg(test)]
pub mod testing {
    //! In-memory fake server used by connection and manager tests.

    use super::*;
    use tokio::io::{ReadHalf, WriteHalf};

    /// Behavior of the scripted server for a given method.
    #[derive(Clone)]
    pub enum ServerBehavior {
        /// Respond to tools/list with these tool names.
        Tools(Vec<&'static str>),
        /// Die (stop responding and close the pipe) on the first tools/call.
        DieOnCall,
    }

    /// Spawn an in-memory server speaking the MCP handshake, returning a
    /// connected client handle.
    pub fn scripted_connection(server: &str, behavior: ServerBehavior) -> McpConnection {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client_read, client_write) = tokio::io::split(client_io);
        let (server_read, server_write) = tokio::io::split(server_io);

        tokio::spawn(run_fake_server(server_read, server_write, behavior));
        McpConnection::from_streams(server, client_read, client_write, None)
    }

    async fn run_fake_server(
        reader: ReadHalf<tokio::io::DuplexStream>,
        mut writer: WriteHalf<tokio::io::DuplexStream>,
        behavior: ServerBehavior,
    ) {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let Ok(value) = serde_json::from_str::<Value>(&line) else { continue };
            let method = value.get("method").and_then(Value::as_str).unwrap_or_default();
            let id = value.get("id").cloned();

            let result = match (method, id) {
                ("initialize", Some(id)) => Some((
                    id,
                    json!({
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": { "tools": {} },
                        "serverInfo": { "name": "fake", "version": "0.0.0" },
                    }),
                )),
                ("tools/list", Some(id)) => {
                    let tools = match &behavior {
                        ServerBehavior::Tools(names) => names.clone(),
                        ServerBehavior::DieOnCall => vec!["echo"],
                    };
                    let tools: Vec<Value> = tools
                        .iter()
                        .map(|name| {
                            json!({
                                "name": name,
                                "description": format!("fake tool {name}"),
                                "inputSchema": {
                                    "type": "object",
                                    "properties": { "path": { "type": "string" } },
                                    "required": ["path"],
                                },
                            })
                        })
                        .collect();
                    Some((id, json!({ "tools": tools })))
                }
                ("tools/call", Some(id)) => {
                    if matches!(behavior, ServerBehavior::DieOnCall) {
                        // Simulate a crash mid-request
                        return;
                    }
                    let name = value
                        .pointer("/params/name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                    Some((
                        id,
                        json!({ "content": [{ "type": "text", "text": format!("ran {name}") }] }),
                    ))
                }
                _ => None,
            };

            if let Some((id, result)) = result {
                let frame = json!({ "jsonrpc": "2.0", "id": id, "result": result });
                let mut out = frame.to_string();
                out.push('\n');
                if writer.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    }
}
