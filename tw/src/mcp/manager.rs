//! MCP connection manager: N servers, catalog cache, reconnection
//!
//! The manager owns one [`McpConnection`] per configured server plus its
//! cached tool catalog. Calls on one server serialize through that
//! connection's writer; different servers run in parallel. A lost connection
//! moves the server to `degraded` and kicks off bounded background
//! reconnection with exponential backoff; exhausting the attempts leaves the
//! server `dead`. The catalog refreshes lazily past its TTL and always right
//! after a reconnect.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{self, ToolCall};

use super::McpServerConfig;
use super::connection::McpConnection;
use super::error::McpError;
use super::protocol::{CallToolResult, ToolDescriptor};

/// Manager tuning knobs.
#[derive(Debug, Clone)]
pub struct McpManagerConfig {
    /// Per-request timeout on every RPC.
    pub request_timeout: Duration,
    /// Catalog freshness window.
    pub catalog_ttl: Duration,
    /// Bounded reconnection attempts after a connection loss.
    pub reconnect_attempts: u32,
    /// First reconnect delay; doubles per attempt.
    pub reconnect_base: Duration,
}

impl Default for McpManagerConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            catalog_ttl: Duration::from_secs(60),
            reconnect_attempts: 3,
            reconnect_base: Duration::from_secs(1),
        }
    }
}

/// Lifecycle state of one managed server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerStatus {
    Spawning,
    Handshake,
    Ready,
    Degraded,
    Dead,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Spawning => "spawning",
            ServerStatus::Handshake => "handshake",
            ServerStatus::Ready => "ready",
            ServerStatus::Degraded => "degraded",
            ServerStatus::Dead => "dead",
        }
    }
}

/// Snapshot returned by [`McpManager::statuses`].
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub name: String,
    pub status: ServerStatus,
    pub tool_count: usize,
}

/// How connections come to exist. Production spawns child processes; tests
/// inject scripted in-memory servers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &str, config: &McpServerConfig) -> Result<McpConnection, McpError>;
}

/// Spawns the configured command as a child process.
pub struct ProcessConnector;

#[async_trait]
impl Connector for ProcessConnector {
    async fn connect(&self, server: &str, config: &McpServerConfig) -> Result<McpConnection, McpError> {
        McpConnection::spawn_process(server, config)
    }
}

struct ServerState {
    config: McpServerConfig,
    connection: Option<McpConnection>,
    status: ServerStatus,
    catalog: Vec<ToolDescriptor>,
    catalog_refreshed_at: Option<Instant>,
}

type SharedState = Arc<Mutex<ServerState>>;

/// The connection manager.
pub struct McpManager {
    config: McpManagerConfig,
    connector: Box<dyn Connector>,
    servers: RwLock<HashMap<String, SharedState>>,
}

impl McpManager {
    pub fn new(config: McpManagerConfig) -> Arc<Self> {
        Self::with_connector(config, Box::new(ProcessConnector))
    }

    pub fn with_connector(config: McpManagerConfig, connector: Box<dyn Connector>) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            servers: RwLock::new(HashMap::new()),
        })
    }

    pub fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.read().expect("servers lock poisoned").keys().cloned().collect();
        names.sort();
        names
    }

    /// Register and connect a server. The returned error reflects the final
    /// connection attempt; the server entry exists (possibly `dead`) either
    /// way.
    pub async fn add_server(self: &Arc<Self>, name: &str, config: McpServerConfig) -> Result<(), McpError> {
        let state = Arc::new(Mutex::new(ServerState {
            config,
            connection: None,
            status: ServerStatus::Spawning,
            catalog: Vec::new(),
            catalog_refreshed_at: None,
        }));
        self.servers
            .write()
            .expect("servers lock poisoned")
            .insert(name.to_string(), Arc::clone(&state));

        self.connect_with_retries(name, &state).await.map(|_| ())
    }

    fn state_of(&self, server: &str) -> Result<SharedState, McpError> {
        self.servers
            .read()
            .expect("servers lock poisoned")
            .get(server)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(server.to_string()))
    }

    /// Current status of one server.
    pub async fn status(&self, server: &str) -> Result<ServerStatus, McpError> {
        let state = self.state_of(server)?;
        let state = state.lock().await;
        Ok(state.status)
    }

    /// Status snapshot across all servers, sorted by name.
    pub async fn statuses(&self) -> Vec<ServerSnapshot> {
        let entries: Vec<(String, SharedState)> = {
            let servers = self.servers.read().expect("servers lock poisoned");
            servers.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for (name, state) in entries {
            let state = state.lock().await;
            snapshots.push(ServerSnapshot {
                name,
                status: state.status,
                tool_count: state.catalog.len(),
            });
        }
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// The tool catalog for one server.
    ///
    /// Fresh cache is served directly. A stale cache on a live connection is
    /// refreshed in place. While the server is degraded the stale catalog is
    /// served with a warning; a dead server with no cache errors.
    pub async fn tools(&self, server: &str) -> Result<Vec<ToolDescriptor>, McpError> {
        let state = self.state_of(server)?;
        let mut state = state.lock().await;

        let fresh = state
            .catalog_refreshed_at
            .is_some_and(|at| at.elapsed() < self.config.catalog_ttl);
        if fresh && !state.catalog.is_empty() {
            return Ok(state.catalog.clone());
        }

        match (&state.connection, state.status) {
            (Some(conn), ServerStatus::Ready) if conn.is_alive() => {
                let conn = conn.clone();
                debug!(server, "manager: refreshing stale catalog");
                match conn.list_tools(self.config.request_timeout).await {
                    Ok(result) => {
                        state.catalog = result.tools;
                        state.catalog_refreshed_at = Some(Instant::now());
                        Ok(state.catalog.clone())
                    }
                    Err(e) if e.is_connection_loss() => {
                        warn!(server, "manager: connection lost during catalog refresh, serving stale");
                        state.status = ServerStatus::Degraded;
                        Ok(state.catalog.clone())
                    }
                    Err(e) => Err(e),
                }
            }
            _ => {
                if state.catalog.is_empty() {
                    Err(McpError::ServerDead {
                        server: server.to_string(),
                    })
                } else {
                    warn!(server, status = state.status.as_str(), "manager: serving stale catalog");
                    Ok(state.catalog.clone())
                }
            }
        }
    }

    /// Drop the cached catalog so the next read refreshes.
    pub async fn invalidate_catalog(&self, server: &str) -> Result<(), McpError> {
        let state = self.state_of(server)?;
        let mut state = state.lock().await;
        state.catalog_refreshed_at = None;
        Ok(())
    }

    /// Resolve a tool name (canonical, wire, or bare) against the live
    /// catalog and return `(canonical, wire)` names. When both the prefixed
    /// and the bare variant exist, the prefixed one wins.
    pub async fn resolve_tool(&self, server: &str, name: &str) -> Result<(String, String), McpError> {
        let canonical = domain::normalize(name, server);
        let short = domain::short_name(&canonical, server).to_string();
        let prefixed = domain::denormalize(&canonical, server);

        let catalog = self.tools(server).await?;
        let has = |candidate: &str| catalog.iter().any(|t| t.name == candidate);

        if has(&prefixed) {
            return Ok((canonical, prefixed));
        }
        if has(&short) {
            return Ok((canonical, short));
        }
        Err(McpError::UnknownTool {
            server: server.to_string(),
            tool: canonical,
        })
    }

    /// Execute one tool call. The name is resolved against the catalog at
    /// the last hop; a lost connection fails the call and starts background
    /// reconnection.
    pub async fn call(self: &Arc<Self>, call: &ToolCall) -> Result<CallToolResult, McpError> {
        let state = self.state_of(&call.server)?;
        let (canonical, wire) = self.resolve_tool(&call.server, &call.tool).await?;

        let conn = {
            let state = state.lock().await;
            match (&state.connection, state.status) {
                (Some(conn), ServerStatus::Ready) if conn.is_alive() => conn.clone(),
                _ => {
                    return Err(McpError::ServerDead {
                        server: call.server.clone(),
                    });
                }
            }
        };

        debug!(server = %call.server, tool = %canonical, wire = %wire, "manager: executing tool call");
        let arguments = Value::Object(call.parameters.clone());
        match conn.call_tool(&wire, arguments, self.config.request_timeout).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_connection_loss() => {
                warn!(server = %call.server, "manager: connection lost, scheduling reconnect");
                {
                    let mut state = state.lock().await;
                    state.status = ServerStatus::Degraded;
                    state.connection = None;
                }
                self.spawn_reconnect(&call.server);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Kick off background reconnection for a degraded server.
    fn spawn_reconnect(self: &Arc<Self>, server: &str) {
        let manager = Arc::clone(self);
        let server = server.to_string();
        tokio::spawn(async move {
            let Ok(state) = manager.state_of(&server) else { return };
            let _ = manager.connect_with_retries(&server, &state).await;
        });
    }

    /// Connect (or reconnect) with bounded exponential backoff. On success
    /// the catalog is refreshed before the server is marked ready.
    async fn connect_with_retries(&self, server: &str, state: &SharedState) -> Result<McpConnection, McpError> {
        let mut last_error = McpError::ServerDead {
            server: server.to_string(),
        };

        for attempt in 0..self.config.reconnect_attempts {
            if attempt > 0 {
                let delay = self.config.reconnect_base * 2u32.saturating_pow(attempt - 1);
                debug!(server, attempt, ?delay, "manager: backing off before reconnect");
                tokio::time::sleep(delay).await;
            }

            match self.connect_once(server, state).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(server, attempt, error = %e, "manager: connection attempt failed");
                    let mut state = state.lock().await;
                    state.status = ServerStatus::Degraded;
                    last_error = e;
                }
            }
        }

        let mut state = state.lock().await;
        state.status = ServerStatus::Dead;
        state.connection = None;
        warn!(server, "manager: reconnection attempts exhausted, server dead");
        Err(last_error)
    }

    async fn connect_once(&self, server: &str, state: &SharedState) -> Result<McpConnection, McpError> {
        let config = {
            let mut state = state.lock().await;
            state.status = ServerStatus::Spawning;
            state.config.clone()
        };

        let conn = self.connector.connect(server, &config).await?;

        {
            let mut state = state.lock().await;
            state.status = ServerStatus::Handshake;
        }
        conn.initialize(self.config.request_timeout).await?;

        let tools = conn.list_tools(self.config.request_timeout).await?;
        info!(server, tool_count = tools.tools.len(), "manager: server ready");

        let mut state = state.lock().await;
        state.catalog = tools.tools;
        state.catalog_refreshed_at = Some(Instant::now());
        state.connection = Some(conn.clone());
        state.status = ServerStatus::Ready;
        Ok(conn)
    }

    /// Tear down every connection. Used on daemon shutdown.
    pub async fn shutdown(&self) {
        let entries: Vec<SharedState> = {
            let servers = self.servers.read().expect("servers lock poisoned");
            servers.values().cloned().collect()
        };
        for state in entries {
            let mut state = state.lock().await;
            if let Some(conn) = state.connection.take() {
                conn.shutdown();
            }
            state.status = ServerStatus::Dead;
        }
    }
}
