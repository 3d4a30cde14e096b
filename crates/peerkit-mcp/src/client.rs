//! Protocol client — drives one peer connection.
//!
//! Owns a [`Transport`], runs the version handshake, discovers the peer's
//! capabilities, and issues tool/resource listing, tool invocation, and
//! liveness probes. Tool discovery is mandatory during connect; resource
//! discovery is best-effort.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use peerkit_types::{ToolDefinition, ToolSchema};

use crate::error::McpError;
use crate::transport::Transport;
use crate::wire::{Request, Response};

/// Protocol version spoken by this client. The handshake fails unless the
/// peer reports exactly this version.
pub const PROTOCOL_VERSION: &str = "1.0";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity sent to the peer during the handshake.
#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Connection lifecycle of a [`Client`].
///
/// `Unconnected → Connecting → Handshaking → Ready`, then `Ready → Closed`
/// on disconnect. Any handshake or mandatory-discovery failure closes the
/// transport and routes back to `Unconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unconnected,
    Connecting,
    Handshaking,
    Ready,
    Closed,
}

/// Capabilities a peer reports once the session is established.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub tools: Option<ToolsCapability>,
    pub resources: Option<ResourcesCapability>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcesCapability {
    pub subscribe: bool,
    pub list_changed: bool,
}

impl ServerCapabilities {
    fn discovered() -> Self {
        Self {
            tools: Some(ToolsCapability { list_changed: true }),
            resources: Some(ResourcesCapability {
                subscribe: false,
                list_changed: true,
            }),
        }
    }
}

/// A non-tool resource advertised by a peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// The capability interface of a peer client.
///
/// Two implementations ship with the crate: [`Client`] (process-backed)
/// and [`crate::mock::MockClient`] (in-memory test double). Call sites
/// pick one by injection, never by inspecting the concrete type.
#[async_trait]
pub trait McpClient: Send + Sync {
    /// Start the transport, handshake, and run initial discovery.
    async fn connect(&self, transport: Arc<dyn Transport>) -> Result<(), McpError>;

    /// List the tools the peer currently advertises.
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError>;

    /// List the peer's resources.
    async fn list_resources(&self) -> Result<Vec<Resource>, McpError>;

    /// Invoke a tool by name, returning the raw result payload.
    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, McpError>;

    /// Capabilities discovered during connect, if any.
    async fn capabilities(&self) -> Option<ServerCapabilities>;

    /// Lightweight liveness probe.
    async fn health_check(&self) -> Result<(), McpError>;

    /// Close the transport and clear cached state. Idempotent.
    async fn disconnect(&self) -> Result<(), McpError>;

    /// Whether a live transport is attached.
    async fn is_connected(&self) -> bool;
}

/// Process-backed protocol client for a single peer.
pub struct Client {
    peer: String,
    info: ClientInfo,
    timeout: Duration,
    state: RwLock<ClientState>,
    transport: RwLock<Option<Arc<dyn Transport>>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    // Serializes request/reply pairs: one in-flight call at a time.
    call_lock: Mutex<()>,
    // Held across the whole connect body so the already-connected check
    // and the transport store are one atomic step.
    connect_lock: Mutex<()>,
}

#[derive(Deserialize)]
struct ToolsListReply {
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    input_schema: Option<Value>,
}

#[derive(Deserialize)]
struct ResourcesListReply {
    resources: Vec<Resource>,
}

impl Client {
    /// Create an unconnected client for the named peer.
    pub fn new(peer: impl Into<String>, info: ClientInfo) -> Self {
        Self {
            peer: peer.into(),
            info,
            timeout: DEFAULT_TIMEOUT,
            state: RwLock::new(ClientState::Unconnected),
            transport: RwLock::new(None),
            capabilities: RwLock::new(None),
            call_lock: Mutex::new(()),
            connect_lock: Mutex::new(()),
        }
    }

    /// Deadline applied to the send phase of every request.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The peer name this client was created for.
    pub fn peer_name(&self) -> &str {
        &self.peer
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ClientState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ClientState) {
        *self.state.write().await = state;
    }

    async fn live_transport(&self) -> Result<Arc<dyn Transport>, McpError> {
        let guard = self.transport.read().await;
        match guard.as_ref() {
            Some(transport) if transport.is_connected() => Ok(Arc::clone(transport)),
            _ => Err(McpError::NotConnected),
        }
    }

    /// Send one request and read its reply. The pair holds the call lock so
    /// a second call cannot interleave with a pending reply.
    async fn exchange(
        &self,
        transport: &Arc<dyn Transport>,
        method: &str,
        params: Value,
    ) -> Result<Response, McpError> {
        let request = Request::new(method, params);
        let _guard = self.call_lock.lock().await;
        transport
            .send_with_deadline(&request, self.timeout)
            .await?;
        transport.receive().await
    }

    async fn request(&self, method: &str, params: Value) -> Result<Response, McpError> {
        let transport = self.live_transport().await?;
        self.exchange(&transport, method, params).await
    }

    fn peer_error(&self, error: crate::wire::RpcError) -> McpError {
        McpError::Rpc {
            peer: self.peer.clone(),
            code: error.code,
            message: error.message,
        }
    }

    /// Unwrap a response's result, propagating peer errors verbatim.
    fn expect_result(&self, response: Response, method: &str) -> Result<Value, McpError> {
        if let Some(error) = response.error {
            return Err(self.peer_error(error));
        }
        response.result.ok_or_else(|| {
            McpError::MalformedResponse(format!("'{method}' reply carried no result"))
        })
    }

    async fn handshake(&self, transport: &Arc<dyn Transport>) -> Result<(), McpError> {
        let params = json!({
            "version": PROTOCOL_VERSION,
            "client": {
                "name": self.info.name,
                "version": self.info.version,
            },
        });

        let response = self.exchange(transport, "mcp.handshake", params).await?;
        if let Some(error) = response.error {
            return Err(self.peer_error(error));
        }
        let result = response
            .result
            .ok_or_else(|| McpError::Handshake("reply carried no result".to_string()))?;
        let version = result
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| McpError::Handshake("reply is missing a protocol version".to_string()))?;

        if version != PROTOCOL_VERSION {
            return Err(McpError::VersionMismatch {
                expected: PROTOCOL_VERSION.to_string(),
                got: version.to_string(),
            });
        }
        Ok(())
    }

    /// Close the transport and reset to `Unconnected` after a failed connect.
    async fn abort_connect(&self, transport: &Arc<dyn Transport>) {
        if let Err(e) = transport.close().await {
            tracing::debug!(peer = %self.peer, error = %e, "closing transport after failed connect");
        }
        *self.transport.write().await = None;
        *self.capabilities.write().await = None;
        self.set_state(ClientState::Unconnected).await;
    }
}

#[async_trait]
impl McpClient for Client {
    async fn connect(&self, transport: Arc<dyn Transport>) -> Result<(), McpError> {
        let _connecting = self.connect_lock.lock().await;
        {
            let current = self.transport.read().await;
            if current.as_ref().is_some_and(|t| t.is_connected()) {
                return Err(McpError::AlreadyConnected);
            }
        }

        self.set_state(ClientState::Connecting).await;
        if let Err(e) = transport.start().await {
            self.set_state(ClientState::Unconnected).await;
            return Err(e);
        }
        *self.transport.write().await = Some(Arc::clone(&transport));
        self.set_state(ClientState::Handshaking).await;

        if let Err(e) = self.handshake(&transport).await {
            self.abort_connect(&transport).await;
            return Err(e);
        }

        // Tool discovery is mandatory; a failure here aborts the connection.
        if let Err(e) = self.list_tools().await {
            self.abort_connect(&transport).await;
            return Err(e);
        }

        // Resource discovery is best-effort.
        if let Err(e) = self.list_resources().await {
            tracing::warn!(peer = %self.peer, error = %e, "resource discovery failed");
        }

        *self.capabilities.write().await = Some(ServerCapabilities::discovered());
        self.set_state(ClientState::Ready).await;
        tracing::info!(peer = %self.peer, "peer session established");
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let response = self.request("mcp.list_tools", json!({})).await?;
        let result = self.expect_result(response, "mcp.list_tools")?;

        let reply: ToolsListReply = serde_json::from_value(result).map_err(|e| {
            McpError::MalformedResponse(format!("invalid or missing tools array: {e}"))
        })?;

        let tools = reply
            .tools
            .into_iter()
            .map(|entry| {
                // A schema we cannot parse degrades to an open object
                // schema rather than failing the whole listing.
                let input_schema = entry
                    .input_schema
                    .and_then(|value| match serde_json::from_value::<ToolSchema>(value) {
                        Ok(schema) => Some(schema),
                        Err(e) => {
                            tracing::debug!(peer = %self.peer, tool = %entry.name, error = %e,
                                "unparseable input schema, validation disabled");
                            None
                        }
                    })
                    .unwrap_or_else(ToolSchema::object);
                ToolDefinition {
                    name: entry.name,
                    description: entry.description.unwrap_or_default(),
                    input_schema,
                }
            })
            .collect();

        Ok(tools)
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        let response = self.request("mcp.list_resources", json!({})).await?;
        let result = self.expect_result(response, "mcp.list_resources")?;

        let reply: ResourcesListReply = serde_json::from_value(result).map_err(|e| {
            McpError::MalformedResponse(format!("invalid or missing resources array: {e}"))
        })?;
        Ok(reply.resources)
    }

    async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, McpError> {
        let response = self.request(name, Value::Object(args)).await?;
        if let Some(error) = response.error {
            return Err(self.peer_error(error));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().await.clone()
    }

    async fn health_check(&self) -> Result<(), McpError> {
        let response = self.request("mcp.ping", json!({})).await?;
        if let Some(error) = response.error {
            return Err(self.peer_error(error));
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        let transport = self.transport.write().await.take();
        let Some(transport) = transport else {
            return Ok(());
        };
        *self.capabilities.write().await = None;
        self.set_state(ClientState::Closed).await;
        transport.close().await
    }

    async fn is_connected(&self) -> bool {
        let guard = self.transport.read().await;
        guard.as_ref().is_some_and(|t| t.is_connected())
    }
}
