//! In-memory test doubles: a scriptable transport and a canned-answer
//! client. Both implement the real traits so call sites exercise the same
//! seams in tests as in production.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use peerkit_types::ToolDefinition;

use crate::client::{McpClient, Resource, ServerCapabilities};
use crate::error::McpError;
use crate::transport::Transport;
use crate::wire::{self, Request, Response};

/// A transport that replays queued responses in order and records every
/// request sent through it.
#[derive(Default)]
pub struct MockTransport {
    connected: AtomicBool,
    replies: Mutex<VecDeque<Response>>,
    sent: Mutex<Vec<Request>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the next reply `receive` will produce.
    pub async fn push_reply(&self, response: Response) {
        self.replies.lock().await.push_back(response);
    }

    /// Every request sent so far, in order.
    pub async fn sent(&self) -> Vec<Request> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<(), McpError> {
        if self.connected.swap(true, Ordering::SeqCst) {
            return Err(McpError::AlreadyStarted);
        }
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<(), McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        // Run the real codec so malformed envelopes fail here too.
        wire::encode(request)?;
        self.sent.lock().await.push(request.clone());
        Ok(())
    }

    async fn receive(&self) -> Result<Response, McpError> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        self.replies.lock().await.pop_front().ok_or_else(|| {
            McpError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "no scripted reply left",
            ))
        })
    }

    async fn close(&self) -> Result<(), McpError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct MockState {
    connected: bool,
    capabilities: Option<ServerCapabilities>,
    tools: Vec<ToolDefinition>,
    resources: Vec<Resource>,
    call_results: HashMap<String, Value>,
    health_failure: Option<String>,
    disconnect_failure: Option<String>,
}

/// An in-memory peer client with canned answers.
///
/// `connect` flips the connected flag without touching the transport; the
/// other operations answer from configured state, failing `NotConnected`
/// when appropriate so lifecycle bugs still surface in tests.
pub struct MockClient {
    name: String,
    state: Mutex<MockState>,
}

impl MockClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(MockState::default()),
        }
    }

    pub async fn set_connected(&self, connected: bool) {
        self.state.lock().await.connected = connected;
    }

    pub async fn set_tools(&self, tools: Vec<ToolDefinition>) {
        self.state.lock().await.tools = tools;
    }

    pub async fn set_resources(&self, resources: Vec<Resource>) {
        self.state.lock().await.resources = resources;
    }

    pub async fn set_capabilities(&self, capabilities: ServerCapabilities) {
        self.state.lock().await.capabilities = Some(capabilities);
    }

    /// Fix the result returned for a named tool.
    pub async fn set_call_result(&self, tool: impl Into<String>, result: Value) {
        self.state.lock().await.call_results.insert(tool.into(), result);
    }

    /// Make `health_check` fail with a peer error.
    pub async fn fail_health_with(&self, message: impl Into<String>) {
        self.state.lock().await.health_failure = Some(message.into());
    }

    /// Make `disconnect` return an error (the flag still flips).
    pub async fn fail_disconnect_with(&self, message: impl Into<String>) {
        self.state.lock().await.disconnect_failure = Some(message.into());
    }
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new("mock")
    }
}

#[async_trait]
impl McpClient for MockClient {
    async fn connect(&self, _transport: Arc<dyn Transport>) -> Result<(), McpError> {
        let mut state = self.state.lock().await;
        if state.connected {
            return Err(McpError::AlreadyConnected);
        }
        state.connected = true;
        Ok(())
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(McpError::NotConnected);
        }
        Ok(state.tools.clone())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, McpError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(McpError::NotConnected);
        }
        Ok(state.resources.clone())
    }

    async fn call_tool(&self, name: &str, _args: Map<String, Value>) -> Result<Value, McpError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(McpError::NotConnected);
        }
        Ok(state
            .call_results
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!({"status": "ok"})))
    }

    async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.state.lock().await.capabilities.clone()
    }

    async fn health_check(&self) -> Result<(), McpError> {
        let state = self.state.lock().await;
        if !state.connected {
            return Err(McpError::NotConnected);
        }
        match &state.health_failure {
            Some(message) => Err(McpError::Rpc {
                peer: self.name.clone(),
                code: wire::SERVER_ERROR,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn disconnect(&self) -> Result<(), McpError> {
        let mut state = self.state.lock().await;
        state.connected = false;
        match state.disconnect_failure.take() {
            Some(message) => Err(McpError::Io(std::io::Error::other(message))),
            None => Ok(()),
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ToolsCapability;

    #[tokio::test]
    async fn mock_client_tracks_connection_lifecycle() {
        let client = MockClient::new("fake");
        assert!(!client.is_connected().await);
        assert!(matches!(
            client.list_tools().await,
            Err(McpError::NotConnected)
        ));

        client.connect(Arc::new(MockTransport::new())).await.unwrap();
        assert!(client.is_connected().await);
        assert!(client.list_tools().await.unwrap().is_empty());

        client.disconnect().await.unwrap();
        assert!(!client.is_connected().await);
    }

    #[tokio::test]
    async fn mock_client_serves_canned_answers() {
        let client = MockClient::new("fake");
        client.set_connected(true).await;
        client
            .set_tools(vec![ToolDefinition::new("echo", "Echo back input")])
            .await;
        client
            .set_call_result("echo", json!({"text": "Echo: hi"}))
            .await;
        client
            .set_capabilities(ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: true }),
                resources: None,
            })
            .await;

        assert_eq!(client.list_tools().await.unwrap()[0].name, "echo");
        let result = client.call_tool("echo", Map::new()).await.unwrap();
        assert_eq!(result["text"], "Echo: hi");
        // Unconfigured tools still answer.
        let fallback = client.call_tool("other", Map::new()).await.unwrap();
        assert_eq!(fallback["status"], "ok");
        assert!(client.capabilities().await.unwrap().tools.is_some());
    }

    #[tokio::test]
    async fn mock_transport_replays_in_order() {
        let transport = MockTransport::new();
        transport.start().await.unwrap();
        transport
            .push_reply(Response {
                jsonrpc: "2.0".to_string(),
                id: Some("1".to_string()),
                result: Some(json!({"n": 1})),
                error: None,
            })
            .await;

        let request = Request::new("mcp.ping", json!({}));
        transport.send(&request).await.unwrap();
        let reply = transport.receive().await.unwrap();
        assert_eq!(reply.result.unwrap()["n"], 1);

        // Queue exhausted: behaves like a closed stream.
        assert!(matches!(transport.receive().await, Err(McpError::Io(_))));
        assert_eq!(transport.sent().await.len(), 1);
    }
}
