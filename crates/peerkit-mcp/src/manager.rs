//! Peer manager — supervises a named set of protocol clients.
//!
//! One client per peer process: the manager launches transports, connects
//! clients, aggregates discovered tools into a shared [`ToolRegistry`]
//! keyed by owning peer, routes calls to the right peer, and polls health.
//! Client and transport construction are injected so tests can supervise
//! in-memory doubles.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use peerkit_types::ToolDefinition;

use crate::client::{Client, ClientInfo, McpClient, ServerCapabilities};
use crate::config::PeerConfig;
use crate::error::McpError;
use crate::registry::ToolRegistry;
use crate::transport::{StdioTransport, Transport};

/// Builds the transport a peer will be spawned over.
pub type TransportFactory = Box<dyn Fn(&PeerConfig) -> Arc<dyn Transport> + Send + Sync>;

/// Builds the client that will drive a peer's session.
pub type ClientFactory = Box<dyn Fn(&PeerConfig) -> Arc<dyn McpClient> + Send + Sync>;

struct Peer {
    client: Arc<dyn McpClient>,
    tools: Vec<ToolDefinition>,
    capabilities: Option<ServerCapabilities>,
    config: PeerConfig,
}

/// A copy of one peer's observable state; never a live reference.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub name: String,
    /// The configuration the peer was launched with.
    pub config: PeerConfig,
    pub tools: Vec<ToolDefinition>,
    pub capabilities: Option<ServerCapabilities>,
    pub running: bool,
}

/// Supervises several peers concurrently. All maps sit behind one
/// reader/writer lock: list/get proceed together, launch/shutdown exclude
/// them.
pub struct PeerManager {
    peers: RwLock<HashMap<String, Peer>>,
    registry: ToolRegistry,
    transport_factory: TransportFactory,
    client_factory: ClientFactory,
}

impl PeerManager {
    /// A manager that spawns real processes and speaks the real protocol.
    pub fn new(info: ClientInfo) -> Self {
        Self::with_factories(
            Box::new(|config| {
                Arc::new(StdioTransport::from_config(config)) as Arc<dyn Transport>
            }),
            Box::new(move |config| {
                Arc::new(
                    Client::new(&config.name, info.clone())
                        .with_timeout(Duration::from_millis(config.timeout_ms)),
                ) as Arc<dyn McpClient>
            }),
        )
    }

    /// A manager with injected construction, for tests and embedding.
    pub fn with_factories(
        transport_factory: TransportFactory,
        client_factory: ClientFactory,
    ) -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            registry: ToolRegistry::new(),
            transport_factory,
            client_factory,
        }
    }

    /// The aggregate tool namespace across all peers.
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Launch a peer: build its transport, connect a fresh client, record
    /// discovered tools. Holding the write lock for the whole launch
    /// serializes launches and keeps the name reservation atomic.
    pub async fn launch(&self, config: PeerConfig) -> Result<PeerSnapshot, McpError> {
        let mut peers = self.peers.write().await;
        if peers.contains_key(&config.name) {
            return Err(McpError::PeerExists { name: config.name });
        }

        let transport = (self.transport_factory)(&config);
        let client = (self.client_factory)(&config);

        if let Err(e) = client.connect(Arc::clone(&transport)).await {
            // The client may already have closed it; close is idempotent.
            let _ = transport.close().await;
            return Err(e);
        }

        // Discovery failure at launch is not fatal; the peer just starts
        // with no tools until the next discovery sweep.
        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                tracing::warn!(peer = %config.name, error = %e, "tool discovery failed at launch");
                Vec::new()
            }
        };

        for tool in &tools {
            if let Err(e) = self.registry.register(tool.clone(), &config.name).await {
                tracing::warn!(peer = %config.name, tool = %tool.name, error = %e,
                    "skipping tool with taken name");
            }
        }

        let capabilities = client.capabilities().await;
        let snapshot = PeerSnapshot {
            name: config.name.clone(),
            config: config.clone(),
            tools: tools.clone(),
            capabilities: capabilities.clone(),
            running: client.is_connected().await,
        };
        tracing::info!(peer = %config.name, tools = tools.len(), "peer launched");
        peers.insert(
            config.name.clone(),
            Peer {
                client,
                tools,
                capabilities,
                config,
            },
        );
        Ok(snapshot)
    }

    /// A copy of one peer's state.
    pub async fn peer(&self, name: &str) -> Result<PeerSnapshot, McpError> {
        let peers = self.peers.read().await;
        let peer = peers.get(name).ok_or_else(|| McpError::PeerNotFound {
            name: name.to_string(),
        })?;
        Ok(PeerSnapshot {
            name: name.to_string(),
            config: peer.config.clone(),
            tools: peer.tools.clone(),
            capabilities: peer.capabilities.clone(),
            running: peer.client.is_connected().await,
        })
    }

    /// Names of all supervised peers.
    pub async fn list_peers(&self) -> Vec<String> {
        self.peers.read().await.keys().cloned().collect()
    }

    /// Disconnect one peer and drop its tools from the namespace.
    ///
    /// A failed disconnect keeps the peer registered so the caller can
    /// retry or fall back to `shutdown_all`.
    pub async fn shutdown(&self, name: &str) -> Result<(), McpError> {
        let mut peers = self.peers.write().await;
        let Some(peer) = peers.get(name) else {
            return Err(McpError::PeerNotFound {
                name: name.to_string(),
            });
        };
        peer.client.disconnect().await?;
        peers.remove(name);
        drop(peers);

        self.registry.remove_source(name).await;
        tracing::info!(peer = %name, "peer shut down");
        Ok(())
    }

    /// Best-effort disconnect of every peer. Always empties the peer set
    /// and the aggregate registry; the last failure, if any, is returned.
    pub async fn shutdown_all(&self) -> Result<(), McpError> {
        let mut peers = self.peers.write().await;
        let mut last_error = None;
        for (name, peer) in peers.drain() {
            if let Err(e) = peer.client.disconnect().await {
                tracing::warn!(peer = %name, error = %e, "disconnect failed during shutdown");
                last_error = Some(e);
            }
        }
        drop(peers);

        self.registry.clear().await;
        match last_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Re-poll every peer's tools. Disconnected peers and failed list
    /// calls are skipped, not fatal; fails only when no peers are held.
    pub async fn discover_tools(&self) -> Result<HashMap<String, Vec<ToolDefinition>>, McpError> {
        let mut peers = self.peers.write().await;
        if peers.is_empty() {
            return Err(McpError::NoPeers);
        }

        let mut discovered = HashMap::new();
        for (name, peer) in peers.iter_mut() {
            if !peer.client.is_connected().await {
                tracing::debug!(peer = %name, "skipping disconnected peer");
                continue;
            }
            match peer.client.list_tools().await {
                Ok(tools) => {
                    peer.tools = tools.clone();
                    discovered.insert(name.clone(), tools);
                }
                Err(e) => {
                    tracing::warn!(peer = %name, error = %e, "tool listing failed, skipping peer");
                }
            }
        }
        drop(peers);

        // Refresh the aggregate namespace for the peers that answered.
        for (name, tools) in &discovered {
            self.registry.remove_source(name).await;
            for tool in tools {
                if let Err(e) = self.registry.register(tool.clone(), name.as_str()).await {
                    tracing::warn!(peer = %name, tool = %tool.name, error = %e,
                        "skipping tool with taken name");
                }
            }
        }

        Ok(discovered)
    }

    /// Current liveness per peer: `Ok(())` or the probe error. A peer whose
    /// transport reports disconnected is reported without being probed.
    pub async fn monitor_health(&self) -> HashMap<String, Result<(), McpError>> {
        let peers = self.peers.read().await;
        let mut results = HashMap::new();
        for (name, peer) in peers.iter() {
            let status = if peer.client.is_connected().await {
                peer.client.health_check().await
            } else {
                Err(McpError::NotConnected)
            };
            results.insert(name.clone(), status);
        }
        results
    }

    /// Route a call to the peer owning the tool, validating the arguments
    /// against the registered schema first.
    pub async fn call_tool(&self, name: &str, args: Map<String, Value>) -> Result<Value, McpError> {
        let tool = self
            .registry
            .get(name)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                name: name.to_string(),
            })?;
        let owner = self
            .registry
            .source_of(name)
            .await
            .ok_or_else(|| McpError::ToolNotFound {
                name: name.to_string(),
            })?;

        tool.input_schema.validate(&args)?;

        let client = {
            let peers = self.peers.read().await;
            let peer = peers.get(&owner).ok_or_else(|| McpError::PeerNotFound {
                name: owner.clone(),
            })?;
            Arc::clone(&peer.client)
        };
        client.call_tool(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockTransport};
    use peerkit_types::{SchemaType, ToolSchema};
    use serde_json::json;

    fn add_tool() -> ToolDefinition {
        ToolDefinition::new("add", "Add two numbers").with_schema(
            ToolSchema::object()
                .property("a", ToolSchema::of(SchemaType::Number))
                .property("b", ToolSchema::of(SchemaType::Number))
                .require("a")
                .require("b"),
        )
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition::new("echo", "Echo back input")
    }

    /// A manager whose clients come from the given map.
    fn mock_manager(clients: HashMap<String, Arc<MockClient>>) -> PeerManager {
        PeerManager::with_factories(
            Box::new(|_| Arc::new(MockTransport::new()) as Arc<dyn Transport>),
            Box::new(move |config| {
                Arc::clone(clients.get(&config.name).expect("client configured for peer"))
                    as Arc<dyn McpClient>
            }),
        )
    }

    async fn two_peer_manager() -> (PeerManager, Arc<MockClient>, Arc<MockClient>) {
        let a = Arc::new(MockClient::new("alpha"));
        a.set_tools(vec![echo_tool()]).await;
        let b = Arc::new(MockClient::new("beta"));
        b.set_tools(vec![add_tool()]).await;

        let mut clients = HashMap::new();
        clients.insert("alpha".to_string(), Arc::clone(&a));
        clients.insert("beta".to_string(), Arc::clone(&b));
        let manager = mock_manager(clients);

        manager
            .launch(PeerConfig::new("alpha", "alpha-cmd"))
            .await
            .unwrap();
        manager
            .launch(PeerConfig::new("beta", "beta-cmd"))
            .await
            .unwrap();
        (manager, a, b)
    }

    #[tokio::test]
    async fn launch_records_discovered_tools() {
        let (manager, _, _) = two_peer_manager().await;

        let snapshot = manager.peer("alpha").await.unwrap();
        assert!(snapshot.running);
        assert_eq!(snapshot.tools.len(), 1);
        assert_eq!(snapshot.tools[0].name, "echo");
        assert_eq!(snapshot.config.command, "alpha-cmd");

        // Tools landed in the aggregate namespace under their owner.
        assert_eq!(
            manager.registry().source_of("add").await.unwrap(),
            "beta"
        );
        let mut names = manager.list_peers().await;
        names.sort();
        assert_eq!(names, ["alpha", "beta"]);
    }

    #[tokio::test]
    async fn launch_duplicate_name_fails_and_leaves_peer_untouched() {
        let (manager, a, _) = two_peer_manager().await;

        let result = manager.launch(PeerConfig::new("alpha", "other-cmd")).await;
        assert!(matches!(result, Err(McpError::PeerExists { .. })));

        // The existing peer is still connected and still owns its tools.
        assert!(a.is_connected().await);
        assert!(manager.peer("alpha").await.unwrap().running);
        assert_eq!(
            manager.registry().source_of("echo").await.unwrap(),
            "alpha"
        );
    }

    #[tokio::test]
    async fn shutdown_removes_peer_and_its_tools() {
        let (manager, a, _) = two_peer_manager().await;

        manager.shutdown("alpha").await.unwrap();
        assert!(!a.is_connected().await);
        assert!(matches!(
            manager.peer("alpha").await,
            Err(McpError::PeerNotFound { .. })
        ));
        assert!(manager.registry().get("echo").await.is_none());
        // The other peer is untouched.
        assert!(manager.registry().get("add").await.is_some());
    }

    #[tokio::test]
    async fn shutdown_unknown_peer_fails_not_found() {
        let manager = mock_manager(HashMap::new());
        assert!(matches!(
            manager.shutdown("ghost").await,
            Err(McpError::PeerNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_all_empties_set_and_surfaces_last_failure() {
        let (manager, _, b) = two_peer_manager().await;
        b.fail_disconnect_with("stream already gone").await;

        let result = manager.shutdown_all().await;
        assert!(result.is_err());
        assert!(manager.list_peers().await.is_empty());
        assert!(manager.registry().list().await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_all_on_empty_manager_is_ok() {
        let manager = mock_manager(HashMap::new());
        manager.shutdown_all().await.unwrap();
    }

    #[tokio::test]
    async fn discover_tools_on_empty_manager_fails_no_peers() {
        let manager = mock_manager(HashMap::new());
        assert!(matches!(
            manager.discover_tools().await,
            Err(McpError::NoPeers)
        ));
    }

    #[tokio::test]
    async fn discover_tools_returns_one_entry_per_peer() {
        let (manager, _, _) = two_peer_manager().await;

        let discovered = manager.discover_tools().await.unwrap();
        assert_eq!(discovered.len(), 2);
        assert_eq!(discovered["alpha"][0].name, "echo");
        assert_eq!(discovered["beta"][0].name, "add");
    }

    #[tokio::test]
    async fn discover_tools_skips_disconnected_peers() {
        let (manager, a, _) = two_peer_manager().await;
        a.set_connected(false).await;

        let discovered = manager.discover_tools().await.unwrap();
        assert_eq!(discovered.len(), 1);
        assert!(discovered.contains_key("beta"));
    }

    #[tokio::test]
    async fn discover_tools_picks_up_new_advertisements() {
        let (manager, a, _) = two_peer_manager().await;
        a.set_tools(vec![echo_tool(), ToolDefinition::new("shout", "Echo, loudly")])
            .await;

        let discovered = manager.discover_tools().await.unwrap();
        assert_eq!(discovered["alpha"].len(), 2);
        assert_eq!(
            manager.registry().source_of("shout").await.unwrap(),
            "alpha"
        );
    }

    #[tokio::test]
    async fn monitor_health_reports_per_peer_status() {
        let (manager, a, b) = two_peer_manager().await;
        a.set_connected(false).await;
        b.fail_health_with("peer is wedged").await;

        let health = manager.monitor_health().await;
        assert_eq!(health.len(), 2);
        assert!(matches!(health["alpha"], Err(McpError::NotConnected)));
        assert!(matches!(health["beta"], Err(McpError::Rpc { .. })));
    }

    #[tokio::test]
    async fn call_tool_routes_to_owning_peer() {
        let (manager, _, b) = two_peer_manager().await;
        b.set_call_result("add", json!({"sum": 8})).await;

        let mut args = Map::new();
        args.insert("a".to_string(), json!(5));
        args.insert("b".to_string(), json!(3));
        let result = manager.call_tool("add", args).await.unwrap();
        assert_eq!(result["sum"], 8);
    }

    #[tokio::test]
    async fn call_tool_validates_before_forwarding() {
        let (manager, _, _) = two_peer_manager().await;

        let mut args = Map::new();
        args.insert("a".to_string(), json!("x"));
        args.insert("b".to_string(), json!(3));
        let err = manager.call_tool("add", args).await.unwrap_err();
        assert!(matches!(err, McpError::Validation(_)));
    }

    #[tokio::test]
    async fn call_tool_unknown_name_fails_not_found() {
        let (manager, _, _) = two_peer_manager().await;
        assert!(matches!(
            manager.call_tool("missing", Map::new()).await,
            Err(McpError::ToolNotFound { .. })
        ));
    }
}
