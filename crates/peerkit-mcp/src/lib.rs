//! Protocol client engine for tool-providing peer processes.
//!
//! Peers are child processes that speak newline-delimited JSON-RPC 2.0
//! envelopes over their standard streams. Each peer is driven by a
//! [`Client`] that runs the version handshake, discovers the peer's tools
//! and resources, and forwards tool calls; a [`PeerManager`] supervises a
//! named set of peers and aggregates their tools into one addressable
//! namespace backed by a [`ToolRegistry`].
//!
//! Calls over one transport are strictly one-at-a-time: a request's reply
//! must be read before the next request is issued. There is no
//! correlation-id demultiplexing.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod mock;
pub mod registry;
pub mod transport;
pub mod wire;

pub use client::{
    Client, ClientInfo, ClientState, McpClient, Resource, ResourcesCapability, ServerCapabilities,
    ToolsCapability,
};
pub use config::{PeerConfig, PeersConfig};
pub use error::McpError;
pub use manager::{PeerManager, PeerSnapshot};
pub use mock::{MockClient, MockTransport};
pub use registry::ToolRegistry;
pub use transport::{StdioTransport, Transport};
