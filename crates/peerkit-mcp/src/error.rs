//! Error types for peer communication and supervision.

use peerkit_types::ValidationError;
use thiserror::Error;

/// Errors from the protocol engine.
///
/// Peer-reported error envelopes surface as [`McpError::Rpc`] with the
/// peer's code and message preserved verbatim. Nothing here retries
/// automatically; retry policy belongs to the caller.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn peer process '{command}': {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("transport already started")]
    AlreadyStarted,

    #[error("not connected to a peer")]
    NotConnected,

    #[error("client already connected")]
    AlreadyConnected,

    #[error("incompatible protocol version: got {got}, expected {expected}")]
    VersionMismatch { expected: String, got: String },

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("failed to decode envelope: {0}")]
    Decode(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("peer '{peer}' returned error {code}: {message}")]
    Rpc {
        peer: String,
        code: i64,
        message: String,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("tool name cannot be empty")]
    EmptyToolName,

    #[error("tool '{name}' is already registered by source '{owner}'")]
    DuplicateTool { name: String, owner: String },

    #[error("tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("peer not found: {name}")]
    PeerNotFound { name: String },

    #[error("peer already exists: {name}")]
    PeerExists { name: String },

    #[error("no peers available")]
    NoPeers,

    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
