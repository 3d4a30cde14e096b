//! Wire envelopes: JSON-RPC 2.0 shaped requests and responses, one JSON
//! object per UTF-8, newline-terminated line.
//!
//! Encoding and decoding are pure; the transport layer owns all I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::McpError;

/// The JSON-RPC version tag carried by every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

// Standard JSON-RPC error codes plus the protocol-specific bands.
pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_ERROR: i64 = -32000;
pub const CONNECTION_ERROR: i64 = -32001;
pub const PROTOCOL_ERROR: i64 = -32002;

/// An outbound request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: String,
    pub method: String,
    pub params: Value,
}

impl Request {
    /// Create a request with a fresh correlation id.
    ///
    /// The id is carried for diagnostics; replies are matched by arrival
    /// order, not by id (one in-flight call per transport).
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Uuid::new_v4().to_string(),
            method: method.into(),
            params,
        }
    }
}

/// An inbound response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<String>,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

/// A peer-reported error object.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

/// A fire-and-forget envelope: no id, no reply expected.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }
}

/// Serialize a request to its wire form: JSON followed by a newline.
pub fn encode(request: &Request) -> Result<Vec<u8>, McpError> {
    let mut bytes = serde_json::to_vec(request)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Parse one wire line into a response envelope.
///
/// Fails when the bytes are not valid JSON, when the id is missing, or
/// when the envelope carries both a result and an error.
pub fn decode(bytes: &[u8]) -> Result<Response, McpError> {
    let response: Response = serde_json::from_slice(bytes)
        .map_err(|e| McpError::Decode(format!("malformed envelope: {e}")))?;

    if response.id.is_none() {
        return Err(McpError::Decode("envelope is missing an id".to_string()));
    }
    if response.result.is_some() && response.error.is_some() {
        return Err(McpError::Decode(
            "envelope carries both a result and an error".to_string(),
        ));
    }

    Ok(response)
}
