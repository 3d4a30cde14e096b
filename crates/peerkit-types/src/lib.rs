//! Shared types for Peerkit: tool definitions, input schemas, and the
//! validation rules applied to tool-call arguments.
//!
//! Everything in this crate is pure data — no I/O, no async.

pub mod error;
pub mod tool;

pub use error::ValidationError;
pub use tool::{SchemaType, ToolCall, ToolContent, ToolDefinition, ToolSchema};
