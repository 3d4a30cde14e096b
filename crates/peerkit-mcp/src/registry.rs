//! Tool registry — a deduplicated namespace of tool definitions.
//!
//! Each name is owned by exactly one source (typically the peer that
//! advertised it). The registry holds copies of definitions plus
//! authoritative ownership metadata, never live references into a peer.

use std::collections::HashMap;
use std::future::Future;
use tokio::sync::RwLock;

use peerkit_types::{ToolCall, ToolContent, ToolDefinition};

use crate::error::McpError;

#[derive(Default)]
struct RegistryState {
    tools: HashMap<String, ToolDefinition>,
    sources: HashMap<String, String>,
}

/// Explicitly constructed tool namespace; pass by reference, no globals.
#[derive(Default)]
pub struct ToolRegistry {
    state: RwLock<RegistryState>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under a source.
    ///
    /// Re-registering under the same source refreshes the definition;
    /// a different source is rejected and the original owner is kept.
    pub async fn register(
        &self,
        tool: ToolDefinition,
        source: impl Into<String>,
    ) -> Result<(), McpError> {
        if tool.name.is_empty() {
            return Err(McpError::EmptyToolName);
        }
        let source = source.into();

        let mut state = self.state.write().await;
        if let Some(owner) = state.sources.get(&tool.name) {
            if *owner != source {
                return Err(McpError::DuplicateTool {
                    name: tool.name,
                    owner: owner.clone(),
                });
            }
        }
        state.sources.insert(tool.name.clone(), source);
        state.tools.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Remove a tool by name. Unknown names are a no-op.
    pub async fn unregister(&self, name: &str) {
        let mut state = self.state.write().await;
        state.tools.remove(name);
        state.sources.remove(name);
    }

    /// Remove every tool owned by a source; returns how many were dropped.
    pub async fn remove_source(&self, source: &str) -> usize {
        let mut state = self.state.write().await;
        let names: Vec<String> = state
            .sources
            .iter()
            .filter(|(_, owner)| owner.as_str() == source)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            state.tools.remove(name);
            state.sources.remove(name);
        }
        names.len()
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.tools.clear();
        state.sources.clear();
    }

    pub async fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.state.read().await.tools.get(name).cloned()
    }

    /// The source that owns a name.
    pub async fn source_of(&self, name: &str) -> Option<String> {
        self.state.read().await.sources.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<ToolDefinition> {
        self.state.read().await.tools.values().cloned().collect()
    }

    pub async fn list_by_source(&self, source: &str) -> Vec<ToolDefinition> {
        let state = self.state.read().await;
        state
            .sources
            .iter()
            .filter(|(_, owner)| owner.as_str() == source)
            .filter_map(|(name, _)| state.tools.get(name).cloned())
            .collect()
    }

    /// Resolve a call, validate its arguments against the tool's schema,
    /// then run `invoker` with the owning source and the call.
    ///
    /// Validation covers required-field presence and per-property primitive
    /// type matching; a failure names the offending field and never reaches
    /// the invoker.
    pub async fn execute<F, Fut>(
        &self,
        call: &ToolCall,
        invoker: F,
    ) -> Result<Vec<ToolContent>, McpError>
    where
        F: FnOnce(String, ToolCall) -> Fut,
        Fut: Future<Output = Result<Vec<ToolContent>, McpError>>,
    {
        let (tool, source) = {
            let state = self.state.read().await;
            let Some(tool) = state.tools.get(&call.name) else {
                return Err(McpError::ToolNotFound {
                    name: call.name.clone(),
                });
            };
            let source = state.sources.get(&call.name).cloned().unwrap_or_default();
            (tool.clone(), source)
        };

        tool.input_schema.validate(&call.arguments)?;
        invoker(source, call.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerkit_types::{SchemaType, ToolSchema, ValidationError};
    use serde_json::{Map, Value, json};

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
        ToolDefinition::new("echo", "Echo back the input")
            .with_schema(ToolSchema::object().property("text", ToolSchema::of(SchemaType::String)))
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[tokio::test]
    async fn register_then_get_returns_the_tool_unchanged() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool(), "peer-a").await.unwrap();

        assert_eq!(registry.get("echo").await.unwrap(), echo_tool());
        assert_eq!(registry.source_of("echo").await.unwrap(), "peer-a");
    }

    #[tokio::test]
    async fn duplicate_under_other_source_fails_and_keeps_owner() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool(), "peer-a").await.unwrap();

        match registry.register(echo_tool(), "peer-b").await {
            Err(McpError::DuplicateTool { name, owner }) => {
                assert_eq!(name, "echo");
                assert_eq!(owner, "peer-a");
            }
            other => panic!("expected DuplicateTool, got {other:?}"),
        }
        assert_eq!(registry.source_of("echo").await.unwrap(), "peer-a");
    }

    #[tokio::test]
    async fn reregister_under_same_source_refreshes_definition() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool(), "peer-a").await.unwrap();

        let updated = ToolDefinition::new("echo", "Echo, but better");
        registry.register(updated.clone(), "peer-a").await.unwrap();
        assert_eq!(registry.get("echo").await.unwrap(), updated);
    }

    #[tokio::test]
    async fn empty_name_is_rejected() {
        let registry = ToolRegistry::new();
        let tool = ToolDefinition::new("", "nameless");
        assert!(matches!(
            registry.register(tool, "peer-a").await,
            Err(McpError::EmptyToolName)
        ));
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool(), "peer-a").await.unwrap();

        registry.unregister("echo").await;
        registry.unregister("echo").await;
        registry.unregister("never-existed").await;

        assert!(registry.get("echo").await.is_none());
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn list_by_source_filters_ownership() {
        let registry = ToolRegistry::new();
        registry.register(echo_tool(), "peer-a").await.unwrap();
        registry.register(add_tool(), "peer-b").await.unwrap();

        let from_b = registry.list_by_source("peer-b").await;
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_b[0].name, "add");
        assert_eq!(registry.list().await.len(), 2);

        assert_eq!(registry.remove_source("peer-b").await, 1);
        assert!(registry.list_by_source("peer-b").await.is_empty());
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn execute_validates_then_invokes_with_owner() {
        let registry = ToolRegistry::new();
        registry.register(add_tool(), "peer-math").await.unwrap();

        let call = ToolCall::new("add", args(json!({"a": 5, "b": 3})));
        let content = registry
            .execute(&call, |source, call| async move {
                assert_eq!(source, "peer-math");
                assert_eq!(call.name, "add");
                Ok(vec![ToolContent::text("8")])
            })
            .await
            .unwrap();
        assert!(!content.is_empty());
    }

    #[tokio::test]
    async fn execute_rejects_bad_arguments_before_invoking() {
        let registry = ToolRegistry::new();
        registry.register(add_tool(), "peer-math").await.unwrap();

        let call = ToolCall::new("add", args(json!({"a": "x", "b": 3})));
        // The marker error would leak through if the invoker ran.
        let err = registry
            .execute(&call, |_, _| async move {
                Err::<Vec<ToolContent>, McpError>(McpError::NoPeers)
            })
            .await
            .unwrap_err();

        match err {
            McpError::Validation(ValidationError::WrongType { field, .. }) => {
                assert_eq!(field, "a");
            }
            other => panic!("expected Validation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn execute_unknown_tool_fails_not_found() {
        let registry = ToolRegistry::new();
        let call = ToolCall::new("missing", Map::new());
        let err = registry
            .execute(&call, |_, _| async move { Ok(vec![]) })
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolNotFound { .. }));
    }
}
