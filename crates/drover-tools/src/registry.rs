// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use crate::tool::ToolDefinition;

/// The slice of conversation state a tool factory may see.  Factories take
/// this by reference; there are no back-pointers into the runtime.
#[derive(Debug, Clone, Default)]
pub struct ConversationInfo {
    pub conversation_id: String,
    pub workspace: PathBuf,
}

/// Builds the concrete tool definitions for one conversation.  A single
/// registered name may expand to several definitions (e.g. an MCP server
/// exposing a tool family).
pub type ToolFactory = Arc<dyn Fn(&ConversationInfo) -> Vec<ToolDefinition> + Send + Sync>;

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    /// Registration is write-once per name.
    #[error("tool '{0}' is already registered")]
    AlreadyRegistered(String),
    #[error("tool '{0}' is not registered")]
    Missing(String),
}

/// Process-wide registry mapping tool name → factory.
///
/// At conversation start the agent resolves its declared tool names here,
/// producing concrete definitions bound to the workspace.
#[derive(Default)]
pub struct ToolRegistry {
    factories: RwLock<HashMap<String, ToolFactory>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `name`.  Re-registration is rejected.
    pub fn register(
        &self,
        name: impl Into<String>,
        factory: ToolFactory,
    ) -> Result<(), ToolRegistryError> {
        let name = name.into();
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        if factories.contains_key(&name) {
            return Err(ToolRegistryError::AlreadyRegistered(name));
        }
        factories.insert(name, factory);
        Ok(())
    }

    /// Resolve declared tool names into concrete definitions for one
    /// conversation.  The first unknown name aborts resolution.
    pub fn resolve(
        &self,
        names: &[String],
        info: &ConversationInfo,
    ) -> Result<Vec<ToolDefinition>, ToolRegistryError> {
        let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
        let mut tools = Vec::new();
        for name in names {
            let factory = factories
                .get(name)
                .ok_or_else(|| ToolRegistryError::Missing(name.clone()))?;
            tools.extend(factory(info));
        }
        Ok(tools)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use crate::tool::{ToolCall, ToolExecutor, ToolOutput};

    use super::*;

    struct EchoExecutor;

    #[async_trait]
    impl ToolExecutor for EchoExecutor {
        async fn call(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    fn echo_factory() -> ToolFactory {
        Arc::new(|_info| {
            vec![ToolDefinition {
                name: "echo".into(),
                description: "echoes its input".into(),
                input_schema: json!({ "type": "object" }),
                annotations: None,
                executor: Arc::new(EchoExecutor),
            }]
        })
    }

    #[test]
    fn register_and_resolve() {
        let reg = ToolRegistry::new();
        reg.register("echo", echo_factory()).unwrap();
        let tools = reg
            .resolve(&["echo".into()], &ConversationInfo::default())
            .unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[test]
    fn reregistration_is_rejected() {
        let reg = ToolRegistry::new();
        reg.register("echo", echo_factory()).unwrap();
        let err = reg.register("echo", echo_factory()).unwrap_err();
        assert!(matches!(err, ToolRegistryError::AlreadyRegistered(_)));
    }

    #[test]
    fn unknown_name_fails_resolution() {
        let reg = ToolRegistry::new();
        let err = reg
            .resolve(&["missing".into()], &ConversationInfo::default())
            .unwrap_err();
        assert!(matches!(err, ToolRegistryError::Missing(_)));
    }

    #[test]
    fn factory_sees_conversation_info() {
        let reg = ToolRegistry::new();
        reg.register(
            "ws",
            Arc::new(|info: &ConversationInfo| {
                vec![ToolDefinition {
                    name: format!("ws_{}", info.conversation_id),
                    description: "workspace-bound".into(),
                    input_schema: json!({ "type": "object" }),
                    annotations: None,
                    executor: Arc::new(EchoExecutor),
                }]
            }),
        )
        .unwrap();
        let info = ConversationInfo {
            conversation_id: "abc".into(),
            workspace: PathBuf::from("/tmp/ws"),
        };
        let tools = reg.resolve(&["ws".into()], &info).unwrap();
        assert_eq!(tools[0].name, "ws_abc");
    }

    #[test]
    fn names_are_sorted() {
        let reg = ToolRegistry::new();
        reg.register("b", echo_factory()).unwrap();
        reg.register("a", echo_factory()).unwrap();
        assert_eq!(reg.names(), vec!["a", "b"]);
    }
}
