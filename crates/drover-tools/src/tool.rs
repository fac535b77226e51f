// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// A single content item in a rich tool output.
///
/// Most tools produce only `Text`.  Vision-capable tools (e.g. a screenshot
/// tool on a remote server) may produce a mix of `Text` and `Image` items;
/// ordering is preserved all the way into the observation event.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutputPart {
    /// Plain UTF-8 text.
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`, or an HTTPS URL.
    Image(String),
}

/// The result of executing a tool.
///
/// `content` is always the plain-text representation of the output (the
/// concatenation of all `Text` parts), so callers that only need text never
/// have to walk `parts`.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    /// Plain-text content — concatenation of all Text parts.
    pub content: String,
    /// Structured parts (text and/or images) in production order.
    pub parts: Vec<ToolOutputPart>,
    /// If true, the tool execution failed non-fatally (returned an error
    /// message for the model instead of output).
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful plain-text result.
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: false,
        }
    }

    /// Error result containing a plain-text error message.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: true,
        }
    }

    /// Result with arbitrary parts (text and/or images).
    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            call_id: call_id.into(),
            content: text,
            parts,
            is_error: false,
        }
    }

    pub fn has_images(&self) -> bool {
        self.parts
            .iter()
            .any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// MCP-style behavioural hints, consulted by the risky-action confirmation
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAnnotations {
    /// The tool does not modify its environment.
    #[serde(default)]
    pub read_only_hint: bool,
    /// The tool may perform destructive updates.  Defaults to true — an
    /// unannotated mutating tool must be treated as risky.
    #[serde(default = "default_destructive")]
    pub destructive_hint: bool,
}

fn default_destructive() -> bool {
    true
}

impl Default for ToolAnnotations {
    fn default() -> Self {
        Self {
            read_only_hint: false,
            destructive_hint: true,
        }
    }
}

/// The invocable seam every tool implements — local tools directly, remote
/// tools through an MCP client.
///
/// Non-catastrophic failures are reported as `ToolOutput::err` so the model
/// can read the message and recover; `call` itself never fails.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn call(&self, call: &ToolCall) -> ToolOutput;

    /// Release held resources (connections, child processes).  Called by the
    /// conversation runtime at shutdown; must be idempotent.
    async fn close(&self) {}
}

/// A resolved tool: schema plus the executor bound to a conversation.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub input_schema: Value,
    pub annotations: Option<ToolAnnotations>,
    pub executor: Arc<dyn ToolExecutor>,
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("annotations", &self.annotations)
            .finish_non_exhaustive()
    }
}

impl ToolDefinition {
    /// Whether the confirmation gate should treat an invocation as risky.
    pub fn is_risky(&self) -> bool {
        match &self.annotations {
            Some(a) => !a.read_only_hint && a.destructive_hint,
            // No annotations — assume the worst.
            None => true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
