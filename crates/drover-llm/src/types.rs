use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

// ─── Content part types ───────────────────────────────────────────────────────

/// A single content part in a multi-part message.
///
/// Images are represented as a list of URLs — data URLs
/// (`data:<mime>;base64,<b64>`) or HTTPS URLs for providers that accept
/// remote references.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
        /// Marks this part as a prompt-cache breakpoint.  Set by the gateway
        /// on the last text part of the system message and of the most
        /// recent user/tool message when the model supports caching.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        cache_prompt: bool,
    },
    Image { urls: Vec<String> },
}

impl ContentPart {
    /// Convenience constructor for a plain text part.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_prompt: false,
        }
    }

    /// Convenience constructor for an image part.
    pub fn image(urls: Vec<String>) -> Self {
        Self::Image { urls }
    }
}

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A native tool call attached to an assistant message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallItem {
    /// Opaque identifier assigned by the provider (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object.
    pub arguments: String,
}

/// A single message in the conversation history.
///
/// Messages are immutable once constructed; the serialization flags
/// (`vision_enabled`, `cache_enabled`, `function_calling_enabled`) are the
/// only fields the gateway touches, and only on its own private copies when
/// preparing a request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    /// Ordered content parts.
    pub content: Vec<ContentPart>,
    /// For `Role::Tool`: the id of the tool call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For `Role::Assistant`: the tool calls requested this turn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallItem>>,
    /// Reasoning/thinking text returned by reasoning-capable models.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_text: Option<String>,
    /// Serialize image parts to the wire (model supports vision).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub vision_enabled: bool,
    /// Serialize prompt-cache breakpoints on marked parts.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cache_enabled: bool,
    /// Serialize `tool_calls` natively; when false they are rendered as
    /// in-text grammar by the prompt-mock codec.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub function_calling_enabled: bool,
}

impl Message {
    fn text_message(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentPart::text(text)],
            tool_call_id: None,
            tool_calls: None,
            reasoning_text: None,
            vision_enabled: false,
            cache_enabled: false,
            function_calling_enabled: false,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text_message(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text_message(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text_message(Role::Assistant, text)
    }

    /// Construct a user message from a list of content parts (text + images).
    pub fn user_with_parts(parts: Vec<ContentPart>) -> Self {
        Self {
            content: parts,
            ..Self::text_message(Role::User, "")
        }
    }

    /// A tool-result message answering the call with the given id.
    pub fn tool_result(id: impl Into<String>, parts: Vec<ContentPart>) -> Self {
        Self {
            tool_call_id: Some(id.into()),
            content: parts,
            ..Self::text_message(Role::Tool, "")
        }
    }

    /// Concatenated text of all text parts.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text, .. } => Some(text.as_str()),
                ContentPart::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// All image URLs across the content parts, in order.
    pub fn image_urls(&self) -> Vec<&str> {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Image { urls } => Some(urls.iter().map(String::as_str)),
                ContentPart::Text { .. } => None,
            })
            .flatten()
            .collect()
    }

    pub fn contains_image(&self) -> bool {
        self.content
            .iter()
            .any(|p| matches!(p, ContentPart::Image { .. }))
    }

    /// Approximate token count used for context management.
    ///
    /// Uses a 4-chars-per-token heuristic for text; images use a conservative
    /// per-image estimate of 765 tokens (the typical high-detail cost of a
    /// 512×512 region).
    pub fn approx_tokens(&self) -> usize {
        let mut chars: usize = self
            .content
            .iter()
            .map(|p| match p {
                ContentPart::Text { text, .. } => text.len(),
                ContentPart::Image { urls } => urls.len() * 765 * 4,
            })
            .sum();
        if let Some(calls) = &self.tool_calls {
            chars += calls
                .iter()
                .map(|c| c.name.len() + c.arguments.len())
                .sum::<usize>();
        }
        (chars / 4).max(1)
    }
}

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Per-call options for [`crate::Llm::complete`].
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    /// Streaming is not supported; `true` fails with `UnsupportedOption`.
    pub stream: bool,
    /// Override the configured sampling temperature for this call.
    pub temperature: Option<f32>,
    /// Override the configured output-token cap for this call.
    pub max_output_tokens: Option<u32>,
}

/// The result of one completion call.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Provider response id (forwarded onto action events).
    pub id: String,
    pub message: Message,
    /// Snapshot of the owning conversation's metrics after accounting.
    pub metrics: MetricsSnapshot,
    /// The provider response verbatim, for logging and diagnostics.
    pub raw_response: serde_json::Value,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
