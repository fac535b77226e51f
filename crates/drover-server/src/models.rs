// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Request and response payloads for the agent-server HTTP surface.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_config::AgentProfile;
use drover_core::{ConfirmationPolicy, ConversationState, Event, ExecutionStatus};
use drover_llm::{ContentPart, Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConversationSortOrder {
    #[serde(rename = "CREATED_AT")]
    CreatedAt,
    #[serde(rename = "UPDATED_AT")]
    UpdatedAt,
    #[serde(rename = "CREATED_AT_DESC")]
    #[default]
    CreatedAtDesc,
    #[serde(rename = "UPDATED_AT_DESC")]
    UpdatedAtDesc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum EventSortOrder {
    #[serde(rename = "TIMESTAMP")]
    #[default]
    Timestamp,
    #[serde(rename = "TIMESTAMP_DESC")]
    TimestampDesc,
}

/// Payload to send a message to the agent.  A simplified `Message`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Vec<ContentPart>,
}

fn default_role() -> Role {
    Role::User
}

impl SendMessageRequest {
    pub fn into_message(self) -> Message {
        Message::user_with_parts(self.content)
    }
}

/// Payload to create a new conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartConversationRequest {
    pub agent: AgentProfile,
    /// Working directory for agent operations and tool execution.
    pub workspace: PathBuf,
    #[serde(default)]
    pub confirmation_policy: ConfirmationPolicy,
    #[serde(default)]
    pub initial_message: Option<SendMessageRequest>,
    /// Max runtime iterations before the conversation errors out.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_true")]
    pub stuck_detection: bool,
    #[serde(default)]
    pub max_budget: Option<f64>,
}

fn default_max_iterations() -> u32 {
    500
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
    pub state: ExecutionStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPage {
    pub items: Vec<ConversationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPage {
    pub items: Vec<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

/// Payload to accept or reject a pending action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationResponseRequest {
    pub accept: bool,
    #[serde(default = "default_rejection_reason")]
    pub reason: String,
}

fn default_rejection_reason() -> String {
    "User rejected the action.".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Success {
    pub success: bool,
}

impl Default for Success {
    fn default() -> Self {
        Self { success: true }
    }
}

/// Payload to update secrets in a conversation.  Values are held in memory
/// and injected into tool environments; they never serialize back out.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSecretsRequest {
    pub secrets: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetConfirmationPolicyRequest {
    pub policy: ConfirmationPolicy,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventQuery {
    #[serde(default)]
    pub from: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub order: Option<EventSortOrder>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConversationQuery {
    #[serde(default)]
    pub sort: Option<ConversationSortOrder>,
    #[serde(default)]
    pub page: Option<usize>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
