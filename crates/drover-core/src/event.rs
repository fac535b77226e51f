// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use drover_llm::{ContentPart, Message};

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    User,
    Agent,
    Environment,
    System,
}

/// Header shared by every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
}

/// Machine-readable classification for [`EventKind::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Stuck,
    BudgetExceeded,
    IterationLimitExceeded,
    ContextWindowExceeded,
    Provider,
    Persistence,
    Internal,
}

/// Event payloads.  The discriminant serializes as a `kind` field alongside
/// the flattened header, so the persisted form is one flat JSON object per
/// event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A user or assistant message that carries no tool calls.
    Message { message: Message },
    /// The agent chose to invoke a tool.
    Action {
        tool_name: String,
        tool_call_id: Option<String>,
        arguments: Value,
        /// Free text the model produced alongside the calls.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reasoning_text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        llm_response_id: Option<String>,
    },
    /// The result of executing a tool call.
    Observation {
        tool_call_id: Option<String>,
        tool_name: String,
        content: Vec<ContentPart>,
        is_error: bool,
    },
    /// Emitted once at conversation start.
    SystemPrompt { text: String },
    /// History is too long; please summarize.
    CondensationRequest,
    /// Forgets events and optionally substitutes a summary.
    Condensation {
        forgotten_event_ids: Vec<Uuid>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary_offset: Option<usize>,
    },
    /// Synthetic event inserted by the view projection in place of
    /// condensed history.  Never persisted.
    CondensationSummary { summary: String },
    Error { error_kind: ErrorKind, detail: String },
    Pause,
    Finished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub meta: EventMeta,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn new(source: EventSource, kind: EventKind) -> Self {
        Self {
            meta: EventMeta {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                source,
            },
            kind,
        }
    }

    pub fn id(&self) -> Uuid {
        self.meta.id
    }

    pub fn user_message(message: Message) -> Self {
        Self::new(EventSource::User, EventKind::Message { message })
    }

    pub fn agent_message(message: Message) -> Self {
        Self::new(EventSource::Agent, EventKind::Message { message })
    }

    pub fn system_prompt(text: impl Into<String>) -> Self {
        Self::new(EventSource::Agent, EventKind::SystemPrompt { text: text.into() })
    }

    pub fn error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::new(
            EventSource::Environment,
            EventKind::Error {
                error_kind: kind,
                detail: detail.into(),
            },
        )
    }

    /// The tool-call id this event participates in, if any.
    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Action { tool_call_id, .. } | EventKind::Observation { tool_call_id, .. } => {
                tool_call_id.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_action(&self) -> bool {
        matches!(self.kind, EventKind::Action { .. })
    }

    pub fn is_observation(&self) -> bool {
        matches!(self.kind, EventKind::Observation { .. })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
