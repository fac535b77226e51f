// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context condensation.
//!
//! When the projected history approaches the model's context window, the
//! condenser emits a `Condensation` event that forgets old events and
//! substitutes an LLM-written summary.  The forgotten events stay in the
//! store; only the view changes.  Strategies are pluggable behind the
//! [`Condenser`] trait.

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use drover_llm::{CompletionOptions, Llm, LlmError, Message};

use crate::event::EventKind;
use crate::view::View;

const SUMMARIZATION_PROMPT: &str = "\
You are summarizing the beginning of an agent conversation so it can be \
condensed. Produce a compact summary that preserves: (1) the user's task and \
constraints, (2) decisions made so far and why, (3) files, resources, or \
identifiers that were touched, (4) unresolved problems or open questions. \
Write plain text, no preamble.";

#[async_trait]
pub trait Condenser: Send + Sync {
    /// Should a condensation be emitted before the next step?
    fn should_condense(&self, view: &View, llm: &Llm) -> bool;

    /// Build the condensation event payload for the current view.
    async fn condense(&self, view: &View, llm: &Llm) -> Result<EventKind, LlmError>;
}

/// Condenser that never fires; used by tests and short-lived conversations.
pub struct NoopCondenser;

#[async_trait]
impl Condenser for NoopCondenser {
    fn should_condense(&self, _view: &View, _llm: &Llm) -> bool {
        false
    }

    async fn condense(&self, _view: &View, _llm: &Llm) -> Result<EventKind, LlmError> {
        Ok(EventKind::Condensation {
            forgotten_event_ids: Vec::new(),
            summary: None,
            summary_offset: None,
        })
    }
}

/// Reference strategy: fire at a fraction of the context window (or an
/// absolute view length), forget everything between a preserved head and
/// tail, and put the model's summary where the forgotten span was.
pub struct LlmSummarizingCondenser {
    /// Leading events preserved verbatim (the system prompt lives here).
    pub keep_first: usize,
    /// Trailing events preserved verbatim.
    pub keep_recent: usize,
    /// Fraction of the model's input window that triggers condensation.
    pub trigger_fraction: f32,
    /// Absolute view-length trigger; `None` disables it.
    pub max_view_len: Option<usize>,
}

impl Default for LlmSummarizingCondenser {
    fn default() -> Self {
        Self {
            keep_first: 1,
            keep_recent: 10,
            trigger_fraction: 0.8,
            max_view_len: None,
        }
    }
}

#[async_trait]
impl Condenser for LlmSummarizingCondenser {
    fn should_condense(&self, view: &View, llm: &Llm) -> bool {
        // An unanswered explicit request always wins.
        if view.unhandled_condensation_request {
            return true;
        }
        if let Some(max) = self.max_view_len {
            if view.len() > max {
                return true;
            }
        }
        let tokens = llm.count_tokens(&view.to_messages()) as f32;
        tokens > self.trigger_fraction * llm.max_input_tokens() as f32
    }

    async fn condense(&self, view: &View, llm: &Llm) -> Result<EventKind, LlmError> {
        let len = view.len();
        let keep_tail = self.keep_recent.min(len);
        let head_end = self.keep_first.min(len.saturating_sub(keep_tail));
        let tail_start = len - keep_tail;

        // Synthetic summary events only exist in the view; their ids are
        // not in the store and must not be "forgotten".
        let span = &view.events[head_end..tail_start];
        let forgotten_event_ids: Vec<Uuid> = span
            .iter()
            .filter(|e| !matches!(e.kind, EventKind::CondensationSummary { .. }))
            .map(|e| e.id())
            .collect();

        if forgotten_event_ids.is_empty() {
            debug!("nothing to condense; emitting empty condensation");
            return Ok(EventKind::Condensation {
                forgotten_event_ids,
                summary: None,
                summary_offset: None,
            });
        }

        let transcript = render_transcript(span);
        let messages = [
            Message::system(SUMMARIZATION_PROMPT),
            Message::user(transcript),
        ];
        let response = llm
            .complete(&messages, &[], &CompletionOptions::default())
            .await?;
        let summary = response.message.text();

        Ok(EventKind::Condensation {
            forgotten_event_ids,
            summary: Some(summary),
            summary_offset: Some(head_end),
        })
    }
}

/// Flatten an event span into a plain-text transcript for the summarizer.
fn render_transcript(events: &[crate::event::Event]) -> String {
    let mut out = String::new();
    for event in events {
        match &event.kind {
            EventKind::Message { message } => {
                let role = match message.role {
                    drover_llm::Role::User => "user",
                    drover_llm::Role::Assistant => "assistant",
                    drover_llm::Role::System => "system",
                    drover_llm::Role::Tool => "tool",
                };
                out.push_str(&format!("{role}: {}\n", message.text()));
            }
            EventKind::SystemPrompt { text } => {
                out.push_str(&format!("system: {text}\n"));
            }
            EventKind::Action {
                tool_name,
                arguments,
                ..
            } => {
                out.push_str(&format!("assistant called {tool_name}({arguments})\n"));
            }
            EventKind::Observation {
                tool_name,
                content,
                is_error,
                ..
            } => {
                let text: String = content
                    .iter()
                    .filter_map(|p| match p {
                        drover_llm::ContentPart::Text { text, .. } => Some(text.as_str()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                let marker = if *is_error { " (error)" } else { "" };
                out.push_str(&format!("{tool_name} returned{marker}: {text}\n"));
            }
            EventKind::CondensationSummary { summary } => {
                out.push_str(&format!("earlier summary: {summary}\n"));
            }
            _ => {}
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
