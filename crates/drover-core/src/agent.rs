// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! One agent step: ask the model what to do next and classify the answer
//! into events.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use drover_llm::{CompletionOptions, ContentPart, Llm, LlmError, Message, ToolSchema};
use drover_tools::{validate_args, ToolDefinition};

use crate::event::{Event, EventKind, EventSource};
use crate::prompts::system_prompt;
use crate::view::View;

/// The per-turn state machine.  Holds the model handle, the resolved tool
/// set, and the system prompt; [`Agent::step`] is the only operation.
pub struct Agent {
    llm: Arc<Llm>,
    tools: HashMap<String, ToolDefinition>,
    system_prompt: String,
}

impl Agent {
    pub fn new(llm: Arc<Llm>, tools: Vec<ToolDefinition>, custom_prompt: Option<&str>) -> Self {
        let tools = tools
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Self {
            llm,
            tools,
            system_prompt: system_prompt(custom_prompt),
        }
    }

    pub fn llm(&self) -> &Arc<Llm> {
        &self.llm
    }

    pub fn tools(&self) -> &HashMap<String, ToolDefinition> {
        &self.tools
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Tool schemas passed to the gateway, sorted for a stable prompt.
    fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Run one LLM turn over the current view.
    ///
    /// Tool calls become `Action` events (argument parse/validation failures
    /// additionally get an error `Observation` so the pair stays matched and
    /// the executor is never invoked).  A text-only reply becomes a single
    /// `Message` event — the runtime treats that as the turn being complete.
    pub async fn step(&self, view: &View) -> Result<Vec<Event>, LlmError> {
        // The runtime emits a SystemPrompt event at conversation start, and
        // the view projects it to a system message; prepend one only for
        // views that lack it (e.g. ad-hoc agent use outside the runtime).
        let mut messages = Vec::new();
        let has_system = view
            .events
            .iter()
            .any(|e| matches!(e.kind, EventKind::SystemPrompt { .. }));
        if !has_system {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(view.to_messages());

        let response = self
            .llm
            .complete(&messages, &self.schemas(), &CompletionOptions::default())
            .await?;

        let assistant = response.message;
        let calls = assistant.tool_calls.clone().unwrap_or_default();

        if calls.is_empty() {
            debug!("assistant replied with text only; turn complete");
            let mut message = assistant;
            // Serialization flags are per-request state; events store the
            // message in its neutral form.
            message.vision_enabled = false;
            message.cache_enabled = false;
            message.function_calling_enabled = false;
            return Ok(vec![Event::agent_message(message)]);
        }

        let thought = {
            let text = assistant.text();
            (!text.is_empty()).then_some(text)
        };

        let mut events = Vec::new();
        for (i, call) in calls.iter().enumerate() {
            let action = Event::new(
                EventSource::Agent,
                EventKind::Action {
                    tool_name: call.name.clone(),
                    tool_call_id: Some(call.id.clone()),
                    arguments: serde_json::from_str::<Value>(&call.arguments)
                        .unwrap_or(Value::Null),
                    thought: if i == 0 { thought.clone() } else { None },
                    // Reasoning belongs to the whole response; carry it on
                    // the first action only so it is not duplicated.
                    reasoning_text: if i == 0 {
                        assistant.reasoning_text.clone()
                    } else {
                        None
                    },
                    llm_response_id: Some(response.id.clone()),
                },
            );
            events.push(action);

            // Validate at the boundary; a failing call gets its error
            // observation here and never reaches the executor.
            if let Some(detail) = self.validation_failure(call.name.as_str(), &call.arguments) {
                events.push(Event::new(
                    EventSource::Environment,
                    EventKind::Observation {
                        tool_call_id: Some(call.id.clone()),
                        tool_name: call.name.clone(),
                        content: vec![ContentPart::text(detail)],
                        is_error: true,
                    },
                ));
            }
        }
        Ok(events)
    }

    /// Returns the error text when `arguments` does not parse or validate
    /// against the named tool's schema.  Unknown tools pass — the runtime
    /// reports those when it fails to find an executor.
    fn validation_failure(&self, tool_name: &str, arguments: &str) -> Option<String> {
        let args: Value = match serde_json::from_str(arguments) {
            Ok(v) => v,
            Err(e) => {
                return Some(format!(
                    "arguments failed to validate: not valid JSON: {e}"
                ))
            }
        };
        let def = self.tools.get(tool_name)?;
        validate_args(&def.input_schema, &args).err()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
