// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Deterministic transports for tests.
//!
//! [`ScriptedTransport`] pops one pre-built response per call, so every
//! scenario — including tool calls and provider failures — runs offline and
//! repeatably.  The response builders construct `/chat/completions`-shaped
//! JSON so the gateway's real parsing path is exercised.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::LlmError;
use crate::transport::Transport;

/// A pre-scripted transport.  Each call to `chat` pops the next response
/// from the front of the queue; every request body is recorded so tests can
/// inspect what was sent.
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<Value, LlmError>>>,
    /// Answer returned once the script runs dry; `None` turns exhaustion
    /// into a provider error.
    fallback: Option<Value>,
    pub requests: Mutex<Vec<Value>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Result<Value, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Transport that answers every call with the same text reply.
    pub fn always_text(text: impl Into<String>) -> Self {
        Self::always(text_response(text))
    }

    /// Transport that answers every call with the same response.
    pub fn always(reply: Value) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(reply),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Scripted responses, then `fallback` for every later call.
    pub fn script_then(responses: Vec<Result<Value, LlmError>>, fallback: Value) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            fallback: Some(fallback),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Number of requests seen so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// The last request body sent through this transport.
    pub fn last_request(&self) -> Option<Value> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .last()
            .cloned()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn chat(&self, body: Value, _headers: &[(String, String)]) -> Result<Value, LlmError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(body);
        let mut queue = self.responses.lock().unwrap_or_else(|e| e.into_inner());
        match queue.pop_front() {
            Some(r) => r,
            None => match &self.fallback {
                Some(reply) => Ok(reply.clone()),
                // A fully drained explicit script is a test bug; surface it
                // as a provider error rather than panicking.
                None => Err(LlmError::Provider {
                    detail: "scripted transport exhausted".into(),
                    recoverable: false,
                }),
            },
        }
    }
}

/// Build a plain text completion response.
pub fn text_response(text: impl Into<String>) -> Value {
    response_with_message(json!({
        "role": "assistant",
        "content": text.into(),
    }))
}

/// Build a completion response containing native tool calls.
///
/// Ids are unique across the whole test process, mirroring real providers —
/// duplicate ids across turns would corrupt tool-call pairing.
pub fn tool_call_response(calls: &[(&str, Value)]) -> Value {
    static NEXT_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(1);
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(name, args)| {
            let n = NEXT_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            json!({
                "id": format!("call_{n}"),
                "type": "function",
                "function": { "name": name, "arguments": args.to_string() },
            })
        })
        .collect();
    response_with_message(json!({
        "role": "assistant",
        "content": Value::Null,
        "tool_calls": tool_calls,
    }))
}

/// Build a response with reasoning content alongside the text.
pub fn reasoning_response(text: impl Into<String>, reasoning: impl Into<String>) -> Value {
    response_with_message(json!({
        "role": "assistant",
        "content": text.into(),
        "reasoning_content": reasoning.into(),
    }))
}

/// Wrap an assistant message object in a full completion envelope.
pub fn response_with_message(message: Value) -> Value {
    json!({
        "id": "resp_mock_1",
        "object": "chat.completion",
        "choices": [ { "index": 0, "message": message, "finish_reason": "stop" } ],
        "usage": {
            "prompt_tokens": 10,
            "completion_tokens": 5,
            "prompt_tokens_details": { "cached_tokens": 0 },
        },
    })
}

/// A response with zero choices — exercises the `NoResponse` retry path.
pub fn empty_choices_response() -> Value {
    json!({
        "id": "resp_mock_empty",
        "object": "chat.completion",
        "choices": [],
        "usage": { "prompt_tokens": 1, "completion_tokens": 0 },
    })
}
