// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The provider-agnostic completion gateway.
//!
//! One entry point: [`Llm::complete`].  The gateway normalizes provider
//! quirks, wraps the transport call in exponential-backoff retry, accounts
//! tokens and cost into the conversation's [`Metrics`], and transparently
//! converts between native tool calling and the prompt-mocked grammar for
//! models without native support.  Streaming is deliberately unsupported.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::debug;

use drover_config::{LlmConfig, ReasoningEffort};

use crate::error::{looks_like_context_window_error, LlmError};
use crate::features::{get_features, ModelFeatures};
use crate::fncall;
use crate::globals::scoped_modify_params;
use crate::metrics::{Metrics, TokenUsage};
use crate::retry::{with_retries, RetryListener, RetryPolicy};
use crate::transport::{AuthStyle, HttpTransport, Transport};
use crate::types::{
    CompletionOptions, CompletionResponse, ContentPart, Message, Role, ToolCallItem, ToolSchema,
};

/// Context window assumed when neither config nor the model table knows.
const DEFAULT_MAX_INPUT_TOKENS: u32 = 128_000;

/// Providers whose wire format rejects content-part arrays; message content
/// is flattened to a plain string for these.
static STRING_SERIALIZATION_MODELS: &[&str] = &["mistral", "groq", "deepseek"];

pub struct Llm {
    config: LlmConfig,
    features: ModelFeatures,
    transport: Arc<dyn Transport>,
    metrics: Arc<Metrics>,
    retry_policy: RetryPolicy,
    retry_listener: Option<RetryListener>,
}

impl Llm {
    /// Build a gateway with an HTTP transport derived from the config.
    pub fn new(config: LlmConfig) -> Self {
        let transport = Arc::new(build_http_transport(&config));
        Self::with_transport(config, transport)
    }

    /// Build a gateway over an explicit transport (tests, proxies).
    pub fn with_transport(config: LlmConfig, transport: Arc<dyn Transport>) -> Self {
        let features = get_features(&config.model);
        let metrics = Arc::new(Metrics::new(config.model.clone(), None));
        let retry_policy = RetryPolicy::new(
            config.num_retries,
            config.retry_min_wait,
            config.retry_max_wait,
            config.retry_multiplier,
        );
        Self {
            features,
            metrics,
            retry_policy,
            retry_listener: None,
            transport,
            config,
        }
    }

    pub fn with_retry_listener(mut self, listener: RetryListener) -> Self {
        self.retry_listener = Some(listener);
        self
    }

    /// A gateway with the same config and transport but fresh metrics.
    ///
    /// Metrics belong to a conversation; a registry-held `Llm` is forked
    /// once per conversation so accounting never crosses conversations.
    pub fn fork(&self) -> Self {
        Self {
            config: self.config.clone(),
            features: self.features,
            transport: Arc::clone(&self.transport),
            metrics: Arc::new(Metrics::new(self.config.model.clone(), None)),
            retry_policy: self.retry_policy.clone(),
            retry_listener: self.retry_listener.clone(),
        }
    }

    /// Attach the owning conversation's metrics so accounting accumulates
    /// there instead of in a private instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    pub fn service_id(&self) -> &str {
        &self.config.service_id
    }

    pub fn config(&self) -> &LlmConfig {
        &self.config
    }

    pub fn features(&self) -> ModelFeatures {
        self.features
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Usable input window for this model.
    pub fn max_input_tokens(&self) -> u32 {
        self.config
            .max_input_tokens
            .unwrap_or(DEFAULT_MAX_INPUT_TOKENS)
    }

    pub fn vision_active(&self) -> bool {
        !self.config.disable_vision && self.features.supports_vision
    }

    /// Whether tool schemas are passed through natively (vs prompt-mocked).
    pub fn native_tool_calling_active(&self) -> bool {
        self.config
            .native_tool_calling
            .unwrap_or(self.features.supports_function_calling)
    }

    pub fn caching_active(&self) -> bool {
        self.config.caching_prompt && self.features.supports_prompt_cache
    }

    /// Approximate token count for a message list (chars/4 heuristic, image
    /// estimates included).  Used by the condenser to decide when to fire.
    pub fn count_tokens(&self, messages: &[Message]) -> usize {
        messages.iter().map(Message::approx_tokens).sum()
    }

    /// Single entry point for LLM completion.
    ///
    /// Normalize → (maybe) mock tools → transport with retries → account.
    pub async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        options: &CompletionOptions,
    ) -> Result<CompletionResponse, LlmError> {
        if options.stream {
            return Err(LlmError::UnsupportedOption(
                "streaming completions are not supported".into(),
            ));
        }

        let native = self.native_tool_calling_active();
        let mock_tools = !tools.is_empty() && !native;

        let prepared = self.prepare_messages(messages, tools, mock_tools);
        let body = self.build_body(&prepared, tools, native, options);
        let headers = self.build_headers();

        if self.config.log_completions {
            debug!(model = %self.config.model, body = %body, "completion request");
        }

        let transport = Arc::clone(&self.transport);
        let modify_params = self.config.modify_params;
        let raw = with_retries(&self.retry_policy, self.retry_listener.as_ref(), || {
            let body = body.clone();
            let headers = headers.clone();
            let transport = Arc::clone(&transport);
            async move {
                let resp = scoped_modify_params(modify_params, |_flag| async {
                    transport.chat(body, &headers).await
                })
                .await
                .map_err(map_provider_error)?;
                // "Zero choices" is a known transient provider glitch and is
                // retried like a 5xx.
                let empty = resp["choices"].as_array().map(Vec::is_empty).unwrap_or(true);
                if empty {
                    return Err(LlmError::NoResponse);
                }
                Ok(resp)
            }
        })
        .await?;

        if self.config.log_completions {
            debug!(model = %self.config.model, response = %raw, "completion response");
        }

        let mut message = parse_assistant_message(&raw)?;
        if mock_tools {
            let (cleaned, calls) = fncall::parse_tool_calls(&message.text());
            if !calls.is_empty() {
                message.content = vec![ContentPart::text(cleaned)];
                message.tool_calls = Some(calls);
            }
        }

        let (usage, reported_cost) = parse_usage(&raw);
        let cost = reported_cost.unwrap_or_else(|| self.computed_cost(&usage));
        self.metrics.record(&usage, cost);

        Ok(CompletionResponse {
            id: raw["id"].as_str().unwrap_or_default().to_string(),
            message,
            metrics: self.metrics.snapshot(),
            raw_response: raw,
        })
    }

    /// Cost from configured per-token prices when the provider reports none.
    fn computed_cost(&self, usage: &TokenUsage) -> f64 {
        let input = self.config.input_cost_per_token.unwrap_or(0.0) * usage.prompt as f64;
        let output = self.config.output_cost_per_token.unwrap_or(0.0) * usage.completion as f64;
        input + output
    }

    /// Clone the caller's messages and apply per-request serialization state:
    /// vision/caching/function-calling flags, the prompt-mock grammar, and
    /// cache breakpoints.
    fn prepare_messages(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        mock_tools: bool,
    ) -> Vec<Message> {
        let vision = self.vision_active();
        let caching = self.caching_active();
        let native = self.native_tool_calling_active();

        let mut msgs: Vec<Message> = messages.to_vec();
        for m in &mut msgs {
            m.vision_enabled = vision;
            m.cache_enabled = caching;
            m.function_calling_enabled = native;
        }

        if mock_tools {
            let suffix = fncall::render_tools_prompt(tools);
            match msgs.iter_mut().find(|m| m.role == Role::System) {
                Some(sys) => sys.content.push(ContentPart::text(suffix)),
                None => msgs.insert(0, Message::system(suffix)),
            }
        }

        if caching {
            apply_prompt_caching(&mut msgs);
        }
        msgs
    }

    /// Assemble the `/chat/completions` request body with provider
    /// normalization applied.
    fn build_body(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        native: bool,
        options: &CompletionOptions,
    ) -> Value {
        let string_serializer = requires_string_serialization(&self.config.model);
        let wire_messages: Vec<Value> = messages
            .iter()
            .map(|m| message_to_wire(m, string_serializer))
            .collect();

        let mut body = Map::new();
        body.insert("model".into(), json!(wire_model_name(&self.config.model)));
        body.insert("messages".into(), Value::Array(wire_messages));

        if native && !tools.is_empty() {
            let wire_tools: Vec<Value> = tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        },
                    })
                })
                .collect();
            body.insert("tools".into(), Value::Array(wire_tools));
        }

        // Sampling parameters; per-call options win over config.
        if let Some(t) = options.temperature.or(self.config.temperature) {
            body.insert("temperature".into(), json!(t));
        }
        if let Some(p) = self.config.top_p {
            body.insert("top_p".into(), json!(p));
        }
        if let Some(k) = self.config.top_k {
            body.insert("top_k".into(), json!(k));
        }
        if let Some(seed) = self.config.seed {
            body.insert("seed".into(), json!(seed));
        }
        if let Some(max) = options.max_output_tokens.or(self.config.max_output_tokens) {
            body.insert("max_completion_tokens".into(), json!(max));
        }

        // Azure deployments still use the legacy parameter name.
        if self.config.model.starts_with("azure") {
            if let Some(v) = body.remove("max_completion_tokens") {
                body.insert("max_tokens".into(), v);
            }
        }

        // Reasoning-capable models ignore sampling and take an effort level.
        if self.features.supports_reasoning_effort {
            body.remove("temperature");
            body.remove("top_p");
            match self.config.reasoning_effort {
                Some(ReasoningEffort::None) | None => {
                    // gemini-2.5-pro sends no reasoning at all unless the
                    // effort parameter is present; default it to low.
                    if self.config.model.contains("gemini-2.5-pro") {
                        body.insert("reasoning_effort".into(), json!("low"));
                    }
                }
                Some(effort) => {
                    body.insert("reasoning_effort".into(), json!(effort.to_string()));
                }
            }
        }

        // Extended-thinking models take an explicit token budget instead.
        if self.features.supports_extended_thinking {
            body.remove("temperature");
            body.remove("top_p");
            if let Some(budget) = self.config.extended_thinking_budget {
                body.insert(
                    "thinking".into(),
                    json!({ "type": "enabled", "budget_tokens": budget }),
                );
                // Thinking models take the cap as max_tokens.
                body.remove("max_completion_tokens");
                if let Some(max) = self.config.max_output_tokens {
                    body.insert("max_tokens".into(), json!(max));
                }
            }
        }

        // Mistral / Gemini safety settings pass through verbatim.
        if let Some(safety) = &self.config.safety_settings {
            let model = self.config.model.to_ascii_lowercase();
            if model.contains("mistral") || model.contains("gemini") {
                body.insert("safety_settings".into(), safety.clone());
            }
        }

        Value::Object(body)
    }

    fn build_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if self.features.supports_extended_thinking
            && self.config.extended_thinking_budget.is_some()
        {
            headers.push((
                "anthropic-beta".to_string(),
                "interleaved-thinking-2025-05-14".to_string(),
            ));
        }
        headers
    }
}

/// Strip the routing prefix for the wire: providers expect their own name,
/// e.g. `anthropic/claude-x` is sent as `claude-x`.
fn wire_model_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

fn requires_string_serialization(model: &str) -> bool {
    let name = model.to_ascii_lowercase();
    STRING_SERIALIZATION_MODELS.iter().any(|m| name.contains(m))
}

fn build_http_transport(config: &LlmConfig) -> HttpTransport {
    let api_key = config.api_key.as_ref().map(|k| k.expose().to_string());
    let timeout = config.timeout.map(Duration::from_secs);
    let base = config
        .base_url
        .as_deref()
        .unwrap_or("https://api.openai.com/v1")
        .trim_end_matches('/')
        .to_string();
    if config.model.starts_with("azure") {
        // Azure encodes the deployment in the URL and versions via query.
        let version = config.api_version.as_deref().unwrap_or("2024-02-01");
        let url = format!("{base}/chat/completions?api-version={version}");
        HttpTransport::new(url, api_key, AuthStyle::ApiKeyHeader, timeout)
    } else {
        let url = format!("{base}/chat/completions");
        HttpTransport::new(url, api_key, AuthStyle::Bearer, timeout)
    }
}

/// Re-classify generic provider errors whose message identifies a context
/// overflow; the retry loop must not waste attempts on those.
fn map_provider_error(err: LlmError) -> LlmError {
    match &err {
        LlmError::Provider { detail, .. } | LlmError::BadRequest(detail)
            if looks_like_context_window_error(detail) =>
        {
            LlmError::ContextWindowExceeded(detail.clone())
        }
        _ => err,
    }
}

/// Mark cache breakpoints: the last text part of the system message and of
/// the most recent user or tool message.
fn apply_prompt_caching(messages: &mut [Message]) {
    if let Some(sys) = messages.iter_mut().rev().find(|m| m.role == Role::System) {
        mark_last_text_part(sys);
    }
    if let Some(last) = messages
        .iter_mut()
        .rev()
        .find(|m| matches!(m.role, Role::User | Role::Tool))
    {
        mark_last_text_part(last);
    }
}

fn mark_last_text_part(message: &mut Message) {
    if let Some(ContentPart::Text { cache_prompt, .. }) = message
        .content
        .iter_mut()
        .rev()
        .find(|p| matches!(p, ContentPart::Text { .. }))
    {
        *cache_prompt = true;
    }
}

/// Serialize one message into the `/chat/completions` wire shape.
fn message_to_wire(message: &Message, string_serializer: bool) -> Value {
    let role = match message.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut out = Map::new();
    out.insert("role".into(), json!(role));
    out.insert("content".into(), content_to_wire(message, string_serializer));

    if let Some(id) = &message.tool_call_id {
        out.insert("tool_call_id".into(), json!(id));
    }

    if let Some(calls) = &message.tool_calls {
        if message.function_calling_enabled {
            let wire: Vec<Value> = calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments },
                    })
                })
                .collect();
            out.insert("tool_calls".into(), Value::Array(wire));
        } else {
            // Prompt-mock path: prior calls are re-rendered in the grammar so
            // the model sees its own history in the format it must produce.
            let mut text = message.text();
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&fncall::render_tool_calls(calls));
            out.insert("content".into(), json!(text));
        }
    }

    Value::Object(out)
}

/// Serialize message content — a plain string when possible, a content-part
/// array when images or cache breakpoints require it.
fn content_to_wire(message: &Message, string_serializer: bool) -> Value {
    let wants_images = message.vision_enabled && message.contains_image();
    let wants_cache = message.cache_enabled
        && message
            .content
            .iter()
            .any(|p| matches!(p, ContentPart::Text { cache_prompt: true, .. }));

    if string_serializer || (!wants_images && !wants_cache) {
        return json!(message.text());
    }

    let mut parts = Vec::new();
    for part in &message.content {
        match part {
            ContentPart::Text { text, cache_prompt } => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!("text"));
                obj.insert("text".into(), json!(text));
                if *cache_prompt && message.cache_enabled {
                    obj.insert("cache_control".into(), json!({ "type": "ephemeral" }));
                }
                parts.push(Value::Object(obj));
            }
            ContentPart::Image { urls } => {
                if message.vision_enabled {
                    for url in urls {
                        parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
                    }
                }
            }
        }
    }
    Value::Array(parts)
}

/// Parse the assistant message out of `choices[0]`.
fn parse_assistant_message(raw: &Value) -> Result<Message, LlmError> {
    let msg = &raw["choices"][0]["message"];
    if msg.is_null() {
        return Err(LlmError::NoResponse);
    }

    let mut content = Vec::new();
    match &msg["content"] {
        Value::String(s) => content.push(ContentPart::text(s.clone())),
        Value::Array(parts) => {
            for p in parts {
                if let Some(text) = p["text"].as_str() {
                    content.push(ContentPart::text(text));
                }
            }
        }
        _ => {}
    }
    if content.is_empty() {
        content.push(ContentPart::text(""));
    }

    let tool_calls = msg["tool_calls"].as_array().map(|calls| {
        calls
            .iter()
            .map(|c| ToolCallItem {
                id: c["id"].as_str().unwrap_or_default().to_string(),
                name: c["function"]["name"].as_str().unwrap_or_default().to_string(),
                arguments: c["function"]["arguments"]
                    .as_str()
                    .unwrap_or("{}")
                    .to_string(),
            })
            .collect::<Vec<_>>()
    });
    let tool_calls = tool_calls.filter(|c| !c.is_empty());

    let reasoning_text = msg["reasoning_content"]
        .as_str()
        .or_else(|| msg["reasoning_text"].as_str())
        .map(str::to_string);

    Ok(Message {
        role: Role::Assistant,
        content,
        tool_call_id: None,
        tool_calls,
        reasoning_text,
        vision_enabled: false,
        cache_enabled: false,
        function_calling_enabled: false,
    })
}

/// Extract token usage and (when present) the provider-reported cost.
fn parse_usage(raw: &Value) -> (TokenUsage, Option<f64>) {
    let usage = &raw["usage"];
    let token_usage = TokenUsage {
        prompt: usage["prompt_tokens"].as_u64().unwrap_or(0),
        completion: usage["completion_tokens"].as_u64().unwrap_or(0),
        cache_read: usage["prompt_tokens_details"]["cached_tokens"]
            .as_u64()
            .or_else(|| usage["cache_read_input_tokens"].as_u64())
            .unwrap_or(0),
        cache_write: usage["cache_creation_input_tokens"].as_u64().unwrap_or(0),
    };
    let cost = usage["cost"].as_f64();
    (token_usage, cost)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::mock::{
        empty_choices_response, reasoning_response, text_response, tool_call_response,
        ScriptedTransport,
    };

    use super::*;

    fn config(model: &str) -> LlmConfig {
        LlmConfig {
            model: model.into(),
            // Keep retry sleeps out of the test clock.
            retry_min_wait: 0,
            retry_max_wait: 0,
            retry_multiplier: 0.0,
            ..Default::default()
        }
    }

    fn echo_schema() -> ToolSchema {
        ToolSchema {
            name: "echo".into(),
            description: "Echo text back".into(),
            parameters: json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"],
            }),
        }
    }

    #[tokio::test]
    async fn streaming_is_rejected() {
        let llm = Llm::with_transport(
            config("gpt-4o"),
            Arc::new(ScriptedTransport::always_text("hi")),
        );
        let options = CompletionOptions {
            stream: true,
            ..Default::default()
        };
        let err = llm
            .complete(&[Message::user("hello")], &[], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedOption(_)));
    }

    #[tokio::test]
    async fn plain_completion_returns_text() {
        let transport = Arc::new(ScriptedTransport::always_text("hello back"));
        let llm = Llm::with_transport(config("gpt-4o"), Arc::clone(&transport) as Arc<dyn Transport>);
        let resp = llm
            .complete(
                &[Message::user("hello")],
                &[],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(resp.message.text(), "hello back");
        assert_eq!(resp.message.role, Role::Assistant);
        assert!(resp.message.tool_calls.is_none());
    }

    #[tokio::test]
    async fn native_tool_calls_are_parsed() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(tool_call_response(&[(
            "echo",
            json!({"text": "hi"}),
        )]))]));
        let llm = Llm::with_transport(config("gpt-4o"), Arc::clone(&transport) as Arc<dyn Transport>);
        let resp = llm
            .complete(
                &[Message::user("call echo")],
                &[echo_schema()],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();
        let calls = resp.message.tool_calls.unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        // Tools were passed through natively.
        let body = transport.last_request().unwrap();
        assert!(body["tools"].is_array());
    }

    #[tokio::test]
    async fn mocked_tool_calls_look_native_to_the_caller() {
        let reply = "<function=echo>\n<parameter=text>hi</parameter>\n</function>";
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(text_response(reply))]));
        // deepseek has no native function calling in the feature table.
        let llm = Llm::with_transport(config("deepseek-chat"), Arc::clone(&transport) as Arc<dyn Transport>);
        let resp = llm
            .complete(
                &[Message::user("call echo")],
                &[echo_schema()],
                &CompletionOptions::default(),
            )
            .await
            .unwrap();

        let calls = resp.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].name, "echo");
        let args: Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args, json!({"text": "hi"}));
        // The grammar markup never reaches the caller.
        assert!(!resp.message.text().contains("<function="));

        // No native tools on the wire; the grammar went into the system prompt.
        let body = transport.last_request().unwrap();
        assert!(body.get("tools").is_none());
        let first = &body["messages"][0];
        assert_eq!(first["role"], "system");
        assert!(first["content"]
            .as_str()
            .unwrap()
            .contains("BEGIN FUNCTION: echo"));
    }

    #[tokio::test]
    async fn zero_choices_is_retried_then_succeeds() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(empty_choices_response()),
            Ok(text_response("second try")),
        ]));
        let llm = Llm::with_transport(config("gpt-4o"), Arc::clone(&transport) as Arc<dyn Transport>);
        let resp = llm
            .complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.text(), "second try");
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn auth_error_is_not_retried() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(LlmError::Auth("bad key".into())),
            Ok(text_response("unreachable")),
        ]));
        let llm = Llm::with_transport(config("gpt-4o"), Arc::clone(&transport) as Arc<dyn Transport>);
        let err = llm
            .complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Auth(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn retry_listener_is_invoked() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let transport = Arc::new(ScriptedTransport::new(vec![
            Err(LlmError::Transient("blip".into())),
            Ok(text_response("ok")),
        ]));
        let llm = Llm::with_transport(config("gpt-4o"), transport).with_retry_listener(Arc::new(
            move |attempt, max| seen2.lock().unwrap().push((attempt, max)),
        ));
        llm.complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![(1, 5)]);
    }

    #[tokio::test]
    async fn usage_is_accounted_with_configured_cost() {
        let mut cfg = config("gpt-4o");
        cfg.input_cost_per_token = Some(0.001);
        cfg.output_cost_per_token = Some(0.002);
        let llm = Llm::with_transport(cfg, Arc::new(ScriptedTransport::always_text("hi")));
        llm.complete(&[Message::user("hello")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let snap = llm.metrics().snapshot();
        assert_eq!(snap.accumulated_token_usage.prompt, 10);
        assert_eq!(snap.accumulated_token_usage.completion, 5);
        // 10 * 0.001 + 5 * 0.002
        assert!((snap.accumulated_cost - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn metrics_are_monotone_across_calls() {
        let llm = Llm::with_transport(
            config("gpt-4o"),
            Arc::new(ScriptedTransport::always_text("hi")),
        );
        let mut last_prompt = 0;
        for _ in 0..3 {
            let resp = llm
                .complete(&[Message::user("x")], &[], &CompletionOptions::default())
                .await
                .unwrap();
            let prompt = resp.metrics.accumulated_token_usage.prompt;
            assert!(prompt > last_prompt);
            last_prompt = prompt;
        }
    }

    #[tokio::test]
    async fn reasoning_content_round_trips() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(reasoning_response(
            "the answer",
            "let me think",
        ))]));
        let llm = Llm::with_transport(config("o3"), transport);
        let resp = llm
            .complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        assert_eq!(resp.message.reasoning_text.as_deref(), Some("let me think"));
        assert_eq!(resp.message.text(), "the answer");
    }

    #[tokio::test]
    async fn reasoning_model_drops_sampling_params() {
        let mut cfg = config("o3");
        cfg.temperature = Some(0.7);
        cfg.top_p = Some(0.9);
        cfg.reasoning_effort = Some(ReasoningEffort::High);
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let llm = Llm::with_transport(cfg, Arc::clone(&transport) as Arc<dyn Transport>);
        llm.complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        assert!(body.get("temperature").is_none());
        assert!(body.get("top_p").is_none());
        assert_eq!(body["reasoning_effort"], "high");
    }

    #[tokio::test]
    async fn extended_thinking_sends_budget_and_header() {
        let mut cfg = config("claude-sonnet-4-20250514");
        cfg.extended_thinking_budget = Some(2048);
        cfg.max_output_tokens = Some(8192);
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let llm = Llm::with_transport(cfg, Arc::clone(&transport) as Arc<dyn Transport>);
        llm.complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        assert_eq!(body["thinking"]["budget_tokens"], 2048);
        assert_eq!(body["max_tokens"], 8192);
    }

    #[tokio::test]
    async fn azure_uses_legacy_max_tokens_name() {
        let mut cfg = config("azure/gpt-4o");
        cfg.max_output_tokens = Some(1024);
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let llm = Llm::with_transport(cfg, Arc::clone(&transport) as Arc<dyn Transport>);
        llm.complete(&[Message::user("hi")], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        assert!(body.get("max_completion_tokens").is_none());
        assert_eq!(body["max_tokens"], 1024);
    }

    #[tokio::test]
    async fn prompt_cache_breakpoints_are_marked() {
        let cfg = config("claude-sonnet-4-20250514");
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let llm = Llm::with_transport(cfg, Arc::clone(&transport) as Arc<dyn Transport>);
        let messages = [
            Message::system("you are helpful"),
            Message::user("first"),
            Message::assistant("sure"),
            Message::user("second"),
        ];
        llm.complete(&messages, &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        let wire = body["messages"].as_array().unwrap();
        // System message and the most recent user message carry breakpoints.
        assert_eq!(wire[0]["content"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(wire[3]["content"][0]["cache_control"]["type"], "ephemeral");
        // The earlier user message does not.
        assert!(wire[1]["content"].is_string());
    }

    #[tokio::test]
    async fn images_are_stripped_for_non_vision_models() {
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let llm = Llm::with_transport(config("deepseek-chat"), Arc::clone(&transport) as Arc<dyn Transport>);
        let msg = Message::user_with_parts(vec![
            ContentPart::text("look at this"),
            ContentPart::image(vec!["https://example.com/a.png".into()]),
        ]);
        llm.complete(&[msg], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        let content = &body["messages"][0]["content"];
        assert_eq!(content, &json!("look at this"));
    }

    #[tokio::test]
    async fn images_are_sent_for_vision_models() {
        let transport = Arc::new(ScriptedTransport::always_text("ok"));
        let mut cfg = config("gpt-4o");
        cfg.caching_prompt = false;
        let llm = Llm::with_transport(cfg, Arc::clone(&transport) as Arc<dyn Transport>);
        let msg = Message::user_with_parts(vec![
            ContentPart::text("look at this"),
            ContentPart::image(vec!["https://example.com/a.png".into()]),
        ]);
        llm.complete(&[msg], &[], &CompletionOptions::default())
            .await
            .unwrap();
        let body = transport.last_request().unwrap();
        let parts = body["messages"][0]["content"].as_array().unwrap();
        assert_eq!(parts[0]["type"], "text");
        assert_eq!(parts[1]["type"], "image_url");
        assert_eq!(parts[1]["image_url"]["url"], "https://example.com/a.png");
    }

    #[test]
    fn wire_model_name_strips_prefix() {
        assert_eq!(wire_model_name("anthropic/claude-x"), "claude-x");
        assert_eq!(wire_model_name("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn context_window_pattern_upgrades_provider_error() {
        let err = map_provider_error(LlmError::BadRequest(
            "maximum context length is 8192 tokens".into(),
        ));
        assert!(matches!(err, LlmError::ContextWindowExceeded(_)));
    }
}
