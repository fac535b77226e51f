// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

/// Serde default helper — returns `true`.
///
/// Used for config fields that should be enabled unless the user explicitly
/// sets them to `false`.  `#[serde(default)]` on a `bool` always falls back
/// to `bool::default()` (i.e. `false`), so a named function is required.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentProfile,
    #[serde(default)]
    pub conversation: ConversationConfig,
    /// Named LLM configurations beyond the default one.
    ///
    /// Each entry is registered in the service registry under its key, so
    /// agents and condensers can reference a dedicated model:
    ///
    /// ```yaml
    /// llms:
    ///   condenser:
    ///     model: gpt-4o-mini
    ///     api_key: ${OPENAI_API_KEY}
    ///   main:
    ///     model: claude-sonnet-4-20250514
    /// ```
    #[serde(default)]
    pub llms: HashMap<String, LlmConfig>,
}

/// Reasoning effort forwarded to models that support it.
///
/// `None` explicitly disables the parameter for models where the provider
/// default would otherwise apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    None,
}

impl std::fmt::Display for ReasoningEffort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningEffort::Low => write!(f, "low"),
            ReasoningEffort::Medium => write!(f, "medium"),
            ReasoningEffort::High => write!(f, "high"),
            ReasoningEffort::None => write!(f, "none"),
        }
    }
}

/// Complete configuration for one LLM service.
///
/// A conversation typically uses a single service; additional services
/// (e.g. a cheaper summarization model for the condenser) are declared in
/// [`Config::llms`] and resolved through the service registry by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Model identifier in `provider/model` or bare form, e.g.
    /// `"anthropic/claude-sonnet-4-20250514"` or `"gpt-4o"`.
    pub model: String,
    /// API key; serializes redacted, re-injected on load.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override for proxies and self-hosted endpoints.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Provider REST API version (Azure).
    #[serde(default)]
    pub api_version: Option<String>,

    // ── AWS Bedrock ──────────────────────────────────────────────────────────
    #[serde(default)]
    pub aws_access_key_id: Option<SecretString>,
    #[serde(default)]
    pub aws_secret_access_key: Option<SecretString>,
    #[serde(default)]
    pub aws_region: Option<String>,

    // ── Retry policy ─────────────────────────────────────────────────────────
    /// Maximum completion attempts before the error is surfaced.
    #[serde(default = "default_num_retries")]
    pub num_retries: u32,
    /// Lower clamp on the backoff wait, in seconds.
    #[serde(default = "default_retry_min_wait")]
    pub retry_min_wait: u64,
    /// Upper clamp on the backoff wait, in seconds.
    #[serde(default = "default_retry_max_wait")]
    pub retry_max_wait: u64,
    /// Backoff multiplier: `wait = multiplier * 2^attempt`, clamped.
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Per-attempt wall-clock timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
    /// Hard cap on serialized message characters; larger content is truncated
    /// by the caller before submission.
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    // ── Sampling ─────────────────────────────────────────────────────────────
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<u32>,
    #[serde(default)]
    pub seed: Option<u64>,

    // ── Window & cost ────────────────────────────────────────────────────────
    #[serde(default)]
    pub max_input_tokens: Option<u32>,
    #[serde(default)]
    pub max_output_tokens: Option<u32>,
    /// USD per input token; used when the provider does not report cost.
    #[serde(default)]
    pub input_cost_per_token: Option<f64>,
    /// USD per output token.
    #[serde(default)]
    pub output_cost_per_token: Option<f64>,

    // ── Provider quirks ──────────────────────────────────────────────────────
    /// Ask the provider layer to drop unsupported params instead of erroring.
    #[serde(default = "default_true")]
    pub drop_params: bool,
    /// Provider-global request mutation flag; guarded by a process mutex
    /// around each call.
    #[serde(default = "default_true")]
    pub modify_params: bool,
    #[serde(default)]
    pub disable_vision: bool,
    /// Mark prompt-cache breakpoints when the model supports them.
    #[serde(default = "default_true")]
    pub caching_prompt: bool,
    /// Log full request/response pairs at debug level.
    #[serde(default)]
    pub log_completions: bool,
    /// Tokenizer name override for token counting; the chars/4 heuristic is
    /// used when unset.
    #[serde(default)]
    pub custom_tokenizer: Option<String>,
    /// Force native tool calling on/off; `None` consults the feature table.
    #[serde(default)]
    pub native_tool_calling: Option<bool>,
    #[serde(default)]
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Token budget for extended thinking, forwarded as
    /// `thinking.budget_tokens` on models that support it.
    #[serde(default)]
    pub extended_thinking_budget: Option<u32>,
    /// Mistral / Gemini safety settings, forwarded verbatim.
    #[serde(default)]
    pub safety_settings: Option<serde_json::Value>,

    /// Registry key for this service.
    #[serde(default = "default_service_id")]
    pub service_id: String,
    /// Free-form metadata attached to telemetry and logs.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_num_retries() -> u32 {
    5
}
fn default_retry_min_wait() -> u64 {
    8
}
fn default_retry_max_wait() -> u64 {
    64
}
fn default_retry_multiplier() -> f64 {
    8.0
}
fn default_max_message_chars() -> usize {
    30_000
}
fn default_service_id() -> String {
    "default".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: String::new(),
            api_key: None,
            base_url: None,
            api_version: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: None,
            num_retries: default_num_retries(),
            retry_min_wait: default_retry_min_wait(),
            retry_max_wait: default_retry_max_wait(),
            retry_multiplier: default_retry_multiplier(),
            timeout: None,
            max_message_chars: default_max_message_chars(),
            temperature: None,
            top_p: None,
            top_k: None,
            seed: None,
            max_input_tokens: None,
            max_output_tokens: None,
            input_cost_per_token: None,
            output_cost_per_token: None,
            drop_params: true,
            modify_params: true,
            disable_vision: false,
            caching_prompt: true,
            log_completions: false,
            custom_tokenizer: None,
            native_tool_calling: None,
            reasoning_effort: None,
            extended_thinking_budget: None,
            safety_settings: None,
            service_id: default_service_id(),
            metadata: HashMap::new(),
        }
    }
}

impl LlmConfig {
    /// Reconcile a persisted (secret-redacted) config against this runtime
    /// config.
    ///
    /// All non-secret fields must match exactly — secrets serialize as
    /// `"****"` on both sides, so a JSON comparison covers precisely the
    /// non-secret surface.  On success the runtime config (which carries the
    /// real secrets) is returned, i.e. secrets are re-injected.
    pub fn reconcile_persisted(&self, persisted: &LlmConfig) -> Result<LlmConfig, ConfigError> {
        let runtime_view = serde_json::to_value(self).map_err(|e| ConfigError::Invalid {
            detail: e.to_string(),
        })?;
        let persisted_view = serde_json::to_value(persisted).map_err(|e| ConfigError::Invalid {
            detail: e.to_string(),
        })?;

        if runtime_view != persisted_view {
            let mismatched = diff_fields(&runtime_view, &persisted_view);
            return Err(ConfigError::PersistedMismatch { fields: mismatched });
        }
        Ok(self.clone())
    }
}

/// Top-level field names whose serialized values differ between two configs.
fn diff_fields(a: &serde_json::Value, b: &serde_json::Value) -> Vec<String> {
    let (Some(a), Some(b)) = (a.as_object(), b.as_object()) else {
        return vec!["<root>".to_string()];
    };
    let mut fields: Vec<String> = a
        .iter()
        .filter(|(key, value)| b.get(key.as_str()) != Some(*value))
        .map(|(key, _)| key.to_string())
        .collect();
    for key in b.keys() {
        if !a.contains_key(key) {
            fields.push(key.clone());
        }
    }
    fields.sort();
    fields
}

/// Configuration errors surfaced at load or reconcile time.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {detail}")]
    Invalid { detail: String },
    #[error("persisted config does not match runtime config; mismatched fields: {fields:?}")]
    PersistedMismatch { fields: Vec<String> },
}

/// Static description of an agent: which tools it may call and the system
/// prompt it runs under.  Tool names are resolved against the process-wide
/// tool registry when a conversation starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Tool names resolved through the registry at conversation start.
    #[serde(default)]
    pub tools: Vec<String>,
    /// System prompt override; leave None to use the built-in prompt.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Which LLM service this agent uses (key into the service registry).
    #[serde(default = "default_service_id")]
    pub llm_service: String,
}

impl Default for AgentProfile {
    fn default() -> Self {
        Self {
            tools: Vec::new(),
            system_prompt: None,
            llm_service: default_service_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Maximum runtime loop iterations before the conversation errors out.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Enable the repetition-based stuck detector.
    #[serde(default = "default_true")]
    pub stuck_detection: bool,
    /// Hard cost ceiling in USD; unset means unlimited.
    #[serde(default)]
    pub max_budget: Option<f64>,
}

fn default_max_iterations() -> u32 {
    500
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stuck_detection: true,
            max_budget: None,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
