//! Model capability table.
//!
//! Single source of truth for which API features a model supports.  Matching
//! is by substring on the model name with provider prefixes stripped, so
//! `"litellm_proxy/anthropic/claude-sonnet-4-20250514"` resolves the same
//! as `"claude-sonnet-4-20250514"`.

/// Capability flags for one model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModelFeatures {
    pub supports_function_calling: bool,
    pub supports_reasoning_effort: bool,
    pub supports_extended_thinking: bool,
    pub supports_prompt_cache: bool,
    pub supports_vision: bool,
}

struct FeatureEntry {
    /// Substring matched against the normalized model name.
    pattern: &'static str,
    features: ModelFeatures,
}

const FULL: ModelFeatures = ModelFeatures {
    supports_function_calling: true,
    supports_reasoning_effort: false,
    supports_extended_thinking: false,
    supports_prompt_cache: false,
    supports_vision: true,
};

static FEATURE_TABLE: &[FeatureEntry] = &[
    // ── Anthropic ─────────────────────────────────────────────────────────────
    FeatureEntry {
        pattern: "claude-sonnet-4",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: false,
            supports_extended_thinking: true,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "claude-opus-4",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: false,
            supports_extended_thinking: true,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "claude-3-7-sonnet",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: false,
            supports_extended_thinking: true,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "claude-3-5-sonnet",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: false,
            supports_extended_thinking: false,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "claude-3-5-haiku",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: false,
            supports_extended_thinking: false,
            supports_prompt_cache: true,
            supports_vision: false,
        },
    },
    // ── OpenAI reasoning models ───────────────────────────────────────────────
    FeatureEntry {
        pattern: "o1",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "o3",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "o4-mini",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "gpt-5",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    // ── OpenAI chat models ────────────────────────────────────────────────────
    FeatureEntry {
        pattern: "gpt-4o",
        features: FULL,
    },
    FeatureEntry {
        pattern: "gpt-4.1",
        features: FULL,
    },
    // ── Google ────────────────────────────────────────────────────────────────
    FeatureEntry {
        pattern: "gemini-2.5-pro",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "gemini-2.5-flash",
        features: ModelFeatures {
            supports_function_calling: true,
            supports_reasoning_effort: true,
            supports_extended_thinking: false,
            supports_prompt_cache: true,
            supports_vision: true,
        },
    },
    FeatureEntry {
        pattern: "gemini",
        features: FULL,
    },
    // ── Open-weight families (served without native tool calling) ─────────────
    FeatureEntry {
        pattern: "deepseek",
        features: ModelFeatures {
            supports_function_calling: false,
            supports_reasoning_effort: false,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: false,
        },
    },
    FeatureEntry {
        pattern: "qwen",
        features: ModelFeatures {
            supports_function_calling: false,
            supports_reasoning_effort: false,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: false,
        },
    },
    FeatureEntry {
        pattern: "llama",
        features: ModelFeatures {
            supports_function_calling: false,
            supports_reasoning_effort: false,
            supports_extended_thinking: false,
            supports_prompt_cache: false,
            supports_vision: false,
        },
    },
];

/// Strip routing prefixes: `litellm_proxy/anthropic/claude-x` → `claude-x`.
fn normalize(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

/// Look up the capability flags for a model name.
///
/// Unknown models default to [`ModelFeatures::default`] (all false), which
/// in particular routes them through prompt-mocked function calling.
pub fn get_features(model: &str) -> ModelFeatures {
    let name = normalize(model).to_ascii_lowercase();
    for entry in FEATURE_TABLE {
        if name.contains(entry.pattern) {
            return entry.features;
        }
    }
    ModelFeatures::default()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_sonnet_supports_thinking_and_cache() {
        let f = get_features("claude-sonnet-4-20250514");
        assert!(f.supports_function_calling);
        assert!(f.supports_extended_thinking);
        assert!(f.supports_prompt_cache);
    }

    #[test]
    fn provider_prefix_is_stripped() {
        let direct = get_features("claude-sonnet-4-20250514");
        let prefixed = get_features("litellm_proxy/anthropic/claude-sonnet-4-20250514");
        assert_eq!(direct, prefixed);
    }

    #[test]
    fn o3_uses_reasoning_effort() {
        let f = get_features("o3-2025-04-16");
        assert!(f.supports_reasoning_effort);
        assert!(!f.supports_extended_thinking);
    }

    #[test]
    fn unknown_model_has_no_native_function_calling() {
        let f = get_features("some-local-model");
        assert!(!f.supports_function_calling);
        assert!(!f.supports_vision);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let f = get_features("GPT-4o");
        assert!(f.supports_function_calling);
        assert!(f.supports_vision);
    }
}
