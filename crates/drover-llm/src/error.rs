use thiserror::Error;

/// Message fragments that identify a context-window overflow when the
/// provider does not return a typed error.  Matched case-insensitively.
static CONTEXT_WINDOW_PATTERNS: &[&str] = &[
    "context window",
    "context length",
    "context_length_exceeded",
    "maximum context length",
    "prompt is too long",
    "input is too long",
    "exceed context",
    "please reduce the length",
    "too many tokens",
];

/// Return true when an error message matches a known context-overflow pattern.
pub fn looks_like_context_window_error(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONTEXT_WINDOW_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Error taxonomy of the LLM gateway.
///
/// The retry loop consults [`LlmError::is_retriable`]; everything else
/// surfaces to the caller on the first occurrence.
#[derive(Debug, Error)]
pub enum LlmError {
    /// The caller requested an option the gateway does not implement
    /// (currently only streaming).
    #[error("unsupported option: {0}")]
    UnsupportedOption(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request exceeded the model's context window, identified either by
    /// provider error type or by message pattern.
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),

    /// Transient transport failure: network error, timeout, 5xx.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// HTTP 429.  `retry_after` carries a parsed `Retry-After` header value
    /// in seconds when the provider sent one.
    #[error("rate limited: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<u64>,
    },

    /// The provider returned a well-formed response with zero choices.
    #[error("provider returned no choices")]
    NoResponse,

    /// Any other provider-reported failure.
    #[error("provider error: {detail}")]
    Provider { detail: String, recoverable: bool },
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::Transient(_) | LlmError::RateLimited { .. } | LlmError::NoResponse => true,
            LlmError::Provider { recoverable, .. } => *recoverable,
            LlmError::UnsupportedOption(_)
            | LlmError::Auth(_)
            | LlmError::BadRequest(_)
            | LlmError::ContextWindowExceeded(_) => false,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
