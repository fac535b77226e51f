// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transport seam between the gateway and the provider HTTP API.
//!
//! The gateway builds provider request bodies and parses responses; the
//! transport only moves JSON.  Tests inject [`crate::mock::ScriptedTransport`]
//! here instead of a live endpoint.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{looks_like_context_window_error, LlmError};

/// How to send the API key in HTTP requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStyle {
    /// `Authorization: Bearer <key>` — standard for most providers.
    Bearer,
    /// `api-key: <key>` — Azure OpenAI style.
    ApiKeyHeader,
    /// No authentication header — local servers.
    None,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one chat-completion request body and return the raw response.
    async fn chat(&self, body: Value, headers: &[(String, String)]) -> Result<Value, LlmError>;
}

/// Reqwest-backed transport speaking the `/chat/completions` wire format.
pub struct HttpTransport {
    chat_url: String,
    api_key: Option<String>,
    auth_style: AuthStyle,
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(
        chat_url: impl Into<String>,
        api_key: Option<String>,
        auth_style: AuthStyle,
        timeout: Option<Duration>,
    ) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Self {
            chat_url: chat_url.into(),
            api_key,
            auth_style,
            // Client::builder().build() only fails on TLS backend
            // misconfiguration; fall back to the default client then.
            client: builder.build().unwrap_or_default(),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn chat(&self, body: Value, headers: &[(String, String)]) -> Result<Value, LlmError> {
        let mut req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = &self.api_key {
            req = match self.auth_style {
                AuthStyle::Bearer => req.bearer_auth(key),
                AuthStyle::ApiKeyHeader => req.header("api-key", key),
                AuthStyle::None => req,
            };
        }
        for (name, value) in headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Transient(format!("request timed out: {e}"))
            } else {
                LlmError::Transient(format!("network error: {e}"))
            }
        })?;

        let status = resp.status();
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let text = resp
            .text()
            .await
            .map_err(|e| LlmError::Transient(format!("reading response body: {e}")))?;

        if !status.is_success() {
            debug!(%status, body = %text, "provider returned error status");
            return Err(classify_http_error(status.as_u16(), &text, retry_after));
        }

        serde_json::from_str(&text)
            .map_err(|e| LlmError::Provider {
                detail: format!("malformed response body: {e}"),
                recoverable: false,
            })
    }
}

/// Map an HTTP error status to the gateway error taxonomy.
fn classify_http_error(status: u16, body: &str, retry_after: Option<u64>) -> LlmError {
    match status {
        401 | 403 => LlmError::Auth(body.to_string()),
        429 => LlmError::RateLimited {
            detail: body.to_string(),
            retry_after,
        },
        400 | 413 | 422 => {
            if looks_like_context_window_error(body) {
                LlmError::ContextWindowExceeded(body.to_string())
            } else {
                LlmError::BadRequest(body.to_string())
            }
        }
        500..=599 => LlmError::Transient(format!("HTTP {status}: {body}")),
        _ => LlmError::Provider {
            detail: format!("HTTP {status}: {body}"),
            recoverable: false,
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_auth() {
        assert!(matches!(
            classify_http_error(401, "invalid key", None),
            LlmError::Auth(_)
        ));
    }

    #[test]
    fn rate_limit_carries_retry_after() {
        match classify_http_error(429, "slow down", Some(12)) {
            LlmError::RateLimited { retry_after, .. } => assert_eq!(retry_after, Some(12)),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn bad_request_with_overflow_pattern_is_context_window() {
        let err = classify_http_error(
            400,
            "This model's maximum context length is 8192 tokens",
            None,
        );
        assert!(matches!(err, LlmError::ContextWindowExceeded(_)));
    }

    #[test]
    fn plain_bad_request_stays_bad_request() {
        assert!(matches!(
            classify_http_error(400, "missing field", None),
            LlmError::BadRequest(_)
        ));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_http_error(503, "overloaded", None).is_retriable());
        assert!(classify_http_error(500, "internal", None).is_retriable());
    }
}
