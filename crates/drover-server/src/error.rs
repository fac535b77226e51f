// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use drover_core::ConversationError;

/// HTTP-facing error type.
///
/// User errors map to 4xx, a concurrent run to 409, schema violations to
/// 422, provider failures to 502, everything else to 500.
#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    AlreadyRunning,
    Validation(String),
    Provider(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "conversation not found".to_string()),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::AlreadyRunning => (
                StatusCode::CONFLICT,
                "conversation is already running".to_string(),
            ),
            ApiError::Validation(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Provider(m) => (StatusCode::BAD_GATEWAY, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ConversationError> for ApiError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::AlreadyRunning => ApiError::AlreadyRunning,
            ConversationError::InvalidState(m) => ApiError::BadRequest(m),
            ConversationError::Persistence(e) => ApiError::Internal(e.to_string()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
