// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider-agnostic LLM gateway.
//!
//! One synchronous-shaped call — [`Llm::complete`] — over a pluggable
//! [`Transport`], with retry, token/cost accounting, provider normalization,
//! and transparent prompt-mocked function calling for models without native
//! tool support.

mod error;
mod features;
pub mod fncall;
mod gateway;
mod globals;
mod metrics;
pub mod mock;
mod registry;
mod retry;
mod transport;
mod types;

pub use error::{looks_like_context_window_error, LlmError};
pub use features::{get_features, ModelFeatures};
pub use gateway::Llm;
pub use metrics::{Metrics, MetricsSnapshot, TokenUsage};
pub use registry::LlmRegistry;
pub use retry::{RetryListener, RetryPolicy};
pub use transport::{AuthStyle, HttpTransport, Transport};
pub use types::{
    CompletionOptions, CompletionResponse, ContentPart, Message, Role, ToolCallItem, ToolSchema,
};
