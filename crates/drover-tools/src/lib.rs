// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool definitions, executors, and the process-wide registry.
//!
//! This crate is deliberately independent from the model crate: it defines
//! its own call/output types, and the conversation runtime does the mapping
//! into LLM message shapes.

mod registry;
mod tool;
mod validate;

pub use registry::{ConversationInfo, ToolFactory, ToolRegistry, ToolRegistryError};
pub use tool::{ToolAnnotations, ToolCall, ToolDefinition, ToolExecutor, ToolOutput, ToolOutputPart};
pub use validate::validate_args;
