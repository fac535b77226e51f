// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `drover-mcp` — remote tool executors over the Model Context Protocol.
//!
//! A [`McpToolSource`] connects to one tool server (spawned as a child
//! process, stdio transport), lists its tools, and hands back
//! [`drover_tools::ToolDefinition`]s whose executors forward calls over the
//! wire.  Results preserve content ordering, including image blocks.
//!
//! Typical wiring — registered as a tool factory at process start:
//!
//! ```ignore
//! let source = McpToolSource::connect(&config).await?;
//! let tools = source.tools().await?;
//! ```

mod bridge;
mod source;

pub use bridge::call_result_to_output;
pub use source::{McpServerConfig, McpToolSource};
