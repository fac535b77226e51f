// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Type conversions between MCP wire types and drover's tool types.
//!
//! These are pure, stateless functions — no allocation beyond what the
//! output types require.  The bridge sits at the seam between the
//! [`drover_tools`] crate and the MCP protocol so neither side needs to know
//! about the other.

use rmcp::model::{CallToolResult, RawContent, Tool as McpTool};

use drover_tools::{ToolAnnotations, ToolOutput, ToolOutputPart};

/// Convert an MCP [`CallToolResult`] into a [`ToolOutput`].
///
/// Text content becomes [`ToolOutputPart::Text`]; image content becomes a
/// [`ToolOutputPart::Image`] data URL.  Ordering is preserved.  Content
/// kinds drover cannot represent (embedded resources, audio) are skipped.
pub fn call_result_to_output(call_id: &str, result: CallToolResult) -> ToolOutput {
    let parts: Vec<ToolOutputPart> = result
        .content
        .into_iter()
        .filter_map(|content| match content.raw {
            RawContent::Text(t) => Some(ToolOutputPart::Text(t.text)),
            RawContent::Image(i) => Some(ToolOutputPart::Image(format!(
                "data:{};base64,{}",
                i.mime_type, i.data
            ))),
            _ => None,
        })
        .collect();

    let mut output = ToolOutput::with_parts(call_id, parts);
    output.is_error = result.is_error.unwrap_or(false);
    output
}

/// Extract drover annotations from an MCP tool descriptor.
///
/// MCP hints are optional; absent values fall back to the conservative
/// defaults (not read-only, destructive).
pub fn tool_annotations(tool: &McpTool) -> Option<ToolAnnotations> {
    tool.annotations.as_ref().map(|a| ToolAnnotations {
        read_only_hint: a.read_only_hint.unwrap_or(false),
        destructive_hint: a.destructive_hint.unwrap_or(true),
    })
}

/// The input schema of an MCP tool as a plain JSON value.
pub fn tool_input_schema(tool: &McpTool) -> serde_json::Value {
    serde_json::Value::Object(tool.input_schema.as_ref().clone())
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
