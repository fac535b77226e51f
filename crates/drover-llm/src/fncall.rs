// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt-mocked function calling.
//!
//! Models without native tool-call support get a description of the
//! available tools and an output grammar injected into the system prompt:
//!
//! ```text
//! <function=NAME>
//! <parameter=KEY>VALUE</parameter>
//! </function>
//! ```
//!
//! The assistant's free-form text is then parsed back into structured tool
//! calls.  Both directions live here so the transformation stays invisible
//! to gateway callers: the returned message shape is identical to the
//! native-tool-calling path.

use regex::Regex;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::types::{ToolCallItem, ToolSchema};

/// System-prompt suffix describing the available tools and the call grammar.
pub fn render_tools_prompt(tools: &[ToolSchema]) -> String {
    let mut out = String::from(
        "\n\nYou have access to the following tools. To call a tool, emit a \
         block using EXACTLY this format:\n\n\
         <function=example_tool>\n\
         <parameter=example_param>value</parameter>\n\
         </function>\n\n\
         Emit at most one block per parameter, and nothing else inside the \
         function block. Available tools:\n",
    );
    for t in tools {
        out.push_str(&format!(
            "\n---- BEGIN FUNCTION: {} ----\n{}\nParameters (JSON Schema):\n{}\n---- END FUNCTION ----\n",
            t.name,
            t.description,
            serde_json::to_string_pretty(&t.parameters).unwrap_or_else(|_| "{}".into()),
        ));
    }
    out
}

/// Render tool calls into the in-text grammar.
///
/// Used when re-serializing an assistant message that carried native tool
/// calls into a conversation driven through the prompt-mock path, so the
/// model sees its own prior calls in the grammar it is asked to produce.
pub fn render_tool_calls(calls: &[ToolCallItem]) -> String {
    let mut out = String::new();
    for call in calls {
        out.push_str(&format!("<function={}>\n", call.name));
        let args: Value = serde_json::from_str(&call.arguments).unwrap_or(Value::Null);
        if let Value::Object(map) = args {
            for (key, value) in map {
                let rendered = match value {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                out.push_str(&format!("<parameter={key}>{rendered}</parameter>\n"));
            }
        }
        out.push_str("</function>\n");
    }
    out
}

/// Parse function-call blocks out of assistant text.
///
/// Returns the text with all blocks removed, plus the parsed calls in order
/// of appearance.  Call ids are synthesized (the grammar has no id slot) and
/// unique per parse so tool-call matching works across steps.
pub fn parse_tool_calls(text: &str) -> (String, Vec<ToolCallItem>) {
    let block_re = Regex::new(r"(?s)<function=([^>\s]+)>(.*?)</function>").unwrap();
    let param_re = Regex::new(r"(?s)<parameter=([^>\s]+)>(.*?)</parameter>").unwrap();

    let mut calls = Vec::new();
    for captures in block_re.captures_iter(text) {
        let name = captures[1].to_string();
        let body = &captures[2];
        let mut args = Map::new();
        for p in param_re.captures_iter(body) {
            let key = p[1].to_string();
            args.insert(key, parse_value(p[2].trim()));
        }
        calls.push(ToolCallItem {
            id: format!("call_{}", Uuid::new_v4().simple()),
            name,
            arguments: Value::Object(args).to_string(),
        });
    }

    let cleaned = block_re.replace_all(text, "").trim().to_string();
    (cleaned, calls)
}

/// Interpret a raw parameter value.
///
/// JSON-looking values (objects, arrays, numbers, booleans, null) are parsed
/// as JSON; everything else stays a string.
fn parse_value(raw: &str) -> Value {
    let json_like = raw.starts_with(['{', '[', '-'])
        || raw.starts_with(|c: char| c.is_ascii_digit())
        || matches!(raw, "true" | "false" | "null");
    if json_like {
        if let Ok(v) = serde_json::from_str(raw) {
            return v;
        }
    }
    Value::String(raw.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(name: &str, args: Value) -> ToolCallItem {
        ToolCallItem {
            id: "call_test".into(),
            name: name.into(),
            arguments: args.to_string(),
        }
    }

    #[test]
    fn parse_single_call_with_string_param() {
        let text = "Let me look.\n<function=echo>\n<parameter=text>hi there</parameter>\n</function>";
        let (cleaned, calls) = parse_tool_calls(text);
        assert_eq!(cleaned, "Let me look.");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        let args: Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args, json!({"text": "hi there"}));
    }

    #[test]
    fn parse_multiple_calls_preserves_order() {
        let text = "<function=a>\n</function>\n<function=b>\n<parameter=n>3</parameter>\n</function>";
        let (_, calls) = parse_tool_calls(text);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
        let args: Value = serde_json::from_str(&calls[1].arguments).unwrap();
        assert_eq!(args, json!({"n": 3}));
    }

    #[test]
    fn parse_structured_values() {
        let text = "<function=t>\n<parameter=obj>{\"k\": [1, 2]}</parameter>\n<parameter=flag>true</parameter>\n</function>";
        let (_, calls) = parse_tool_calls(text);
        let args: Value = serde_json::from_str(&calls[0].arguments).unwrap();
        assert_eq!(args, json!({"obj": {"k": [1, 2]}, "flag": true}));
    }

    #[test]
    fn text_without_calls_is_untouched() {
        let (cleaned, calls) = parse_tool_calls("All done here.");
        assert_eq!(cleaned, "All done here.");
        assert!(calls.is_empty());
    }

    #[test]
    fn render_then_parse_round_trips() {
        let original = call(
            "run_query",
            json!({"sql": "select 1", "limit": 10, "dry_run": false}),
        );
        let rendered = render_tool_calls(std::slice::from_ref(&original));
        let (cleaned, parsed) = parse_tool_calls(&rendered);
        assert!(cleaned.is_empty());
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].name, original.name);
        let a: Value = serde_json::from_str(&parsed[0].arguments).unwrap();
        let b: Value = serde_json::from_str(&original.arguments).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn parsed_ids_are_unique() {
        let text = "<function=a></function><function=a></function>";
        let (_, calls) = parse_tool_calls(text);
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn tools_prompt_lists_every_tool() {
        let tools = vec![
            ToolSchema {
                name: "echo".into(),
                description: "Echo text back".into(),
                parameters: json!({"type": "object"}),
            },
            ToolSchema {
                name: "fetch".into(),
                description: "Fetch a URL".into(),
                parameters: json!({"type": "object"}),
            },
        ];
        let prompt = render_tools_prompt(&tools);
        assert!(prompt.contains("BEGIN FUNCTION: echo"));
        assert!(prompt.contains("BEGIN FUNCTION: fetch"));
        assert!(prompt.contains("<function=example_tool>"));
    }
}
