// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Built-in system prompt.

/// Default prompt used when the agent profile does not override it.
const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a capable autonomous agent. You are given a task by the user and a \
set of tools to accomplish it.

Work iteratively: inspect the situation with your tools, act, and read the \
results before deciding the next step. Call tools whenever they help; when a \
tool call fails, read the error and adjust rather than repeating the same \
call. When the task is complete, reply with a plain message summarizing the \
outcome and stop calling tools.";

/// Resolve the system prompt for a conversation.
pub fn system_prompt(custom: Option<&str>) -> String {
    match custom {
        Some(text) => text.to_string(),
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    }
}
