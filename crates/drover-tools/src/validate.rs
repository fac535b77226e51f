// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-argument validation at the boundary.
//!
//! Arguments must parse as the JSON described by the tool's input schema
//! before the executor runs.  Failures are surfaced to the model as error
//! observations, so the messages are written for an LLM reader: every
//! violation on one line, joined with `;`.

use serde_json::Value;

/// Validate `args` against a JSON Schema.
///
/// An uncompilable schema passes validation — a tool author's broken schema
/// must not brick the tool (the same lenient stance the registry takes on
/// unknown annotation fields).
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Ok(validator) = jsonschema::validator_for(schema) else {
        return Ok(());
    };

    let errors: Vec<String> = validator.iter_errors(args).map(|e| e.to_string()).collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(format!(
            "arguments failed to validate: {}",
            errors.join("; ")
        ))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
