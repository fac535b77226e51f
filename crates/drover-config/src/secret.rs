// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize, Serializer};

/// Placeholder written in place of every secret value on serialization.
pub const REDACTED: &str = "****";

/// A string that never leaves the process in clear text.
///
/// Serializes as `"****"` regardless of content, so API keys and AWS
/// credentials can be embedded in persisted conversation state without
/// leaking.  The real value is re-injected from the runtime-provided config
/// when a conversation is loaded (see [`crate::LlmConfig::reconcile_persisted`]).
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying clear-text value.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// True when this value is the redaction placeholder, i.e. it was read
    /// back from a serialized form and carries no usable secret.
    pub fn is_redacted(&self) -> bool {
        self.0 == REDACTED
    }
}

impl Serialize for SecretString {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretString({REDACTED})")
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
