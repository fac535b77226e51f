// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

/// Failures of the persistence layer (event log, state snapshots).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors that escape the conversation runtime.
///
/// Tool and LLM failures never surface here — they become error events /
/// observations and the run ends with `ExecutionStatus::Errored` instead.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// A `run()` is already in flight for this conversation.
    #[error("conversation is already running")]
    AlreadyRunning,
    /// An operation was issued in a state that cannot accept it, e.g.
    /// confirming when nothing is pending.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
