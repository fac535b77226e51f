// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use drover_config::AgentProfile;
use drover_llm::MetricsSnapshot;
use drover_tools::ToolDefinition;

use crate::error::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    WaitingForConfirmation,
    Paused,
    Finished,
    Errored,
}

/// Gate on human approval before tool calls execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationPolicy {
    /// Execute everything without asking.
    #[default]
    NeverConfirm,
    /// Every pending action suspends the run.
    AlwaysConfirm,
    /// Suspend only when a pending action's tool is risky (destructive or
    /// unannotated).
    ConfirmRisky,
}

impl ConfirmationPolicy {
    /// Whether the given pending tools require the run to suspend.  `None`
    /// entries are tools the registry does not know — treated as risky.
    pub fn requires_confirmation(&self, pending: &[Option<&ToolDefinition>]) -> bool {
        match self {
            ConfirmationPolicy::NeverConfirm => false,
            ConfirmationPolicy::AlwaysConfirm => !pending.is_empty(),
            ConfirmationPolicy::ConfirmRisky => pending
                .iter()
                .any(|def| def.map(|d| d.is_risky()).unwrap_or(true)),
        }
    }
}

/// The mutable record of one conversation.  Mutated only by the runtime,
/// under the conversation's own lock; everyone else sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: Uuid,
    pub agent: AgentProfile,
    pub workspace: PathBuf,
    pub confirmation_policy: ConfirmationPolicy,
    pub execution_status: ExecutionStatus,
    pub iteration_count: u32,
    pub metrics: MetricsSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    pub fn new(agent: AgentProfile, workspace: PathBuf, policy: ConfirmationPolicy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            agent,
            workspace,
            confirmation_policy: policy,
            execution_status: ExecutionStatus::Idle,
            iteration_count: 0,
            metrics: MetricsSnapshot::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Write the latest state snapshot to `<dir>/state.json`.
///
/// Secrets inside the agent profile serialize redacted; the write is
/// flushed and fsynced like an event append.
pub fn save_state(dir: &Path, state: &ConversationState) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir)?;
    let path = dir.join("state.json");
    let json = serde_json::to_string_pretty(state)?;
    let mut file = fs::File::create(&path)?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}

pub fn load_state(dir: &Path) -> Result<ConversationState, PersistenceError> {
    let path = dir.join("state.json");
    let json = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
