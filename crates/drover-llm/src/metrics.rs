// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Accumulated token usage for one conversation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub cache_read: u64,
    pub cache_write: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.cache_read += other.cache_read;
        self.cache_write += other.cache_write;
    }
}

/// Immutable point-in-time view of [`Metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub model_name: String,
    pub accumulated_cost: f64,
    pub accumulated_token_usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_budget: Option<f64>,
}

/// Running cost and token accounting for one conversation.
///
/// Owned by the conversation and shared with its `Llm` handle; both sides
/// go through the internal lock, so cost and token counts are monotonically
/// non-decreasing and never torn.
#[derive(Debug)]
pub struct Metrics {
    inner: Mutex<MetricsSnapshot>,
}

impl Metrics {
    pub fn new(model_name: impl Into<String>, max_budget: Option<f64>) -> Self {
        Self {
            inner: Mutex::new(MetricsSnapshot {
                model_name: model_name.into(),
                accumulated_cost: 0.0,
                accumulated_token_usage: TokenUsage::default(),
                max_budget,
            }),
        }
    }

    /// Record one completion's usage and cost.
    pub fn record(&self, usage: &TokenUsage, cost: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.accumulated_token_usage.add(usage);
        // Cost never decreases even if a provider misreports.
        if cost > 0.0 {
            inner.accumulated_cost += cost;
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Restore accounting from a persisted snapshot (conversation resume).
    pub fn restore(&self, snapshot: MetricsSnapshot) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *inner = snapshot;
    }

    pub fn accumulated_cost(&self) -> f64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accumulated_cost
    }

    pub fn max_budget(&self) -> Option<f64> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .max_budget
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
