// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Service registry: named `Llm` handles shared across a process.
//!
//! Agents and condensers reference models by `service_id` rather than by
//! constructing their own gateway, so one conversation can mix a main model
//! with a cheaper summarization model while both stay centrally configured.
//! The registry is an explicit object passed to whoever needs it — there is
//! no process-wide singleton.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::gateway::Llm;

#[derive(Default, Clone)]
pub struct LlmRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<Llm>>>>,
}

impl LlmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `llm` under its service id, replacing any previous entry
    /// with the same id.
    pub fn register(&self, llm: Arc<Llm>) {
        let id = llm.service_id().to_string();
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, llm);
    }

    pub fn get(&self, service_id: &str) -> Option<Arc<Llm>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(service_id)
            .cloned()
    }

    pub fn service_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use drover_config::LlmConfig;

    use crate::mock::ScriptedTransport;

    use super::*;

    fn llm(service_id: &str, model: &str) -> Arc<Llm> {
        let config = LlmConfig {
            model: model.into(),
            service_id: service_id.into(),
            ..Default::default()
        };
        Arc::new(Llm::with_transport(
            config,
            Arc::new(ScriptedTransport::always_text("ok")),
        ))
    }

    #[test]
    fn register_and_get() {
        let reg = LlmRegistry::new();
        reg.register(llm("main", "gpt-4o"));
        assert!(reg.get("main").is_some());
        assert!(reg.get("other").is_none());
    }

    #[test]
    fn reregistration_replaces() {
        let reg = LlmRegistry::new();
        reg.register(llm("main", "gpt-4o"));
        reg.register(llm("main", "gpt-4o-mini"));
        assert_eq!(reg.get("main").unwrap().model_name(), "gpt-4o-mini");
        assert_eq!(reg.service_ids(), vec!["main"]);
    }

    #[test]
    fn service_ids_are_sorted() {
        let reg = LlmRegistry::new();
        reg.register(llm("b", "m1"));
        reg.register(llm("a", "m2"));
        assert_eq!(reg.service_ids(), vec!["a", "b"]);
    }
}
