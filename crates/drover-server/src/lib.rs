// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! HTTP surface for drover conversations.
//!
//! Conversations are created, driven, and inspected over a small REST API;
//! each conversation runs in its own logical task against the shared tool
//! registry and LLM service registry.

mod error;
mod models;
mod routes;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;
use dashmap::DashMap;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::info;
use uuid::Uuid;

use drover_config::Config;
use drover_core::Conversation;
use drover_llm::{Llm, LlmRegistry};
use drover_tools::ToolRegistry;

pub use error::ApiError;
pub use models::*;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    llms: LlmRegistry,
    tools: Arc<ToolRegistry>,
    conversations: DashMap<Uuid, Arc<Conversation>>,
    secrets: DashMap<Uuid, HashMap<String, String>>,
    persist_root: Option<PathBuf>,
}

impl AppState {
    pub fn new(
        config: Config,
        llms: LlmRegistry,
        tools: Arc<ToolRegistry>,
        persist_root: Option<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                llms,
                tools,
                conversations: DashMap::new(),
                secrets: DashMap::new(),
                persist_root,
            }),
        }
    }

    /// Resolve an LLM service id to a conversation-private gateway.
    ///
    /// Registry entries are forked (fresh metrics, shared transport);
    /// otherwise the service is looked up in the configuration.
    pub fn resolve_llm(&self, service_id: &str) -> Option<Llm> {
        if let Some(llm) = self.inner.llms.get(service_id) {
            return Some(llm.fork());
        }
        if let Some(cfg) = self.inner.config.llms.get(service_id) {
            return Some(Llm::new(cfg.clone()));
        }
        let default = &self.inner.config.llm;
        (default.service_id == service_id && !default.model.is_empty())
            .then(|| Llm::new(default.clone()))
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.tools
    }

    pub fn persist_root(&self) -> Option<&std::path::Path> {
        self.inner.persist_root.as_deref()
    }

    pub fn conversations(&self) -> &DashMap<Uuid, Arc<Conversation>> {
        &self.inner.conversations
    }

    pub fn conversation(&self, id: &Uuid) -> Result<Arc<Conversation>, ApiError> {
        self.inner
            .conversations
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ApiError::NotFound)
    }

    pub fn insert_conversation(&self, id: Uuid, conversation: Arc<Conversation>) {
        self.inner.conversations.insert(id, conversation);
    }

    pub fn set_secrets(&self, id: Uuid, secrets: HashMap<String, String>) {
        self.inner
            .secrets
            .entry(id)
            .or_default()
            .extend(secrets);
    }

    pub fn secrets(&self, id: &Uuid) -> Option<HashMap<String, String>> {
        self.inner.secrets.get(id).map(|entry| entry.value().clone())
    }

    /// Close every conversation's executors.  Called at server shutdown.
    pub async fn close_all(&self) {
        for entry in self.inner.conversations.iter() {
            entry.value().close().await;
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/conversations",
            post(routes::create_conversation).get(routes::list_conversations),
        )
        .route("/conversations/:id/messages", post(routes::send_message))
        .route("/conversations/:id/run", post(routes::run_conversation))
        .route("/conversations/:id/confirm", post(routes::confirm))
        .route("/conversations/:id/pause", post(routes::pause))
        .route("/conversations/:id/events", get(routes::get_events))
        .route("/conversations/:id/secrets", put(routes::update_secrets))
        .route(
            "/conversations/:id/confirmation-policy",
            put(routes::set_confirmation_policy),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "agent server listening");
    axum::serve(listener, app).await?;
    state.close_all().await;
    Ok(())
}
