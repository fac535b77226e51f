// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use tracing::info;
use uuid::Uuid;

use drover_core::{
    Agent, Conversation, ConversationState, ErrorKind, EventKind, EventStore, ExecutionStatus,
    FileEventStore, LlmSummarizingCondenser, MemoryEventStore,
};
use drover_tools::ConversationInfo;

use crate::error::ApiError;
use crate::models::{
    ConfirmationResponseRequest, ConversationPage, ConversationQuery, ConversationResponse,
    ConversationSortOrder, EventPage, EventQuery, EventSortOrder, SendMessageRequest,
    SetConfirmationPolicyRequest, StartConversationRequest, Success, UpdateSecretsRequest,
};
use crate::AppState;

const CONVERSATION_PAGE_SIZE: usize = 20;
const DEFAULT_EVENT_PAGE_SIZE: usize = 100;

pub async fn create_conversation(
    State(state): State<AppState>,
    Json(req): Json<StartConversationRequest>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let llm = state
        .resolve_llm(&req.agent.llm_service)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("unknown llm service '{}'", req.agent.llm_service))
        })?;

    let conversation_state = ConversationState::new(
        req.agent.clone(),
        req.workspace.clone(),
        req.confirmation_policy,
    );
    let id = conversation_state.id;

    let info = ConversationInfo {
        conversation_id: id.to_string(),
        workspace: req.workspace.clone(),
    };
    let tools = state
        .tools()
        .resolve(&req.agent.tools, &info)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let agent = Agent::new(Arc::new(llm), tools, req.agent.system_prompt.as_deref());

    let store: Arc<dyn EventStore> = match state.persist_root() {
        Some(root) => Arc::new(
            FileEventStore::open(root, &id.to_string())
                .map_err(|e| ApiError::Internal(e.to_string()))?,
        ),
        None => Arc::new(MemoryEventStore::new()),
    };

    let config = drover_config::ConversationConfig {
        max_iterations: req.max_iterations,
        stuck_detection: req.stuck_detection,
        max_budget: req.max_budget,
    };

    let mut conversation = Conversation::new(
        agent,
        store,
        Box::new(LlmSummarizingCondenser::default()),
        config,
        conversation_state,
    )?;
    if let Some(root) = state.persist_root() {
        conversation =
            conversation.with_state_dir(FileEventStore::conversation_dir(root, &id.to_string()));
    }

    if let Some(message) = req.initial_message {
        conversation.send_message(message.into_message())?;
    }

    let conversation = Arc::new(conversation);
    let status = conversation.state().execution_status;
    state.insert_conversation(id, conversation);
    info!(%id, "conversation created");

    Ok(Json(ConversationResponse {
        conversation_id: id,
        state: status,
    }))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Json<ConversationPage> {
    let mut items: Vec<ConversationState> = state
        .conversations()
        .iter()
        .map(|entry| entry.value().state())
        .collect();

    match query.sort.unwrap_or_default() {
        ConversationSortOrder::CreatedAt => items.sort_by_key(|s| s.created_at),
        ConversationSortOrder::CreatedAtDesc => {
            items.sort_by_key(|s| std::cmp::Reverse(s.created_at))
        }
        ConversationSortOrder::UpdatedAt => items.sort_by_key(|s| s.updated_at),
        ConversationSortOrder::UpdatedAtDesc => {
            items.sort_by_key(|s| std::cmp::Reverse(s.updated_at))
        }
    }

    let page = query.page.unwrap_or(0);
    let start = (page * CONVERSATION_PAGE_SIZE).min(items.len());
    let end = (start + CONVERSATION_PAGE_SIZE).min(items.len());
    let next_page_id = (end < items.len()).then(|| (page + 1).to_string());

    Json(ConversationPage {
        items: items[start..end].to_vec(),
        next_page_id,
    })
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Success>, ApiError> {
    let conversation = state.conversation(&id)?;
    conversation.send_message(req.into_message())?;
    Ok(Json(Success::default()))
}

pub async fn run_conversation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let conversation = state.conversation(&id)?;
    conversation.run().await?;

    let status = conversation.state().execution_status;
    if status == ExecutionStatus::Errored {
        // Provider failures surface as 502; other terminal errors (budget,
        // iterations, stuck) are conversation outcomes, not HTTP failures.
        if let Some(detail) = last_provider_error(conversation.as_ref()) {
            return Err(ApiError::Provider(detail));
        }
    }
    Ok(Json(ConversationResponse {
        conversation_id: id,
        state: status,
    }))
}

fn last_provider_error(conversation: &Conversation) -> Option<String> {
    let last_error = conversation
        .store()
        .all()
        .iter()
        .rev()
        .find_map(|e| match &e.kind {
            EventKind::Error { error_kind, detail } => Some((*error_kind, detail.clone())),
            _ => None,
        });
    last_error.and_then(|(kind, detail)| (kind == ErrorKind::Provider).then_some(detail))
}

pub async fn confirm(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ConfirmationResponseRequest>,
) -> Result<Json<Success>, ApiError> {
    let conversation = state.conversation(&id)?;
    conversation
        .respond_to_confirmation(req.accept, &req.reason)
        .await?;
    Ok(Json(Success::default()))
}

pub async fn pause(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Success>, ApiError> {
    let conversation = state.conversation(&id)?;
    conversation.pause();
    Ok(Json(Success::default()))
}

pub async fn get_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<EventQuery>,
) -> Result<Json<EventPage>, ApiError> {
    let conversation = state.conversation(&id)?;
    let mut events = conversation.store().all();
    if query.order.unwrap_or_default() == EventSortOrder::TimestampDesc {
        events.reverse();
    }

    let from = query.from.unwrap_or(0).min(events.len());
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_PAGE_SIZE).max(1);
    let end = (from + limit).min(events.len());
    let next_page_id = (end < events.len()).then(|| end.to_string());

    Ok(Json(EventPage {
        items: events[from..end].to_vec(),
        next_page_id,
    }))
}

pub async fn update_secrets(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateSecretsRequest>,
) -> Result<Json<Success>, ApiError> {
    // Validate the conversation exists before accepting secrets for it.
    state.conversation(&id)?;
    state.set_secrets(id, req.secrets);
    Ok(Json(Success::default()))
}

pub async fn set_confirmation_policy(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetConfirmationPolicyRequest>,
) -> Result<Json<Success>, ApiError> {
    let conversation = state.conversation(&id)?;
    conversation.set_confirmation_policy(req.policy);
    Ok(Json(Success::default()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
