// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The conversation runtime: the outer loop that drives agent steps,
//! executes tool calls, gates on confirmation, enforces budgets, and
//! detects stuck agents.
//!
//! One conversation runs in one logical task.  `run()` is not reentrant —
//! a second concurrent call fails fast with `AlreadyRunning`.  Tool and LLM
//! failures never escape `run()`: they become error events and the
//! conversation ends in `Errored`.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, info, warn};

use drover_config::ConversationConfig;
use drover_llm::{ContentPart, LlmError, Message, Metrics};
use drover_tools::{ToolCall, ToolOutput, ToolOutputPart};

use crate::agent::Agent;
use crate::condenser::Condenser;
use crate::error::ConversationError;
use crate::event::{ErrorKind, Event, EventKind, EventSource};
use crate::state::{
    save_state, ConfirmationPolicy, ConversationState, ExecutionStatus,
};
use crate::store::EventStore;
use crate::stuck::StuckDetector;
use crate::view::View;

/// An action awaiting execution (or confirmation).
#[derive(Debug, Clone)]
struct PendingAction {
    tool_call_id: String,
    tool_name: String,
    arguments: Value,
}

pub struct Conversation {
    state: Mutex<ConversationState>,
    store: Arc<dyn EventStore>,
    agent: Agent,
    condenser: Box<dyn Condenser>,
    config: ConversationConfig,
    metrics: Arc<Metrics>,
    stuck: StuckDetector,
    /// Set from any thread; consumed at the next checkpoint.
    pause_requested: AtomicBool,
    /// Reentrancy guard for `run()`.
    run_active: AtomicBool,
    closed: AtomicBool,
    pending_confirmation: Mutex<Vec<PendingAction>>,
    /// Where `state.json` snapshots go; `None` disables persistence.
    state_dir: Option<PathBuf>,
}

/// Clears the run flag when `run()` unwinds for any reason.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Conversation {
    /// Build a conversation over an event store.  Emits the `SystemPrompt`
    /// event when the store is fresh; a restored store keeps its original.
    pub fn new(
        agent: Agent,
        store: Arc<dyn EventStore>,
        condenser: Box<dyn Condenser>,
        config: ConversationConfig,
        state: ConversationState,
    ) -> Result<Self, ConversationError> {
        let metrics = Arc::clone(agent.llm().metrics());
        if store.is_empty() {
            store.append(Event::system_prompt(agent.system_prompt()))?;
        }
        Ok(Self {
            state: Mutex::new(state),
            store,
            agent,
            condenser,
            config,
            metrics,
            stuck: StuckDetector::default(),
            pause_requested: AtomicBool::new(false),
            run_active: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            pending_confirmation: Mutex::new(Vec::new()),
            state_dir: None,
        })
    }

    /// Enable `state.json` snapshots under `dir`.
    pub fn with_state_dir(mut self, dir: PathBuf) -> Self {
        self.state_dir = Some(dir);
        self
    }

    pub fn id(&self) -> uuid::Uuid {
        self.lock_state().id
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Current state snapshot with fresh metrics.
    pub fn state(&self) -> ConversationState {
        let mut state = self.lock_state().clone();
        state.metrics = self.metrics.snapshot();
        state.metrics.max_budget = self.config.max_budget;
        state
    }

    pub fn set_confirmation_policy(&self, policy: ConfirmationPolicy) {
        let mut state = self.lock_state();
        state.confirmation_policy = policy;
        state.touch();
        self.persist(&state);
    }

    /// Append a user message to the log.  Allowed in any state; the next
    /// `run()` picks it up.
    pub fn send_message(&self, message: Message) -> Result<(), ConversationError> {
        self.append(Event::user_message(message))?;
        let mut state = self.lock_state();
        if state.execution_status == ExecutionStatus::Finished {
            // A new message reopens a finished conversation.
            state.execution_status = ExecutionStatus::Idle;
        }
        state.touch();
        self.persist(&state);
        Ok(())
    }

    /// Request a pause.  Honored at the next checkpoint; an idle
    /// conversation pauses immediately.  Never interrupts an in-flight
    /// executor or LLM call.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
        if !self.run_active.load(Ordering::SeqCst)
            && self.pause_requested.swap(false, Ordering::SeqCst)
        {
            if let Err(e) = self.append(Event::new(EventSource::User, EventKind::Pause)) {
                warn!(error = %e, "failed to append pause event");
            }
            self.set_status(ExecutionStatus::Paused);
        }
    }

    /// Answer a pending confirmation.
    ///
    /// Accepting executes the suspended actions; rejecting converts each
    /// into an error observation carrying the reason.  Either way the
    /// conversation returns to `Running` and the next `run()` continues.
    pub async fn respond_to_confirmation(
        &self,
        accept: bool,
        reason: &str,
    ) -> Result<(), ConversationError> {
        let pending = {
            let mut guard = self
                .pending_confirmation
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if pending.is_empty() {
            return Err(ConversationError::InvalidState(
                "no actions are waiting for confirmation".into(),
            ));
        }

        if accept {
            info!(actions = pending.len(), "confirmation accepted");
            self.set_status(ExecutionStatus::Running);
            self.execute_actions(pending).await?;
        } else {
            info!(actions = pending.len(), reason, "confirmation rejected");
            for action in pending {
                self.append(Event::new(
                    EventSource::User,
                    EventKind::Observation {
                        tool_call_id: Some(action.tool_call_id),
                        tool_name: action.tool_name,
                        content: vec![ContentPart::text(format!("User rejected: {reason}"))],
                        is_error: true,
                    },
                ))?;
            }
            self.set_status(ExecutionStatus::Running);
        }
        Ok(())
    }

    /// Drive the conversation until the next suspension point: finished,
    /// errored, paused, or waiting for confirmation.
    pub async fn run(&self) -> Result<(), ConversationError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ConversationError::InvalidState(
                "conversation is closed".into(),
            ));
        }
        if self.run_active.swap(true, Ordering::SeqCst) {
            return Err(ConversationError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.run_active);

        if !self.pending_confirmation_is_empty() {
            // Still waiting on the user; nothing to drive.
            return Ok(());
        }

        self.set_status(ExecutionStatus::Running);
        self.run_loop().await
    }

    async fn run_loop(&self) -> Result<(), ConversationError> {
        loop {
            // Checkpoint: pause requests are honored between steps.
            if self.pause_requested.swap(false, Ordering::SeqCst) {
                self.append(Event::new(EventSource::User, EventKind::Pause))?;
                self.set_status(ExecutionStatus::Paused);
                return Ok(());
            }

            // Stuck check runs against everything appended so far, before
            // asking the model to dig the hole deeper.
            if self.config.stuck_detection && self.stuck.is_stuck(&self.store.all()) {
                self.terminal(ErrorKind::Stuck, "agent is repeating itself non-productively")?;
                return Ok(());
            }

            if let Some(budget) = self.config.max_budget {
                if self.metrics.accumulated_cost() >= budget {
                    self.terminal(
                        ErrorKind::BudgetExceeded,
                        format!("accumulated cost reached the budget of ${budget}"),
                    )?;
                    return Ok(());
                }
            }

            let iteration = self.lock_state().iteration_count;
            if iteration >= self.config.max_iterations {
                self.terminal(
                    ErrorKind::IterationLimitExceeded,
                    format!("exceeded {} iterations", self.config.max_iterations),
                )?;
                return Ok(());
            }

            let events = self.store.all();
            let view = View::from_events(&events);

            if self.condenser.should_condense(&view, self.agent.llm()) {
                match self.condenser.condense(&view, self.agent.llm()).await {
                    Ok(kind) => {
                        debug!("appending condensation");
                        self.append(Event::new(EventSource::System, kind))?;
                        self.bump_iteration();
                        continue;
                    }
                    Err(e) => {
                        // Degraded but not fatal: proceed uncondensed and let
                        // the step surface any hard context failure.
                        warn!(error = %e, "condensation failed; continuing without it");
                    }
                }
            }

            let step_events = match self.agent.step(&view).await {
                Ok(events) => events,
                Err(LlmError::ContextWindowExceeded(detail)) => {
                    if view.unhandled_condensation_request {
                        // Condensation was already requested and didn't help.
                        self.terminal(ErrorKind::ContextWindowExceeded, detail)?;
                        return Ok(());
                    }
                    debug!("context window exceeded; requesting condensation");
                    self.append(Event::new(
                        EventSource::System,
                        EventKind::CondensationRequest,
                    ))?;
                    self.bump_iteration();
                    continue;
                }
                Err(e) => {
                    self.terminal(ErrorKind::Provider, e.to_string())?;
                    return Ok(());
                }
            };

            for event in &step_events {
                self.append(event.clone())?;
            }

            let pending = pending_actions(&step_events);

            if !pending.is_empty() {
                let defs: Vec<_> = pending
                    .iter()
                    .map(|p| self.agent.tools().get(&p.tool_name))
                    .collect();
                let policy = self.lock_state().confirmation_policy;
                if policy.requires_confirmation(&defs) {
                    info!(actions = pending.len(), "suspending for confirmation");
                    *self
                        .pending_confirmation
                        .lock()
                        .unwrap_or_else(|e| e.into_inner()) = pending;
                    self.set_status(ExecutionStatus::WaitingForConfirmation);
                    return Ok(());
                }
            }

            let had_actions = !pending.is_empty();
            self.execute_actions(pending).await?;

            if !had_actions {
                let finished = matches!(
                    step_events.last(),
                    Some(Event {
                        kind: EventKind::Message { .. },
                        meta,
                        ..
                    }) if meta.source == EventSource::Agent
                );
                if finished {
                    info!("agent finished");
                    self.set_status(ExecutionStatus::Finished);
                    return Ok(());
                }
            }

            self.bump_iteration();
        }
    }

    /// Execute actions in order, appending one observation per action.
    /// A pause request stops execution before the next tool; already
    /// executed actions keep their observations, unexecuted ones stay
    /// unmatched and are dropped by the view.
    async fn execute_actions(&self, pending: Vec<PendingAction>) -> Result<(), ConversationError> {
        for action in pending {
            if self.pause_requested.load(Ordering::SeqCst) {
                debug!("pause requested; deferring remaining actions");
                break;
            }
            let call = ToolCall {
                id: action.tool_call_id.clone(),
                name: action.tool_name.clone(),
                args: action.arguments.clone(),
            };
            let output = match self.agent.tools().get(&action.tool_name) {
                Some(def) => def.executor.call(&call).await,
                None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
            };
            let content: Vec<ContentPart> = output
                .parts
                .iter()
                .map(|p| match p {
                    ToolOutputPart::Text(t) => ContentPart::text(t.clone()),
                    ToolOutputPart::Image(url) => ContentPart::image(vec![url.clone()]),
                })
                .collect();
            self.append(Event::new(
                EventSource::Environment,
                EventKind::Observation {
                    tool_call_id: Some(action.tool_call_id),
                    tool_name: action.tool_name,
                    content,
                    is_error: output.is_error,
                },
            ))?;
        }
        Ok(())
    }

    /// Close every tool executor.  Idempotent — the second call is a no-op,
    /// so executors are never double-closed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        for def in self.agent.tools().values() {
            def.executor.close().await;
        }
        debug!("conversation closed");
    }

    // ── internals ────────────────────────────────────────────────────────────

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn pending_confirmation_is_empty(&self) -> bool {
        self.pending_confirmation
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    fn append(&self, event: Event) -> Result<(), ConversationError> {
        self.store.append(event)?;
        Ok(())
    }

    fn set_status(&self, status: ExecutionStatus) {
        let mut state = self.lock_state();
        state.execution_status = status;
        state.metrics = self.metrics.snapshot();
        state.metrics.max_budget = self.config.max_budget;
        state.touch();
        self.persist(&state);
    }

    fn bump_iteration(&self) {
        let mut state = self.lock_state();
        state.iteration_count += 1;
        state.metrics = self.metrics.snapshot();
        state.metrics.max_budget = self.config.max_budget;
        state.touch();
        self.persist(&state);
    }

    /// Append a terminal error event and mark the conversation errored.
    fn terminal(&self, kind: ErrorKind, detail: impl Into<String>) -> Result<(), ConversationError> {
        let detail = detail.into();
        warn!(?kind, detail, "conversation terminating");
        self.append(Event::error(kind, detail))?;
        self.set_status(ExecutionStatus::Errored);
        Ok(())
    }

    fn persist(&self, state: &ConversationState) {
        if let Some(dir) = &self.state_dir {
            if let Err(e) = save_state(dir, state) {
                warn!(error = %e, "failed to persist conversation state");
            }
        }
    }
}

/// Actions in `step_events` with no matching observation in the same batch
/// (argument-validation failures arrive pre-paired and are not pending).
fn pending_actions(step_events: &[Event]) -> Vec<PendingAction> {
    let resolved: HashSet<&str> = step_events
        .iter()
        .filter(|e| e.is_observation())
        .filter_map(Event::tool_call_id)
        .collect();

    step_events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::Action {
                tool_name,
                tool_call_id: Some(id),
                arguments,
                ..
            } if !resolved.contains(id.as_str()) => Some(PendingAction {
                tool_call_id: id.clone(),
                tool_name: tool_name.clone(),
                arguments: arguments.clone(),
            }),
            _ => None,
        })
        .collect()
}
