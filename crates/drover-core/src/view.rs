// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The LLM-facing projection of the event log.
//!
//! `View::from_events` is pure and deterministic: it applies condensation
//! (forgetting + summary substitution), drops condenser bookkeeping events,
//! and removes every unpaired half of a tool call so the model never sees a
//! dangling `tool_call_id`.  It is recomputed from scratch once per step.

use std::collections::HashSet;

use tracing::warn;
use uuid::Uuid;

use drover_llm::{Message, ToolCallItem};

use crate::event::{Event, EventKind, EventSource};

#[derive(Debug, Clone)]
pub struct View {
    /// Surviving events, in log order, with the synthetic summary (if any)
    /// already inserted.
    pub events: Vec<Event>,
    /// True when the last `CondensationRequest` in the log occurs after the
    /// last `Condensation` — i.e. the condenser has been asked to run and
    /// has not yet answered.
    pub unhandled_condensation_request: bool,
    condensations: Vec<Event>,
    summary_index: Option<usize>,
}

impl View {
    pub fn from_events(events: &[Event]) -> Self {
        let condensations: Vec<Event> = events
            .iter()
            .filter(|e| matches!(e.kind, EventKind::Condensation { .. }))
            .cloned()
            .collect();

        let forgotten: HashSet<Uuid> = condensations
            .iter()
            .flat_map(|c| match &c.kind {
                EventKind::Condensation {
                    forgotten_event_ids, ..
                } => forgotten_event_ids.clone(),
                _ => Vec::new(),
            })
            .collect();

        let last_request = events
            .iter()
            .rposition(|e| matches!(e.kind, EventKind::CondensationRequest));
        let last_condensation = events
            .iter()
            .rposition(|e| matches!(e.kind, EventKind::Condensation { .. }));
        let unhandled_condensation_request = match (last_request, last_condensation) {
            (Some(_), None) => true,
            (Some(r), Some(c)) => r > c,
            _ => false,
        };

        let mut surviving: Vec<Event> = events
            .iter()
            .filter(|e| {
                !matches!(
                    e.kind,
                    EventKind::Condensation { .. } | EventKind::CondensationRequest
                )
            })
            .filter(|e| !forgotten.contains(&e.id()))
            .cloned()
            .collect();

        filter_unmatched_tool_calls(&mut surviving);

        // The most recent condensation may substitute a summary for the
        // history it forgot.
        let mut summary_index = None;
        if let Some(EventKind::Condensation {
            summary: Some(summary),
            summary_offset: Some(offset),
            ..
        }) = condensations.last().map(|c| &c.kind)
        {
            let index = if *offset > surviving.len() {
                warn!(
                    offset,
                    surviving = surviving.len(),
                    "condensation summary offset is past the end of the surviving events; clamping"
                );
                surviving.len()
            } else {
                *offset
            };
            surviving.insert(
                index,
                Event::new(
                    EventSource::System,
                    EventKind::CondensationSummary {
                        summary: summary.clone(),
                    },
                ),
            );
            summary_index = Some(index);
        }

        Self {
            events: surviving,
            unhandled_condensation_request,
            condensations,
            summary_index,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Every condensation in the log, in order — the forgotten events stay
    /// in the store as an audit trail, and this is the index into them.
    pub fn condensations(&self) -> &[Event] {
        &self.condensations
    }

    pub fn most_recent_condensation(&self) -> Option<&Event> {
        self.condensations.last()
    }

    /// Index of the synthetic summary event in [`View::events`], if one was
    /// inserted.
    pub fn summary_event_index(&self) -> Option<usize> {
        self.summary_index
    }

    pub fn summary_event(&self) -> Option<&Event> {
        self.summary_index.and_then(|i| self.events.get(i))
    }

    /// Convert the surviving events into the message sequence presented to
    /// the LLM.  Consecutive actions from the same response collapse into a
    /// single assistant message carrying all the tool calls.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::new();
        let mut i = 0;
        while i < self.events.len() {
            match &self.events[i].kind {
                EventKind::SystemPrompt { text } => {
                    messages.push(Message::system(text.clone()));
                    i += 1;
                }
                EventKind::Message { message } => {
                    messages.push(message.clone());
                    i += 1;
                }
                EventKind::CondensationSummary { summary } => {
                    messages.push(Message::user(format!(
                        "Summary of the conversation so far (earlier events were condensed):\n{summary}"
                    )));
                    i += 1;
                }
                EventKind::Action { .. } => {
                    let (message, consumed) = collect_action_group(&self.events[i..]);
                    messages.push(message);
                    i += consumed;
                }
                EventKind::Observation {
                    tool_call_id,
                    content,
                    ..
                } => {
                    // Unmatched filtering guarantees the id is present.
                    if let Some(id) = tool_call_id {
                        messages.push(Message::tool_result(id.clone(), content.clone()));
                    }
                    i += 1;
                }
                // Runtime bookkeeping; not LLM-convertible.
                EventKind::Error { .. }
                | EventKind::Pause
                | EventKind::Finished
                | EventKind::Condensation { .. }
                | EventKind::CondensationRequest => {
                    i += 1;
                }
            }
        }
        messages
    }
}

/// Remove every `Action` without a matching `Observation` and vice versa.
/// Halves with a null `tool_call_id` can never match and are dropped too.
fn filter_unmatched_tool_calls(events: &mut Vec<Event>) {
    let action_ids: HashSet<String> = events
        .iter()
        .filter(|e| e.is_action())
        .filter_map(|e| e.tool_call_id().map(str::to_string))
        .collect();
    let observation_ids: HashSet<String> = events
        .iter()
        .filter(|e| e.is_observation())
        .filter_map(|e| e.tool_call_id().map(str::to_string))
        .collect();

    events.retain(|e| match &e.kind {
        EventKind::Action { tool_call_id, .. } => tool_call_id
            .as_deref()
            .map(|id| observation_ids.contains(id))
            .unwrap_or(false),
        EventKind::Observation { tool_call_id, .. } => tool_call_id
            .as_deref()
            .map(|id| action_ids.contains(id))
            .unwrap_or(false),
        _ => true,
    });
}

/// Build one assistant message from a run of consecutive `Action` events
/// sharing the same `llm_response_id`.  Returns the message and how many
/// events it consumed.
fn collect_action_group(events: &[Event]) -> (Message, usize) {
    let first_response_id = match &events[0].kind {
        EventKind::Action {
            llm_response_id, ..
        } => llm_response_id.clone(),
        _ => None,
    };

    let mut message = Message::assistant("");
    message.content.clear();
    let mut calls = Vec::new();
    let mut consumed = 0;

    for event in events {
        let EventKind::Action {
            tool_name,
            tool_call_id,
            arguments,
            thought,
            reasoning_text,
            llm_response_id,
        } = &event.kind
        else {
            break;
        };
        if consumed > 0 && *llm_response_id != first_response_id {
            break;
        }
        if consumed == 0 {
            if let Some(thought) = thought {
                message.content.push(drover_llm::ContentPart::text(thought.clone()));
            }
            message.reasoning_text = reasoning_text.clone();
        }
        calls.push(ToolCallItem {
            id: tool_call_id.clone().unwrap_or_default(),
            name: tool_name.clone(),
            arguments: arguments.to_string(),
        });
        consumed += 1;
    }

    message.tool_calls = Some(calls);
    (message, consumed)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use drover_llm::ContentPart;

    use crate::event::EventSource;

    use super::*;

    fn message_event(content: &str) -> Event {
        Event::user_message(Message::user(content))
    }

    fn action(id: Option<&str>) -> Event {
        Event::new(
            EventSource::Agent,
            EventKind::Action {
                tool_name: "echo".into(),
                tool_call_id: id.map(str::to_string),
                arguments: json!({"text": "hi"}),
                thought: None,
                reasoning_text: None,
                llm_response_id: Some("resp".into()),
            },
        )
    }

    fn observation(id: Option<&str>) -> Event {
        Event::new(
            EventSource::Environment,
            EventKind::Observation {
                tool_call_id: id.map(str::to_string),
                tool_name: "echo".into(),
                content: vec![ContentPart::text("hi")],
                is_error: false,
            },
        )
    }

    fn condensation(forgotten: Vec<Uuid>, summary: Option<&str>, offset: Option<usize>) -> Event {
        Event::new(
            EventSource::System,
            EventKind::Condensation {
                forgotten_event_ids: forgotten,
                summary: summary.map(str::to_string),
                summary_offset: offset,
            },
        )
    }

    #[test]
    fn preserves_uncondensed_lists() {
        let events: Vec<Event> = (0..5).map(|i| message_event(&format!("Event {i}"))).collect();
        let view = View::from_events(&events);
        assert_eq!(view.len(), 5);
        assert_eq!(view.events, events);
    }

    #[test]
    fn forgets_events_and_drops_condensations() {
        let messages: Vec<Event> = (0..5).map(|i| message_event(&format!("Event {i}"))).collect();
        let ids: Vec<Uuid> = messages.iter().map(Event::id).collect();
        let mut events = messages;
        events.push(condensation(ids, None, None));

        let view = View::from_events(&events);
        assert!(view.events.is_empty());
    }

    #[test]
    fn keeps_non_forgotten_events() {
        let messages: Vec<Event> = (0..5).map(|i| message_event(&format!("Event {i}"))).collect();
        for target in messages.iter().map(Event::id) {
            let mut events = messages.clone();
            events.push(condensation(vec![target], None, None));
            let view = View::from_events(&events);
            assert_eq!(view.len(), messages.len() - 1);
            assert!(view.events.iter().all(|e| e.id() != target));
        }
    }

    #[test]
    fn inserts_summary_at_each_offset() {
        let messages: Vec<Event> = (0..5).map(|i| message_event(&format!("Event {i}"))).collect();
        for offset in 0..5 {
            let mut events = messages.clone();
            events.push(condensation(vec![], Some("summary!"), Some(offset)));
            let view = View::from_events(&events);
            assert_eq!(view.len(), 6);
            assert_eq!(view.summary_event_index(), Some(offset));
            match &view.events[offset].kind {
                EventKind::CondensationSummary { summary } => assert_eq!(summary, "summary!"),
                other => panic!("expected summary at {offset}, got {other:?}"),
            }
        }
    }

    #[test]
    fn offset_past_end_clamps() {
        let mut events: Vec<Event> = (0..3).map(|i| message_event(&format!("Event {i}"))).collect();
        events.push(condensation(vec![], Some("S"), Some(10)));
        let view = View::from_events(&events);
        assert_eq!(view.summary_event_index(), Some(3));
        assert_eq!(view.len(), 4);
    }

    #[test]
    fn no_summary_when_condensation_has_none() {
        let mut events: Vec<Event> = (0..3).map(|i| message_event(&format!("Event {i}"))).collect();
        events.push(condensation(vec![], None, None));
        let view = View::from_events(&events);
        assert!(view.summary_event_index().is_none());
        assert!(view.summary_event().is_none());
    }

    #[test]
    fn only_most_recent_condensation_contributes_summary() {
        let mut events: Vec<Event> = (0..3).map(|i| message_event(&format!("Event {i}"))).collect();
        events.push(condensation(vec![], Some("old"), Some(0)));
        events.push(condensation(vec![], None, None));
        let view = View::from_events(&events);
        // The newest condensation has no summary, so none is shown.
        assert!(view.summary_event_index().is_none());
        assert_eq!(view.condensations().len(), 2);
    }

    #[test]
    fn condensation_requests_never_reach_the_view() {
        let events = vec![
            message_event("one"),
            Event::new(EventSource::System, EventKind::CondensationRequest),
            message_event("two"),
        ];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 2);
        assert!(view
            .events
            .iter()
            .all(|e| !matches!(e.kind, EventKind::CondensationRequest)));
    }

    #[test]
    fn unhandled_request_without_condensation() {
        let events = vec![
            message_event("one"),
            Event::new(EventSource::System, EventKind::CondensationRequest),
        ];
        assert!(View::from_events(&events).unhandled_condensation_request);
    }

    #[test]
    fn request_answered_by_later_condensation_is_handled() {
        let events = vec![
            message_event("one"),
            Event::new(EventSource::System, EventKind::CondensationRequest),
            condensation(vec![], None, None),
        ];
        assert!(!View::from_events(&events).unhandled_condensation_request);
    }

    #[test]
    fn request_after_condensation_is_unhandled_again() {
        let events = vec![
            condensation(vec![], None, None),
            Event::new(EventSource::System, EventKind::CondensationRequest),
        ];
        assert!(View::from_events(&events).unhandled_condensation_request);
    }

    #[test]
    fn matched_pairs_survive_filtering() {
        let events = vec![
            message_event("hi"),
            action(Some("a")),
            observation(Some("a")),
        ];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 3);
    }

    #[test]
    fn unmatched_action_is_dropped() {
        // [Msg, Action(a), Obs(a), Action(b), Msg] → Action(b) removed.
        let events = vec![
            message_event("start"),
            action(Some("a")),
            observation(Some("a")),
            action(Some("b")),
            message_event("end"),
        ];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 4);
        assert!(view
            .events
            .iter()
            .all(|e| e.tool_call_id() != Some("b")));
    }

    #[test]
    fn unmatched_observation_is_dropped() {
        let events = vec![
            message_event("start"),
            observation(Some("ghost")),
            message_event("end"),
        ];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn null_tool_call_ids_are_dropped() {
        let events = vec![message_event("m"), action(None), observation(None)];
        let view = View::from_events(&events);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn forgetting_one_half_drops_the_other() {
        let act = action(Some("a"));
        let obs = observation(Some("a"));
        let forgotten = vec![act.id()];
        let events = vec![
            message_event("m"),
            act,
            obs,
            condensation(forgotten, None, None),
        ];
        let view = View::from_events(&events);
        // The observation's action was forgotten, so the observation goes too.
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn condensation_round_trip_scenario() {
        // 10 messages; forget the first 5 with a summary at offset 0 →
        // view = [summary, events 5..9].
        let messages: Vec<Event> = (0..10).map(|i| message_event(&format!("Event {i}"))).collect();
        let forgotten: Vec<Uuid> = messages[..5].iter().map(Event::id).collect();
        let mut events = messages.clone();
        events.push(condensation(forgotten, Some("S"), Some(0)));

        let view = View::from_events(&events);
        assert_eq!(view.len(), 6);
        match &view.events[0].kind {
            EventKind::CondensationSummary { summary } => assert_eq!(summary, "S"),
            other => panic!("expected summary first, got {other:?}"),
        }
        for (i, event) in view.events[1..].iter().enumerate() {
            assert_eq!(event.id(), messages[5 + i].id());
        }
    }

    #[test]
    fn to_messages_groups_parallel_actions() {
        let mut a1 = action(Some("a"));
        let mut a2 = action(Some("b"));
        // Same response id → one assistant message with two calls.
        if let EventKind::Action { thought, .. } = &mut a1.kind {
            *thought = Some("running both".into());
        }
        if let EventKind::Action { tool_name, .. } = &mut a2.kind {
            *tool_name = "fetch".into();
        }
        let events = vec![
            message_event("go"),
            a1,
            a2,
            observation(Some("a")),
            observation(Some("b")),
        ];
        let view = View::from_events(&events);
        let messages = view.to_messages();
        // user, assistant(with 2 calls), 2 tool results
        assert_eq!(messages.len(), 4);
        let calls = messages[1].tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[1].name, "fetch");
        assert_eq!(messages[1].text(), "running both");
        assert_eq!(messages[2].tool_call_id.as_deref(), Some("a"));
    }

    #[test]
    fn projection_is_deterministic() {
        let mut events: Vec<Event> = (0..4).map(|i| message_event(&format!("Event {i}"))).collect();
        events.push(action(Some("a")));
        events.push(observation(Some("a")));
        events.push(condensation(vec![events[0].id()], Some("S"), Some(1)));
        let a = View::from_events(&events);
        let b = View::from_events(&events);
        assert_eq!(a.len(), b.len());
        assert_eq!(a.summary_event_index(), b.summary_event_index());
        assert_eq!(a.to_messages(), b.to_messages());
    }
}
