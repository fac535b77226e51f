// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Heuristic detection of a non-productive, repeating agent.
//!
//! Three signals, any of which trips the detector:
//! 1. the last K assistant messages are identical,
//! 2. the last K action/observation pairs are identical in
//!    `(tool_name, arguments, observation content)`,
//! 3. the agent alternates between exactly two states for at least 2K
//!    consecutive steps.

use drover_llm::ContentPart;

use crate::event::{Event, EventKind, EventSource};

pub struct StuckDetector {
    /// Repetition window; K in the heuristics above.
    pub window: usize,
}

impl Default for StuckDetector {
    fn default() -> Self {
        Self { window: 4 }
    }
}

impl StuckDetector {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn is_stuck(&self, events: &[Event]) -> bool {
        self.repeated_assistant_messages(events)
            || self.repeated_action_observation_pairs(events)
            || self.alternating_states(events)
    }

    fn repeated_assistant_messages(&self, events: &[Event]) -> bool {
        let texts: Vec<&str> = events
            .iter()
            .filter(|e| e.meta.source == EventSource::Agent)
            .filter_map(|e| match &e.kind {
                EventKind::Message { message } => Some(message),
                _ => None,
            })
            .map(|m| m.content.first())
            .map(|part| match part {
                Some(ContentPart::Text { text, .. }) => text.as_str(),
                _ => "",
            })
            .collect();
        all_equal_tail(&texts, self.window)
    }

    fn repeated_action_observation_pairs(&self, events: &[Event]) -> bool {
        let pairs: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Action {
                    tool_name,
                    tool_call_id: Some(id),
                    arguments,
                    ..
                } => {
                    // Pair with the observation answering this call.
                    let content = events.iter().find_map(|o| match &o.kind {
                        EventKind::Observation {
                            tool_call_id: Some(oid),
                            content,
                            ..
                        } if oid == id => Some(render_content(content)),
                        _ => None,
                    })?;
                    Some(format!("{tool_name}\u{1}{arguments}\u{1}{content}"))
                }
                _ => None,
            })
            .collect();
        let refs: Vec<&str> = pairs.iter().map(String::as_str).collect();
        all_equal_tail(&refs, self.window)
    }

    /// Two-state ping-pong: the last 2K step signatures alternate between
    /// exactly two distinct values.
    fn alternating_states(&self, events: &[Event]) -> bool {
        let signatures: Vec<String> = events
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::Message { message } if e.meta.source == EventSource::Agent => {
                    Some(format!("msg\u{1}{}", message.text()))
                }
                EventKind::Action {
                    tool_name,
                    arguments,
                    ..
                } => Some(format!("act\u{1}{tool_name}\u{1}{arguments}")),
                _ => None,
            })
            .collect();

        let needed = self.window * 2;
        if signatures.len() < needed {
            return false;
        }
        let tail = &signatures[signatures.len() - needed..];
        let a = &tail[0];
        let b = &tail[1];
        if a == b {
            // Not alternation — uniform repetition is heuristic 1 or 2.
            return false;
        }
        tail.iter()
            .enumerate()
            .all(|(i, s)| if i % 2 == 0 { s == a } else { s == b })
    }
}

fn render_content(content: &[ContentPart]) -> String {
    content
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// True when `items` has at least `window` entries and the last `window`
/// are all equal.
fn all_equal_tail<T: PartialEq>(items: &[T], window: usize) -> bool {
    if window == 0 || items.len() < window {
        return false;
    }
    let tail = &items[items.len() - window..];
    tail.windows(2).all(|w| w[0] == w[1])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use drover_llm::Message;

    use super::*;

    fn assistant(text: &str) -> Event {
        Event::agent_message(Message::assistant(text))
    }

    fn pair(id: &str, tool: &str, args: serde_json::Value, out: &str) -> Vec<Event> {
        vec![
            Event::new(
                EventSource::Agent,
                EventKind::Action {
                    tool_name: tool.into(),
                    tool_call_id: Some(id.into()),
                    arguments: args,
                    thought: None,
                    reasoning_text: None,
                    llm_response_id: None,
                },
            ),
            Event::new(
                EventSource::Environment,
                EventKind::Observation {
                    tool_call_id: Some(id.into()),
                    tool_name: tool.into(),
                    content: vec![ContentPart::text(out)],
                    is_error: false,
                },
            ),
        ]
    }

    #[test]
    fn four_identical_assistant_messages_are_stuck() {
        let detector = StuckDetector::default();
        let events: Vec<Event> = (0..4).map(|_| assistant("same thing")).collect();
        assert!(detector.is_stuck(&events));
    }

    #[test]
    fn three_identical_messages_are_not_stuck() {
        let detector = StuckDetector::default();
        let events: Vec<Event> = (0..3).map(|_| assistant("same thing")).collect();
        assert!(!detector.is_stuck(&events));
    }

    #[test]
    fn varied_messages_are_not_stuck() {
        let detector = StuckDetector::default();
        let events: Vec<Event> = (0..6).map(|i| assistant(&format!("msg {i}"))).collect();
        assert!(!detector.is_stuck(&events));
    }

    #[test]
    fn identical_action_observation_pairs_are_stuck() {
        let detector = StuckDetector::default();
        let mut events = Vec::new();
        for i in 0..4 {
            events.extend(pair(
                &format!("call_{i}"),
                "search",
                json!({"q": "same"}),
                "no results",
            ));
        }
        assert!(detector.is_stuck(&events));
    }

    #[test]
    fn pairs_with_different_output_are_not_stuck() {
        let detector = StuckDetector::default();
        let mut events = Vec::new();
        for i in 0..4 {
            events.extend(pair(
                &format!("call_{i}"),
                "search",
                json!({"q": "same"}),
                &format!("result {i}"),
            ));
        }
        assert!(!detector.is_stuck(&events));
    }

    #[test]
    fn fifth_identical_pair_trips_detection() {
        // Scenario: the model repeats the same call with identical output
        // five times; the detector (K=4) fires by the fifth check.
        let detector = StuckDetector::default();
        let mut events = Vec::new();
        for i in 0..5 {
            events.extend(pair(
                &format!("call_{i}"),
                "echo",
                json!({"text": "loop"}),
                "loop",
            ));
            let stuck = detector.is_stuck(&events);
            if i < 3 {
                assert!(!stuck, "tripped too early at pair {i}");
            } else {
                assert!(stuck, "failed to trip at pair {i}");
            }
        }
    }

    #[test]
    fn two_state_alternation_is_stuck() {
        let detector = StuckDetector::default();
        let mut events = Vec::new();
        for _ in 0..4 {
            events.push(assistant("plan A"));
            events.push(assistant("plan B"));
        }
        assert!(detector.is_stuck(&events));
    }

    #[test]
    fn three_state_rotation_is_not_alternation() {
        let detector = StuckDetector::default();
        let mut events = Vec::new();
        for _ in 0..4 {
            events.push(assistant("plan A"));
            events.push(assistant("plan B"));
            events.push(assistant("plan C"));
        }
        assert!(!detector.is_stuck(&events));
    }

    #[test]
    fn empty_log_is_not_stuck() {
        assert!(!StuckDetector::default().is_stuck(&[]));
    }
}
