// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Append-only event log, totally ordered per conversation.
//!
//! Two backends: in-memory (default) and one-ndjson-file-per-conversation.
//! Subscribers receive every appended event in order over unbounded
//! channels, so delivery never blocks the runtime loop.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use crate::error::PersistenceError;
use crate::event::Event;

pub trait EventStore: Send + Sync {
    /// Append an event and return its sequence number.
    fn append(&self, event: Event) -> Result<u64, PersistenceError>;

    /// Events in `[from, to)` by sequence number, clamped to the log.
    fn range(&self, from: usize, to: usize) -> Vec<Event>;

    fn all(&self) -> Vec<Event>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a subscriber.  Each appended event is delivered in append
    /// order; a closed receiver unsubscribes implicitly.
    fn subscribe(&self, sender: UnboundedSender<Event>);
}

/// Fan an event out to subscribers, dropping closed channels.
fn notify(subscribers: &Mutex<Vec<UnboundedSender<Event>>>, event: &Event) {
    let mut subs = subscribers.lock().unwrap_or_else(|e| e.into_inner());
    subs.retain(|tx| tx.send(event.clone()).is_ok());
}

// ─── In-memory backend ────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<Vec<Event>>,
    subscribers: Mutex<Vec<UnboundedSender<Event>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: Event) -> Result<u64, PersistenceError> {
        let seq = {
            let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
            events.push(event.clone());
            (events.len() - 1) as u64
        };
        notify(&self.subscribers, &event);
        Ok(seq)
    }

    fn range(&self, from: usize, to: usize) -> Vec<Event> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let to = to.min(events.len());
        let from = from.min(to);
        events[from..to].to_vec()
    }

    fn all(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn subscribe(&self, sender: UnboundedSender<Event>) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender);
    }
}

// ─── File backend ─────────────────────────────────────────────────────────────

/// Durable store: `<root>/.conversations/<id>/events.ndjson`, one
/// JSON-serialized event per line.  Each append is written, flushed, and
/// fsynced before the sequence number is returned, so a crash can lose at
/// most the event being written.
pub struct FileEventStore {
    dir: PathBuf,
    file: Mutex<File>,
    /// In-memory mirror of the log; reads never touch the disk.
    events: RwLock<Vec<Event>>,
    subscribers: Mutex<Vec<UnboundedSender<Event>>>,
}

impl FileEventStore {
    /// Directory holding one conversation's persisted files.
    pub fn conversation_dir(root: &Path, conversation_id: &str) -> PathBuf {
        root.join(".conversations").join(conversation_id)
    }

    /// Open (or create) the log for `conversation_id` under `root`,
    /// restoring any previously persisted events.
    pub fn open(root: &Path, conversation_id: &str) -> Result<Self, PersistenceError> {
        let dir = Self::conversation_dir(root, conversation_id);
        fs::create_dir_all(&dir)?;
        let path = dir.join("events.ndjson");

        let mut events = Vec::new();
        if path.is_file() {
            let reader = BufReader::new(File::open(&path)?);
            for (lineno, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Event>(&line) {
                    Ok(event) => events.push(event),
                    // A torn final line from a crash mid-append is expected;
                    // anything else in the middle of the log is corruption
                    // worth surfacing loudly.
                    Err(e) => {
                        warn!(
                            path = %path.display(),
                            lineno = lineno + 1,
                            error = %e,
                            "skipping unreadable event log line"
                        );
                    }
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            dir,
            file: Mutex::new(file),
            events: RwLock::new(events),
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EventStore for FileEventStore {
    fn append(&self, event: Event) -> Result<u64, PersistenceError> {
        let line = serde_json::to_string(&event)?;
        {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
            file.sync_all()?;
        }
        let seq = {
            let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
            events.push(event.clone());
            (events.len() - 1) as u64
        };
        notify(&self.subscribers, &event);
        Ok(seq)
    }

    fn range(&self, from: usize, to: usize) -> Vec<Event> {
        let events = self.events.read().unwrap_or_else(|e| e.into_inner());
        let to = to.min(events.len());
        let from = from.min(to);
        events[from..to].to_vec()
    }

    fn all(&self) -> Vec<Event> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn len(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn subscribe(&self, sender: UnboundedSender<Event>) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sender);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use drover_llm::Message;

    use crate::event::{Event, EventKind};

    use super::*;

    fn msg(text: &str) -> Event {
        Event::user_message(Message::user(text))
    }

    #[test]
    fn memory_append_assigns_sequence_numbers() {
        let store = MemoryEventStore::new();
        assert_eq!(store.append(msg("a")).unwrap(), 0);
        assert_eq!(store.append(msg("b")).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn memory_range_is_clamped() {
        let store = MemoryEventStore::new();
        store.append(msg("a")).unwrap();
        store.append(msg("b")).unwrap();
        store.append(msg("c")).unwrap();
        assert_eq!(store.range(1, 3).len(), 2);
        assert_eq!(store.range(0, 100).len(), 3);
        assert_eq!(store.range(5, 10).len(), 0);
    }

    #[tokio::test]
    async fn subscribers_observe_append_order() {
        let store = MemoryEventStore::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        store.subscribe(tx);
        store.append(msg("one")).unwrap();
        store.append(msg("two")).unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (&first.kind, &second.kind) {
            (EventKind::Message { message: a }, EventKind::Message { message: b }) => {
                assert_eq!(a.text(), "one");
                assert_eq!(b.text(), "two");
            }
            other => panic!("unexpected kinds: {other:?}"),
        }
    }

    #[test]
    fn closed_subscriber_is_dropped_silently() {
        let store = MemoryEventStore::new();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        store.subscribe(tx);
        drop(rx);
        // Must not fail even though the receiver is gone.
        store.append(msg("a")).unwrap();
        store.append(msg("b")).unwrap();
    }

    #[test]
    fn file_store_persists_and_restores() {
        let root = tempfile::tempdir().unwrap();
        {
            let store = FileEventStore::open(root.path(), "conv-1").unwrap();
            store.append(msg("hello")).unwrap();
            store.append(msg("world")).unwrap();
        }
        let restored = FileEventStore::open(root.path(), "conv-1").unwrap();
        assert_eq!(restored.len(), 2);
        let events = restored.all();
        match &events[0].kind {
            EventKind::Message { message } => assert_eq!(message.text(), "hello"),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn file_store_restore_preserves_event_identity() {
        let root = tempfile::tempdir().unwrap();
        let original = msg("hello");
        let id = original.id();
        {
            let store = FileEventStore::open(root.path(), "conv-2").unwrap();
            store.append(original).unwrap();
        }
        let restored = FileEventStore::open(root.path(), "conv-2").unwrap();
        assert_eq!(restored.all()[0].id(), id);
    }

    #[test]
    fn file_store_skips_torn_final_line() {
        let root = tempfile::tempdir().unwrap();
        {
            let store = FileEventStore::open(root.path(), "conv-3").unwrap();
            store.append(msg("intact")).unwrap();
        }
        // Simulate a crash mid-append.
        let path = FileEventStore::conversation_dir(root.path(), "conv-3").join("events.ndjson");
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\":\"tru").unwrap();
        drop(file);

        let restored = FileEventStore::open(root.path(), "conv-3").unwrap();
        assert_eq!(restored.len(), 1);
    }

    #[test]
    fn separate_conversations_have_separate_logs() {
        let root = tempfile::tempdir().unwrap();
        let a = FileEventStore::open(root.path(), "conv-a").unwrap();
        let b = FileEventStore::open(root.path(), "conv-b").unwrap();
        a.append(msg("for a")).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 0);
    }
}
