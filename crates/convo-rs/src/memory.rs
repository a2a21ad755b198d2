//! Per-conversation message logs.
//!
//! A [`ConversationMemory`] maps a conversation id to an append-only list of
//! messages. The [`ChatClient`](crate::client::ChatClient) consults it before
//! building a request and appends the new user/assistant pair after a
//! successful response.
//!
//! Two implementations ship with the crate:
//!
//! - [`InMemoryChatMemory`] keeps every conversation for the lifetime of the
//!   process. Appends to different ids never contend with each other; appends
//!   to the same id are serialized by a per-id mutex so order is preserved.
//! - [`NoopMemory`] remembers nothing, which is equivalent to stateless
//!   single-turn prompting.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tracing::trace;

use crate::message::Message;

/// Storage for conversation history, keyed by exact conversation id.
pub trait ConversationMemory: Send + Sync {
    /// All messages of a conversation in insertion order. Unknown ids yield
    /// an empty list.
    fn get(&self, conversation_id: &str) -> Vec<Message>;

    /// Append messages to the end of a conversation, creating it if absent.
    fn append(&self, conversation_id: &str, messages: &[Message]);

    /// Forget a conversation entirely.
    fn clear(&self, conversation_id: &str);

    /// The `n` most recent messages of a conversation, oldest first.
    fn last(&self, conversation_id: &str, n: usize) -> Vec<Message> {
        let mut all = self.get(conversation_id);
        let skip = all.len().saturating_sub(n);
        all.drain(..skip);
        all
    }
}

type Slot = Arc<Mutex<Vec<Message>>>;

/// Process-lifetime memory. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryChatMemory {
    conversations: RwLock<HashMap<String, Slot>>,
}

impl InMemoryChatMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of every conversation currently held, in no particular order.
    pub fn conversation_ids(&self) -> Vec<String> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn existing_slot(&self, conversation_id: &str) -> Option<Slot> {
        self.conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conversation_id)
            .cloned()
    }

    /// Find or create the slot for an id. The index lock is released before
    /// the caller touches the slot's own mutex.
    fn slot(&self, conversation_id: &str) -> Slot {
        if let Some(slot) = self.existing_slot(conversation_id) {
            return slot;
        }
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }
}

impl ConversationMemory for InMemoryChatMemory {
    fn get(&self, conversation_id: &str) -> Vec<Message> {
        match self.existing_slot(conversation_id) {
            Some(slot) => slot.lock().unwrap_or_else(PoisonError::into_inner).clone(),
            None => Vec::new(),
        }
    }

    fn append(&self, conversation_id: &str, messages: &[Message]) {
        let slot = self.slot(conversation_id);
        let mut log = slot.lock().unwrap_or_else(PoisonError::into_inner);
        log.extend_from_slice(messages);
        trace!(
            "memory[{conversation_id}]: +{} message(s), {} total",
            messages.len(),
            log.len()
        );
    }

    fn clear(&self, conversation_id: &str) {
        self.conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conversation_id);
    }

    fn last(&self, conversation_id: &str, n: usize) -> Vec<Message> {
        match self.existing_slot(conversation_id) {
            Some(slot) => {
                let log = slot.lock().unwrap_or_else(PoisonError::into_inner);
                log[log.len().saturating_sub(n)..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

/// Memory that never remembers anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMemory;

impl ConversationMemory for NoopMemory {
    fn get(&self, _conversation_id: &str) -> Vec<Message> {
        Vec::new()
    }

    fn append(&self, _conversation_id: &str, _messages: &[Message]) {}

    fn clear(&self, _conversation_id: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn append_preserves_order() {
        let memory = InMemoryChatMemory::new();
        let m1 = Message::user("My name is andrew, and my job is software engineer");
        let m2 = Message::assistant("Ok!");

        memory.append("c", std::slice::from_ref(&m1));
        memory.append("c", std::slice::from_ref(&m2));

        assert_eq!(memory.get("c"), vec![m1, m2]);
    }

    #[test]
    fn unknown_id_is_empty() {
        let memory = InMemoryChatMemory::new();
        assert!(memory.get("nope").is_empty());
        assert!(memory.last("nope", 5).is_empty());
    }

    #[test]
    fn ids_are_not_normalized() {
        let memory = InMemoryChatMemory::new();
        memory.append("Conversation", &[Message::user("a")]);
        assert!(memory.get("conversation").is_empty());
        assert!(memory.get("Conversation ").is_empty());
        assert_eq!(memory.get("Conversation").len(), 1);
    }

    #[test]
    fn conversations_are_isolated() {
        let memory = InMemoryChatMemory::new();
        memory.append("a", &[Message::user("for a")]);
        memory.append("b", &[Message::user("for b")]);
        assert_eq!(memory.get("a")[0].text(), "for a");
        assert_eq!(memory.get("b")[0].text(), "for b");

        let mut ids = memory.conversation_ids();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn last_returns_most_recent_window() {
        let memory = InMemoryChatMemory::new();
        let msgs: Vec<Message> = (0..5).map(|i| Message::user(format!("m{i}"))).collect();
        memory.append("c", &msgs);

        let tail = memory.last("c", 2);
        assert_eq!(tail, msgs[3..].to_vec());
        assert_eq!(memory.last("c", 10).len(), 5);
        assert!(memory.last("c", 0).is_empty());
    }

    #[test]
    fn clear_forgets_conversation() {
        let memory = InMemoryChatMemory::new();
        memory.append("c", &[Message::user("x")]);
        memory.clear("c");
        assert!(memory.get("c").is_empty());
        assert!(memory.conversation_ids().is_empty());
    }

    #[test]
    fn concurrent_appends_lose_nothing() {
        let memory = Arc::new(InMemoryChatMemory::new());
        let n = 64;

        let handles: Vec<_> = (0..n)
            .map(|i| {
                let memory = Arc::clone(&memory);
                thread::spawn(move || {
                    memory.append("shared", &[Message::user(format!("msg {i}"))]);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = memory.get("shared");
        assert_eq!(log.len(), n);
        let mut texts: Vec<&str> = log.iter().map(|m| m.text()).collect();
        texts.sort();
        texts.dedup();
        assert_eq!(texts.len(), n);
    }

    #[test]
    fn concurrent_pair_appends_stay_adjacent() {
        let memory = Arc::new(InMemoryChatMemory::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let memory = Arc::clone(&memory);
                thread::spawn(move || {
                    memory.append(
                        "pairs",
                        &[
                            Message::user(format!("q{i}")),
                            Message::assistant(format!("a{i}")),
                        ],
                    );
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let log = memory.get("pairs");
        assert_eq!(log.len(), 32);
        for pair in log.chunks(2) {
            assert_eq!(
                pair[0].text().trim_start_matches('q'),
                pair[1].text().trim_start_matches('a')
            );
        }
    }

    #[test]
    fn noop_memory_discards() {
        let memory = NoopMemory;
        memory.append("c", &[Message::user("x")]);
        assert!(memory.get("c").is_empty());
        assert!(memory.last("c", 3).is_empty());
    }
}
