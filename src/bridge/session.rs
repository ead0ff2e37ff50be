//! # Conversation Session Store
//!
//! Each conversation keeps a short rolling history that always starts with the fixed system
//! message. When a new turn would push the history past `1 + max_turns` messages, the oldest
//! non-system turns are dropped so the stored history is `[system] + last max_turns`.
//!
//! ## Locking
//!
//! [`InMemorySessionStore`] holds one lock per conversation behind a map lock. The map lock
//! is only held long enough to find or create a conversation's slot; append + trim then runs
//! under that conversation's own lock, so different conversations never contend and a
//! reader never sees a half-trimmed history. Callers must not hold anything from the store
//! across a backend call: take a [`snapshot`](SessionStore::snapshot) instead.
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ChatMessage, ConversationId};

/// Stored non-system turns per conversation.
pub const DEFAULT_MAX_TURNS: usize = 8;

/// Shared conversation state. Implementations must make `append` atomic per conversation.
pub trait SessionStore: Send + Sync {
    /// Append one message (creating the conversation if needed), trim, and return the
    /// resulting history.
    fn append(&self, conversation: &ConversationId, message: ChatMessage) -> Vec<ChatMessage>;

    /// Ordered copy of the current history. Unknown conversations yield just the system
    /// message, which is what a fresh conversation would start with.
    fn snapshot(&self, conversation: &ConversationId) -> Vec<ChatMessage>;

    /// Number of conversations created so far.
    fn conversation_count(&self) -> usize;
}

/// History of one conversation: the system message plus a bounded deque of turns.
#[derive(Debug, Clone)]
pub struct ConversationHistory {
    system: ChatMessage,
    turns: VecDeque<ChatMessage>,
    max_turns: usize,
}

impl ConversationHistory {
    pub fn new(system: ChatMessage, max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            system,
            turns: VecDeque::with_capacity(max_turns + 1),
            max_turns,
        }
    }

    /// Append a turn and drop the oldest turns beyond the cap.
    pub fn push(&mut self, message: ChatMessage) {
        self.turns.push_back(message);
        self.trim();
    }

    fn trim(&mut self) {
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// Messages including the system message.
    pub fn message_count(&self) -> usize {
        1 + self.turns.len()
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.message_count());
        out.push(self.system.clone());
        out.extend(self.turns.iter().cloned());
        out
    }
}

type Slot = Arc<Mutex<ConversationHistory>>;

/// Process-lifetime, in-memory session store.
#[derive(Debug)]
pub struct InMemorySessionStore {
    system: ChatMessage,
    max_turns: usize,
    conversations: Mutex<HashMap<ConversationId, Slot>>,
}

// A panic while holding one of these locks cannot leave a history half-written (push/trim
// never panic midway), so poisoned guards are safe to keep using.
fn relock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemorySessionStore {
    pub fn new(system: ChatMessage, max_turns: usize) -> Self {
        Self {
            system,
            max_turns: max_turns.max(1),
            conversations: Mutex::new(HashMap::new()),
        }
    }

    pub fn system_message(&self) -> &ChatMessage {
        &self.system
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn slot(&self, conversation: &ConversationId) -> Slot {
        let mut map = relock(&self.conversations);
        map.entry(conversation.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationHistory::new(
                    self.system.clone(),
                    self.max_turns,
                )))
            })
            .clone()
    }

    fn existing_slot(&self, conversation: &ConversationId) -> Option<Slot> {
        relock(&self.conversations).get(conversation).cloned()
    }
}

impl SessionStore for InMemorySessionStore {
    fn append(&self, conversation: &ConversationId, message: ChatMessage) -> Vec<ChatMessage> {
        let slot = self.slot(conversation);
        let mut history = relock(&slot);
        history.push(message);
        history.messages()
    }

    fn snapshot(&self, conversation: &ConversationId) -> Vec<ChatMessage> {
        match self.existing_slot(conversation) {
            Some(slot) => relock(&slot).messages(),
            None => vec![self.system.clone()],
        }
    }

    fn conversation_count(&self) -> usize {
        relock(&self.conversations).len()
    }
}
