//! # Conversation History
//!
//! Per-participant bounded log of exchanged turns, used as context for response
//! generation.
//!
//! ## Bounds:
//! Each participant keeps at most `max_messages` messages (user and assistant turns
//! both count). Appending past the cap evicts from the front, oldest first.
//!
//! ## Lifetime:
//! A conversation is created lazily on the first message and lives until the
//! process exits or it is explicitly cleared. Nothing is persisted.
//!
//! ## Thread Safety:
//! Voice sessions and HTTP handlers share one history, so the map sits behind a
//! `Mutex`. Two sessions that resolve to the same participant id interleave their
//! exchanges; each exchange is still appended atomically.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

/// Who said a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Prefix used when rendering the context block.
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

/// One turn of a conversation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Bounded conversation store keyed by participant identity.
#[derive(Debug)]
pub struct ConversationHistory {
    conversations: Mutex<HashMap<String, VecDeque<Message>>>,
    max_messages: usize,
}

impl ConversationHistory {
    pub fn new(max_messages: usize) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            max_messages,
        }
    }

    pub fn max_messages(&self) -> usize {
        self.max_messages
    }

    /// Append one message, evicting the oldest ones beyond the cap.
    pub fn add_message(&self, participant: &str, role: Role, content: impl Into<String>) {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = conversations.entry(participant.to_string()).or_default();
        Self::push_bounded(messages, Message::new(role, content), self.max_messages);
    }

    /// Append a user turn and the assistant's reply together.
    ///
    /// Used once a reply has been generated successfully, so a failed generation
    /// never leaves a dangling user turn behind.
    pub fn record_exchange(&self, participant: &str, user: impl Into<String>, assistant: impl Into<String>) {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        let messages = conversations.entry(participant.to_string()).or_default();
        Self::push_bounded(messages, Message::new(Role::User, user), self.max_messages);
        Self::push_bounded(messages, Message::new(Role::Assistant, assistant), self.max_messages);
    }

    /// Messages for `participant` in order (oldest first); empty if unknown.
    pub fn get_conversation(&self, participant: &str) -> Vec<Message> {
        let conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations
            .get(participant)
            .map(|messages| messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop all history for `participant`. Returns whether anything was removed.
    pub fn clear(&self, participant: &str) -> bool {
        let mut conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        conversations.remove(participant).is_some()
    }

    /// Participants that currently have history.
    pub fn participants(&self) -> Vec<String> {
        let conversations = self.conversations.lock().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = conversations.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Render the prior context as `User:` / `Assistant:` lines, one per message.
    ///
    /// ## Example:
    /// ```text
    /// User: good morning
    /// Assistant: morning! sleep well?
    /// ```
    pub fn render_context(&self, participant: &str) -> String {
        render_messages(&self.get_conversation(participant))
    }

    fn push_bounded(messages: &mut VecDeque<Message>, message: Message, cap: usize) {
        messages.push_back(message);
        while messages.len() > cap {
            messages.pop_front();
        }
    }
}

/// Render messages in order, each as `<Role>: <content>` followed by a newline.
pub fn render_messages(messages: &[Message]) -> String {
    let mut block = String::new();
    for message in messages {
        // Writing into a String cannot fail
        let _ = writeln!(block, "{}: {}", message.role.label(), message.content);
    }
    block
}
