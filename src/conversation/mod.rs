//! Conversation state: identifiers, role-tagged messages, and per-conversation records.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::intent::Intent;

pub mod store;

pub use store::{ConversationStore, EvictionPolicy};

/// Opaque conversation identifier supplied by callers or minted on first turn.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Mint a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Wrap a caller-supplied identifier.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Prompt context and dispatcher notes
    System,
    /// The person talking to the home
    User,
    /// The language model
    Assistant,
}

/// One role-tagged message. Serialises to the `{role, content}` shape chat
/// completion APIs expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Author
    pub role: Role,
    /// Free text, or raw model output awaiting parse
    pub content: String,
}

impl Message {
    /// System message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// User message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Stored dialogue state for one identifier.
///
/// Invariant: `messages` is never empty and `messages[0]` is the system
/// prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Ordered history
    pub messages: Vec<Message>,
    /// Intent bound by the classifier; `None` forces reclassification
    pub intent: Option<Intent>,
}

impl Conversation {
    /// Start a conversation from its assembled system prompt.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
            intent: None,
        }
    }

    /// Replace the leading system prompt, keeping the rest of the history.
    pub fn refresh_system_prompt(&mut self, system_prompt: impl Into<String>) {
        let prompt = Message::system(system_prompt);
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => *first = prompt,
            _ => self.messages.insert(0, prompt),
        }
    }

    /// Check the leading-system-message invariant.
    pub fn is_well_formed(&self) -> bool {
        self.messages
            .first()
            .map(|message| message.role == Role::System)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serialises_chat_shape() {
        let json = serde_json::to_value(Message::assistant("hi")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn refresh_replaces_leading_system_message() {
        let mut conversation = Conversation::new("old");
        conversation.messages.push(Message::user("hello"));
        conversation.refresh_system_prompt("new");

        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0], Message::system("new"));
        assert!(conversation.is_well_formed());
    }

    #[test]
    fn minted_ids_are_unique() {
        assert_ne!(ConversationId::new(), ConversationId::new());
    }
}
