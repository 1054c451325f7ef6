//! Per-thread conversation history.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

/// Ordered, role-tagged messages of one thread.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation from a single user message.
    pub fn from_user(content: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(ChatMessage::user(content));
        conversation
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last_user(&self) -> Option<&ChatMessage> {
        self.last_with_role(Role::User)
    }

    pub fn last_assistant(&self) -> Option<&ChatMessage> {
        self.last_with_role(Role::Assistant)
    }

    pub fn last_function(&self) -> Option<&ChatMessage> {
        self.last_with_role(Role::Function)
    }

    /// Messages appended after position `from`.
    pub fn since(&self, from: usize) -> &[ChatMessage] {
        &self.messages[from.min(self.messages.len())..]
    }

    fn last_with_role(&self, role: Role) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == role)
    }
}

impl From<Vec<ChatMessage>> for Conversation {
    fn from(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }
}
