use serde::{Deserialize, Serialize};

use super::message::Message;

/// The active conversation. `messages` is kept oldest-first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatSession {
    pub session_id: Option<String>,
    pub messages: Vec<Message>,
}

impl ChatSession {
    pub fn new(session_id: String, messages: Vec<Message>) -> Self {
        Self {
            session_id: Some(session_id),
            messages,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Newest-first, the order an inverted message list renders.
    pub fn display_order(&self) -> Vec<Message> {
        self.messages.iter().rev().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub preview: String,
    pub message_count: usize,
}
