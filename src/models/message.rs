use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::BOT_NAME;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    Bot { name: String },
}

impl Sender {
    pub fn bot() -> Self {
        Sender::Bot {
            name: BOT_NAME.to_string(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot { .. } => "bot",
        }
    }

    /// Backends label the assistant side inconsistently, so anything that
    /// is not recognisably the user is treated as the bot.
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" | "human" => Sender::User,
            _ => Sender::bot(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            Sender::User => "You",
            Sender::Bot { name } => name,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Sender::User)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageId {
    /// Created on this device before the server has seen it.
    Local(Uuid),
    /// Server record id joined with the sender tag.
    Server(String),
}

impl MessageId {
    pub fn local() -> Self {
        MessageId::Local(Uuid::new_v4())
    }

    pub fn server(record_id: &str, sender: &Sender) -> Self {
        MessageId::Server(format!("{}-{}", record_id, sender.as_str()))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, MessageId::Local(_))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageId::Local(id) => write!(f, "local-{}", id),
            MessageId::Server(id) => f.write_str(id),
        }
    }
}

/// A single chat line. Fields are fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: MessageId,
    text: String,
    created_at: DateTime<Utc>,
    sender: Sender,
}

impl Message {
    pub fn new(id: MessageId, text: String, created_at: DateTime<Utc>, sender: Sender) -> Self {
        Self {
            id,
            text,
            created_at,
            sender,
        }
    }

    pub fn local_user(text: String) -> Self {
        Self::new(MessageId::local(), text, Utc::now(), Sender::User)
    }

    pub fn local_bot(text: String) -> Self {
        Self::new(MessageId::local(), text, Utc::now(), Sender::bot())
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }
}
