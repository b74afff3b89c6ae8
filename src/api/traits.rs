use async_trait::async_trait;

use super::types::{ApiError, ChatReply, RemoteMessage, RemoteSession};

/// Remote side of the conversational assistant.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn start_chat(&self, text: &str) -> Result<ChatReply, ApiError>;

    async fn continue_chat(&self, session_id: &str, text: &str) -> Result<ChatReply, ApiError>;

    async fn chat_history(&self) -> Result<Vec<RemoteSession>, ApiError>;

    async fn chat_session(&self, session_id: &str) -> Result<Vec<RemoteMessage>, ApiError>;

    async fn delete_chat_session(&self, session_id: &str) -> Result<(), ApiError>;
}
