use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PredictionRecord, RecordId, UserProfile};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication required")]
    Unauthorized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP {status}: {message}")]
    RequestFailed { status: u16, message: String },

    #[error("Server rejected the request: {}", .0.as_deref().unwrap_or("no reason given"))]
    Rejected(Option<String>),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{}", .0.join("\n"))]
    Validation(Vec<String>),
}

impl ApiError {
    /// A 2xx answer that carried `success: false`.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApiError::Rejected(_))
    }
}

/// Every backend payload wraps its body with a `success` flag and an
/// optional human readable `message`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Envelope<T> {
    pub fn into_result(self) -> Result<T, ApiError> {
        if self.success {
            Ok(self.body)
        } else {
            Err(ApiError::Rejected(self.message))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Empty {}

// --- Chat ---

#[derive(Debug, Serialize)]
pub struct StartChatRequest<'a> {
    pub message: &'a str,
}

#[derive(Debug, Serialize)]
pub struct ContinueChatRequest<'a> {
    pub session_id: &'a str,
    pub message: &'a str,
}

/// Answer to a start or continue call. `session_id` is only meaningful for
/// the first message of a conversation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, alias = "reply")]
    pub response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteMessage {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default, alias = "text", alias = "content")]
    pub message: String,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteSession {
    pub session_id: String,
    #[serde(default, alias = "preview_messages")]
    pub messages: Vec<RemoteMessage>,
    #[serde(default)]
    pub message_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct ChatHistoryBody {
    #[serde(default, alias = "history")]
    pub sessions: Vec<RemoteSession>,
}

#[derive(Debug, Deserialize)]
pub struct ChatSessionBody {
    #[serde(default)]
    pub messages: Vec<RemoteMessage>,
}

// --- Auth ---

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub user_id: Option<RecordId>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfileBody {
    #[serde(alias = "user")]
    pub profile: UserProfile,
}

// --- Predictions ---

#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub data: Bytes,
    pub filename: String,
    pub mime_type: String,
}

#[derive(Debug, Deserialize)]
pub struct PredictionBody {
    #[serde(alias = "result")]
    pub prediction: PredictionRecord,
}

#[derive(Debug, Deserialize)]
pub struct PredictionsBody {
    #[serde(default)]
    pub predictions: Vec<PredictionRecord>,
}
