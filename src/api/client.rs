use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::traits::ChatApi;
use super::types::*;
use crate::models::{PredictionRecord, RecordId, UserProfile};
use crate::services::settings::AppSettings;
use crate::services::tokens::{TokenKey, TokenStore};

/// Field-error keys the signup endpoint reports, in display order.
const FIELD_ERROR_KEYS: [&str; 4] = ["email", "username", "password", "non_field_errors"];

/// HTTP client for the LeafLens backend. Attaches the stored token to every
/// request and drops it again when the server answers 401.
pub struct BackendClient {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenStore>,
}

impl BackendClient {
    pub fn new(settings: &AppSettings, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let mut base_url = Url::parse(&settings.base_url)
            .with_context(|| format!("Invalid backend URL: {}", settings.base_url))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            tokens,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn tokens(&self) -> Arc<dyn TokenStore> {
        self.tokens.clone()
    }

    /// Turn an image path from the backend into something loadable.
    pub fn resolve_image_url(&self, path: &str) -> Option<String> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        if path.starts_with("http") {
            return Some(path.to_string());
        }
        self.base_url.join(path).ok().map(String::from)
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::NetworkError(format!("Bad endpoint {}: {}", path, e)))
    }

    /// `chat/sessions/{id}/` with the id kept as one encoded path segment.
    fn session_endpoint(&self, session_id: &str) -> Result<Url, ApiError> {
        if matches!(session_id.trim(), "" | "." | "..") {
            return Err(ApiError::NotFound(format!("Invalid session id {:?}", session_id)));
        }
        let mut url = self.endpoint("chat/sessions/")?;
        url.path_segments_mut()
            .map_err(|_| ApiError::NetworkError("Base URL cannot hold a path".to_string()))?
            .pop_if_empty()
            .push(session_id)
            .push("");
        Ok(url)
    }

    async fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match self.tokens.get(TokenKey::Token).await {
            Ok(Some(token)) => req.header("Authorization", format!("Token {}", token)),
            Ok(None) => req,
            Err(e) => {
                tracing::warn!("Error reading token: {:#}", e);
                req
            }
        }
    }

    async fn execute<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, ApiError> {
        let response = self.authorize(req).await.send().await.map_err(map_send_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            if let Err(e) = self.tokens.remove(&[TokenKey::Token, TokenKey::UserId]).await {
                tracing::warn!("Failed to clear token after 401: {:#}", e);
            }
            return Err(ApiError::Unauthorized);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error_response(status, &body));
        }

        response.json::<T>().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout
            } else {
                ApiError::InvalidResponse(e.to_string())
            }
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        tracing::debug!("GET {}", url);
        self.execute(self.client.get(url)).await
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: serde::Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        tracing::debug!("POST {}", url);
        self.execute(self.client.post(url).json(body)).await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<LoginResponse, ApiError> {
        self.post_json("login/", &LoginRequest { username, password }).await
    }

    pub async fn register(&self, request: &SignupRequest) -> Result<(), ApiError> {
        let _: serde_json::Value = self.post_json("signup/", request).await?;
        Ok(())
    }

    pub async fn profile(&self) -> Result<UserProfile, ApiError> {
        let env: Envelope<ProfileBody> = self.get_json("profile/").await?;
        Ok(env.into_result()?.profile)
    }

    pub async fn predict(&self, upload: ImageUpload) -> Result<PredictionRecord, ApiError> {
        let url = self.endpoint("predict/")?;
        let part = Part::bytes(upload.data.to_vec())
            .file_name(upload.filename)
            .mime_str(&upload.mime_type)
            .map_err(|e| ApiError::InvalidResponse(format!("Bad MIME type: {}", e)))?;
        let form = Form::new().part("image", part);

        tracing::debug!("POST {} (multipart)", url);
        let env: Envelope<PredictionBody> =
            self.execute(self.client.post(url).multipart(form)).await?;
        Ok(env.into_result()?.prediction)
    }

    pub async fn predictions(&self) -> Result<Vec<PredictionRecord>, ApiError> {
        let env: Envelope<PredictionsBody> = self.get_json("predictions/").await?;
        Ok(env.into_result()?.predictions)
    }

    pub async fn prediction(&self, id: &RecordId) -> Result<PredictionRecord, ApiError> {
        let env: Envelope<PredictionBody> =
            self.get_json(&format!("predictions/{}/", id)).await?;
        Ok(env.into_result()?.prediction)
    }
}

#[async_trait]
impl ChatApi for BackendClient {
    async fn start_chat(&self, text: &str) -> Result<ChatReply, ApiError> {
        let env: Envelope<ChatReply> = self
            .post_json("chat/start/", &StartChatRequest { message: text })
            .await?;
        env.into_result()
    }

    async fn continue_chat(&self, session_id: &str, text: &str) -> Result<ChatReply, ApiError> {
        let env: Envelope<ChatReply> = self
            .post_json(
                "chat/continue/",
                &ContinueChatRequest {
                    session_id,
                    message: text,
                },
            )
            .await?;
        env.into_result()
    }

    async fn chat_history(&self) -> Result<Vec<RemoteSession>, ApiError> {
        let env: Envelope<ChatHistoryBody> = self.get_json("chat/history/").await?;
        Ok(env.into_result()?.sessions)
    }

    async fn chat_session(&self, session_id: &str) -> Result<Vec<RemoteMessage>, ApiError> {
        let url = self.session_endpoint(session_id)?;
        tracing::debug!("GET {}", url);
        let env: Envelope<ChatSessionBody> = self.execute(self.client.get(url)).await?;
        Ok(env.into_result()?.messages)
    }

    async fn delete_chat_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.session_endpoint(session_id)?;
        tracing::debug!("DELETE {}", url);
        let env: Envelope<Empty> = self.execute(self.client.delete(url)).await?;
        env.into_result().map(|_| ())
    }
}

fn map_send_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::Timeout
    } else {
        ApiError::NetworkError(e.to_string())
    }
}

fn parse_error_response(status: StatusCode, body: &str) -> ApiError {
    let parsed = serde_json::from_str::<serde_json::Value>(body).ok();

    if status == StatusCode::BAD_REQUEST {
        if let Some(messages) = parsed.as_ref().map(field_errors).filter(|m| !m.is_empty()) {
            return ApiError::Validation(messages);
        }
    }

    let message = parsed
        .as_ref()
        .and_then(|v| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|key| v.get(*key).and_then(|m| m.as_str()))
        })
        .map(str::to_string)
        .unwrap_or_else(|| "Request failed".to_string());

    if status == StatusCode::NOT_FOUND {
        ApiError::NotFound(message)
    } else {
        ApiError::RequestFailed {
            status: status.as_u16(),
            message,
        }
    }
}

/// First message of each known field, capitalized.
fn field_errors(body: &serde_json::Value) -> Vec<String> {
    FIELD_ERROR_KEYS
        .iter()
        .filter_map(|key| body.get(*key)?.as_array()?.first()?.as_str())
        .map(capitalize)
        .collect()
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
