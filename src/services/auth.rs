use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{ApiError, BackendClient, SignupRequest};
use crate::models::{AuthSession, UserProfile};
use crate::services::tokens::{TokenKey, TokenStore};

const MIN_PASSWORD_LEN: usize = 8;

/// Everything the signup screen collects.
#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupForm {
    /// Messages for every problem found, in form order. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.first_name.trim().is_empty() {
            errors.push("First name is required".to_string());
        }
        if self.last_name.trim().is_empty() {
            errors.push("Last name is required".to_string());
        }
        if self.email.trim().is_empty() {
            errors.push("Email is required".to_string());
        } else if !looks_like_email(self.email.trim()) {
            errors.push("Please enter a valid email address".to_string());
        }
        if self.username.trim().is_empty() {
            errors.push("Username is required".to_string());
        }
        if self.password.chars().count() < MIN_PASSWORD_LEN {
            errors.push(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LEN
            ));
        }
        if self.password != self.confirm_password {
            errors.push("Passwords do not match".to_string());
        }

        errors
    }

    fn into_request(self) -> SignupRequest {
        SignupRequest {
            first_name: self.first_name.trim().to_string(),
            middle_name: self.middle_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            email: self.email.trim().to_string(),
            username: self.username.trim().to_string(),
            password: self.password,
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Login state lives in the token store; this service only moves it in and
/// out.
pub struct AuthService {
    client: Arc<BackendClient>,
    tokens: Arc<dyn TokenStore>,
}

impl AuthService {
    pub fn new(client: Arc<BackendClient>) -> Self {
        let tokens = client.tokens();
        Self { client, tokens }
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<AuthSession> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(ApiError::Validation(vec![
                "Username and password are required".to_string(),
            ])
            .into());
        }

        let response = self.client.login(username, password).await?;
        if response.success == Some(false) {
            return Err(ApiError::Rejected(response.message).into());
        }

        let token = response
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("Login reply carried no token".into()))?;
        let user_id = response
            .user_id
            .ok_or_else(|| ApiError::InvalidResponse("Login reply carried no user id".into()))?;
        let email = response.email.unwrap_or_default();

        self.tokens
            .set(TokenKey::Token, &token)
            .await
            .context("Failed to store login token")?;
        self.tokens
            .set(TokenKey::UserId, &user_id.to_string())
            .await
            .context("Failed to store user id")?;
        self.tokens
            .set(TokenKey::UserEmail, &email)
            .await
            .context("Failed to store user email")?;

        tracing::info!("Logged in as {}", username);
        Ok(AuthSession {
            token,
            user_id,
            email,
        })
    }

    pub async fn register(&self, form: SignupForm) -> Result<()> {
        let errors = form.validate();
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors).into());
        }

        let request = form.into_request();
        self.client.register(&request).await?;
        tracing::info!("Registered account {}", request.username);
        Ok(())
    }

    pub async fn logout(&self) -> Result<()> {
        self.tokens
            .remove(&TokenKey::ALL)
            .await
            .context("Failed to clear stored credentials")
    }

    pub async fn is_authenticated(&self) -> bool {
        match self.tokens.get(TokenKey::Token).await {
            Ok(token) => token.is_some_and(|t| !t.is_empty()),
            Err(e) => {
                tracing::warn!("Error reading token: {:#}", e);
                false
            }
        }
    }

    pub async fn profile(&self) -> Result<UserProfile> {
        Ok(self.client.profile().await?)
    }
}
