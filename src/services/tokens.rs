use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKey {
    Token,
    UserId,
    UserEmail,
}

impl TokenKey {
    pub const ALL: [TokenKey; 3] = [TokenKey::Token, TokenKey::UserId, TokenKey::UserEmail];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKey::Token => "token",
            TokenKey::UserId => "user_id",
            TokenKey::UserEmail => "user_email",
        }
    }
}

/// Small persistent key-value store for credentials.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, key: TokenKey) -> Result<Option<String>>;

    async fn set(&self, key: TokenKey, value: &str) -> Result<()>;

    async fn remove(&self, keys: &[TokenKey]) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    values: Mutex<HashMap<TokenKey, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        let store = Self::default();
        store
            .values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TokenKey::Token, token.to_string());
        store
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&key).cloned())
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key, value.to_string());
        Ok(())
    }

    async fn remove(&self, keys: &[TokenKey]) -> Result<()> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            values.remove(key);
        }
        Ok(())
    }
}
