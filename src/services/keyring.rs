use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use oo7::Keyring;

use super::tokens::{TokenKey, TokenStore};
use crate::config::{APP_ID, APP_NAME};

const KEYRING_ATTR_APP: &str = "application";
const KEYRING_ATTR_KEY: &str = "key";

/// Token store backed by the system keyring.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    keyring: Arc<Keyring>,
}

impl KeyringTokenStore {
    pub async fn new() -> Result<Self> {
        let keyring = Keyring::new()
            .await
            .context("Failed to initialize keyring")?;
        Ok(Self {
            keyring: Arc::new(keyring),
        })
    }

    fn attributes(key: TokenKey) -> Vec<(&'static str, &'static str)> {
        vec![(KEYRING_ATTR_APP, APP_ID), (KEYRING_ATTR_KEY, key.as_str())]
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn get(&self, key: TokenKey) -> Result<Option<String>> {
        let items = self
            .keyring
            .search_items(&Self::attributes(key))
            .await
            .context("Failed to search keyring")?;

        match items.first() {
            Some(item) => {
                let secret = item.secret().await.context("Failed to read secret")?;
                let value =
                    String::from_utf8(secret.to_vec()).context("Secret is not valid UTF-8")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: TokenKey, value: &str) -> Result<()> {
        self.keyring
            .create_item(
                &format!("{} - {}", APP_NAME, key.as_str()),
                &Self::attributes(key),
                value,
                true, // replace if exists
            )
            .await
            .context("Failed to store secret in keyring")?;
        Ok(())
    }

    async fn remove(&self, keys: &[TokenKey]) -> Result<()> {
        for key in keys {
            self.keyring
                .delete(&Self::attributes(*key))
                .await
                .with_context(|| format!("Failed to delete {} from keyring", key.as_str()))?;
        }
        Ok(())
    }
}
