use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::BackendClient;
use crate::models::{ColorScheme, Theme};
use crate::services::keyring::KeyringTokenStore;
use crate::services::settings::AppSettings;
use crate::services::tokens::{MemoryTokenStore, TokenStore};
use crate::services::{AuthService, ChatSessionManager, ReportService};

/// Read-only state every screen receives explicitly.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub settings: AppSettings,
    pub theme: Theme,
    system_prefers_dark: bool,
}

impl AppContext {
    pub fn new(settings: AppSettings, system_prefers_dark: bool) -> Self {
        let theme = Theme::for_scheme(settings.color_scheme, system_prefers_dark);
        Self {
            settings,
            theme,
            system_prefers_dark,
        }
    }

    pub fn set_color_scheme(&mut self, scheme: ColorScheme) {
        self.settings.color_scheme = scheme;
        self.theme = Theme::for_scheme(scheme, self.system_prefers_dark);
    }

    /// Flip between light and dark for this run only.
    pub fn toggle_theme(&mut self) {
        self.theme = self.theme.toggled();
    }
}

/// The services behind one signed-in screen stack, sharing one HTTP client.
pub struct Services {
    pub client: Arc<BackendClient>,
    pub chat: ChatSessionManager,
    pub auth: AuthService,
    pub reports: ReportService,
}

impl Services {
    pub fn new(settings: &AppSettings, tokens: Arc<dyn TokenStore>) -> Result<Self> {
        let client = Arc::new(
            BackendClient::new(settings, tokens).context("Failed to create backend client")?,
        );
        Ok(Self {
            chat: ChatSessionManager::new(client.clone(), settings.session_lookup),
            auth: AuthService::new(client.clone()),
            reports: ReportService::new(client.clone()),
            client,
        })
    }
}

/// The system keyring when it is reachable, else an in-memory store that
/// forgets the login on exit.
pub async fn open_token_store() -> Arc<dyn TokenStore> {
    match KeyringTokenStore::new().await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!("Keyring unavailable, credentials will not persist: {:#}", e);
            Arc::new(MemoryTokenStore::new())
        }
    }
}
