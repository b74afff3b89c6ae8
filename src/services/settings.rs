use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS, ENV_BASE_URL, ENV_TIMEOUT_SECS};
use crate::models::ColorScheme;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub color_scheme: ColorScheme,
    pub session_lookup: SessionLookup,
}

/// Where full message histories come from when a past chat is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionLookup {
    /// Ask the per-session endpoint.
    Endpoint,
    /// Reuse the messages embedded in the history listing.
    Embedded,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            color_scheme: ColorScheme::System,
            session_lookup: SessionLookup::Endpoint,
        }
    }
}

impl AppSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|u| !u.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => self.timeout_secs = secs,
                _ => tracing::warn!("Ignoring invalid {}={:?}", ENV_TIMEOUT_SECS, raw),
            }
        }
    }
}

pub struct SettingsService;

impl SettingsService {
    /// Read settings from `path` if given, then apply environment
    /// overrides. A missing or malformed file yields defaults.
    pub fn load(path: Option<&Path>) -> AppSettings {
        let mut settings = match path {
            Some(path) => match Self::read_file(path) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!("Using default settings: {:#}", e);
                    AppSettings::default()
                }
            },
            None => AppSettings::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    pub fn save(path: &Path, settings: &AppSettings) -> Result<()> {
        let json = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write settings to {}", path.display()))
    }

    fn read_file(path: &Path) -> Result<AppSettings> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&json).with_context(|| format!("Failed to parse {}", path.display()))
    }
}
