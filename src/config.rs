pub const APP_ID: &str = "com.leaflens.LeafLens";
pub const APP_NAME: &str = "LeafLens";

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Display name attached to every bot message.
pub const BOT_NAME: &str = "PlantBot";

pub const ENV_BASE_URL: &str = "LEAFLENS_BASE_URL";
pub const ENV_TIMEOUT_SECS: &str = "LEAFLENS_TIMEOUT_SECS";
