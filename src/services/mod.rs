pub mod auth;
pub mod chat;
pub mod conversation;
pub mod keyring;
pub mod markdown;
pub mod reports;
pub mod settings;
pub mod tokens;

pub use auth::{AuthService, SignupForm};
pub use chat::{ChatError, ChatPhase, ChatSessionManager, HistoryState, NewSessionOutcome, SendOutcome};
pub use reports::ReportService;
pub use settings::SettingsService;
pub use tokens::{TokenKey, TokenStore};
