pub mod message;
pub mod prediction;
pub mod record;
pub mod session;
pub mod theme;
pub mod user;

pub use message::{Message, MessageId, Sender};
pub use prediction::{Diagnosis, PredictionRecord, Report, ReportSource};
pub use record::{parse_server_timestamp, RecordId};
pub use session::{ChatSession, SessionSummary};
pub use theme::{ColorScheme, Theme, ThemeMode};
pub use user::{AuthSession, UserProfile};
