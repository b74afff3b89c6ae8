pub mod client;
pub mod traits;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::BackendClient;
pub use traits::ChatApi;
pub use types::{
    ApiError, ChatReply, ImageUpload, LoginResponse, RemoteMessage, RemoteSession, SignupRequest,
};
