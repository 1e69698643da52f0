//! Request authentication for the WebSocket handshake.
//!
//! The transport only needs an [`Identity`] for the upgrading request; how it
//! is derived is up to the [`Authenticator`] implementation.

mod claims;
mod jwt;

use async_trait::async_trait;
use axum::http::HeaderMap;

use crate::error::AppError;

pub use claims::Claims;
pub use jwt::{extract_token, JwtAuthenticator, JwtValidator};

/// Authenticated user attached to a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Validates an upgrade request and resolves the user behind it
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Result<Identity, AppError>;
}
