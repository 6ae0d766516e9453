//! REST API client module for the chat auth backend.
//!
//! The session layer talks to the backend only through the [`AuthBackend`]
//! trait. [`ApiClient`] is the HTTP implementation; the session token is
//! passed explicitly on every call (sent as the `token` header) rather than
//! installed as a default header on a shared client.

use async_trait::async_trait;

use crate::models::{AuthMode, AuthUser, Credentials, ProfilePatch};

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthorizedClient};
pub use error::ApiError;

/// Successful login or signup
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSuccess {
    pub user: AuthUser,
    pub token: String,
    pub message: Option<String>,
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// `GET /api/auth/check`: resolve a token to its user
    async fn check(&self, token: &str) -> Result<AuthUser, ApiError>;

    /// `POST /api/auth/{mode}`
    async fn authenticate(
        &self,
        mode: AuthMode,
        credentials: &Credentials,
    ) -> Result<AuthSuccess, ApiError>;

    /// `PUT /api/auth/update-profile`
    async fn update_profile(&self, token: &str, patch: &ProfilePatch) -> Result<AuthUser, ApiError>;
}
