//! API client for the chat auth backend.
//!
//! This module provides the `ApiClient` struct, the HTTP implementation of
//! [`AuthBackend`]. Every backend response uses the same envelope:
//! `{ success, message?, user?, userData?, token? }`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{header, Client, Method, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::models::{AuthMode, AuthUser, Credentials, ProfilePatch};

use super::error::DEFAULT_REJECTION_MESSAGE;
use super::{ApiError, AuthBackend, AuthSuccess};

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the session token (the backend does not use `Authorization`)
const TOKEN_HEADER: &str = "token";

const CHECK_PATH: &str = "/api/auth/check";
const AUTH_PATH_PREFIX: &str = "/api/auth/";
const UPDATE_PROFILE_PATH: &str = "/api/auth/update-profile";

/// HTTP request timeout in seconds when built without a config
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    message: Option<String>,
    user: Option<AuthUser>,
    #[serde(rename = "userData")]
    user_data: Option<AuthUser>,
    token: Option<String>,
}

impl Envelope {
    /// Turn a 2xx body reporting `success: false` into a rejection
    fn into_success(self, status: StatusCode) -> Result<Self, ApiError> {
        if self.success {
            Ok(self)
        } else {
            Err(ApiError::Rejected {
                status: Some(status.as_u16()),
                message: self
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string()),
            })
        }
    }

    /// Check and update-profile put the profile in `user`, login and signup
    /// in `userData`; accept either.
    fn take_user(&mut self) -> Result<AuthUser, ApiError> {
        self.user_data
            .take()
            .or_else(|| self.user.take())
            .ok_or_else(|| ApiError::InvalidResponse("Response is missing the user profile".to_string()))
    }
}

/// HTTP client for the auth backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the given backend base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::with_timeout(
            config.api_base(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn token_headers(token: &str) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let value = header::HeaderValue::from_str(token).map_err(|_| ApiError::InvalidToken)?;
        headers.insert(TOKEN_HEADER, value);
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<(StatusCode, T), ApiError> {
        let response = Self::check_response(response).await?;
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .json()
            .await
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e)))?;
        Ok((status, body))
    }

    /// Decode a plain JSON body, without the auth envelope
    async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ApiError> {
        let response = request.send().await?;
        let (_, body) = Self::parse(response).await?;
        Ok(body)
    }

    fn authorized(&self, method: Method, path: &str, token: &str) -> Result<reqwest::RequestBuilder, ApiError> {
        let url = self.url(path);
        debug!(url = %url, method = %method, "Authorized request");
        Ok(self.client.request(method, &url).headers(Self::token_headers(token)?))
    }

    async fn send_envelope(request: reqwest::RequestBuilder) -> Result<Envelope, ApiError> {
        let response = request.send().await?;
        let (status, envelope): (StatusCode, Envelope) = Self::parse(response).await?;
        envelope.into_success(status)
    }

    async fn get(&self, path: &str, token: &str) -> Result<Envelope, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "GET");
        Self::send_envelope(self.client.get(&url).headers(Self::token_headers(token)?)).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Envelope, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "POST");
        Self::send_envelope(self.client.post(&url).json(body)).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, token: &str, body: &B) -> Result<Envelope, ApiError> {
        let url = self.url(path);
        debug!(url = %url, "PUT");
        Self::send_envelope(
            self.client
                .put(&url)
                .headers(Self::token_headers(token)?)
                .json(body),
        )
        .await
    }
}

/// [`ApiClient`] bound to a session token, for app requests beyond auth
/// (messages, users). Every request carries the `token` header and the
/// response body is decoded as-is.
#[derive(Clone)]
pub struct AuthorizedClient {
    client: ApiClient,
    token: String,
}

impl AuthorizedClient {
    pub fn new(client: ApiClient, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        ApiClient::send_json(self.client.authorized(Method::GET, path, &self.token)?).await
    }

    pub async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        ApiClient::send_json(self.client.authorized(Method::POST, path, &self.token)?.json(body)).await
    }

    pub async fn put<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        ApiClient::send_json(self.client.authorized(Method::PUT, path, &self.token)?.json(body)).await
    }
}

#[async_trait]
impl AuthBackend for ApiClient {
    async fn check(&self, token: &str) -> Result<AuthUser, ApiError> {
        let mut envelope = self.get(CHECK_PATH, token).await?;
        envelope.take_user()
    }

    async fn authenticate(
        &self,
        mode: AuthMode,
        credentials: &Credentials,
    ) -> Result<AuthSuccess, ApiError> {
        let path = format!("{}{}", AUTH_PATH_PREFIX, mode.as_path());
        let mut envelope = self.post(&path, credentials).await?;

        let user = envelope.take_user()?;
        let token = envelope
            .token
            .take()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("Response is missing the session token".to_string()))?;

        Ok(AuthSuccess {
            user,
            token,
            message: envelope.message,
        })
    }

    async fn update_profile(&self, token: &str, patch: &ProfilePatch) -> Result<AuthUser, ApiError> {
        let mut envelope = self.put(UPDATE_PROFILE_PATH, token, patch).await?;
        envelope.take_user()
    }
}
