//! reqwest-backed [`AuthApi`] client.
//!
//! Thin HTTP wrapper: builds requests, reads status + body, and hands both to
//! the pure parsers in [`super::types`].

use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use super::AuthApi;
use super::types::{
    ApiError, AuthResponse, CredentialsRequest, RegisterRequest, Token, User, parse_auth_response, parse_me_response,
};
use crate::config::{ClientConfig, Timeouts};

// =============================================================================
// CLIENT
// =============================================================================

pub struct HttpAuthApi {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAuthApi {
    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the reqwest client fails to build.
    pub fn new(base_url: impl Into<String>, timeouts: Timeouts) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .build()
            .map_err(|e| ApiError::HttpClientBuild(e.to_string()))?;
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { http, base_url })
    }

    /// # Errors
    ///
    /// Returns [`ApiError::HttpClientBuild`] if the reqwest client fails to build.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Self::new(config.api_base_url.clone(), config.timeouts)
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<(u16, String), ApiError> {
        let response = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        read_response(response).await
    }
}

async fn read_response(response: reqwest::Response) -> Result<(u16, String), ApiError> {
    let status = response.status().as_u16();
    let text = response
        .text()
        .await
        .map_err(|e| ApiError::Network(e.to_string()))?;
    debug!(status, bytes = text.len(), "auth api response");
    Ok((status, text))
}

#[async_trait::async_trait]
impl AuthApi for HttpAuthApi {
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let (status, body) = self
            .post_json("/auth/login", &CredentialsRequest { email, password })
            .await?;
        parse_auth_response(status, &body)
    }

    async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let (status, body) = self
            .post_json("/auth/register", &RegisterRequest { username, email, password })
            .await?;
        parse_auth_response(status, &body)
    }

    async fn me(&self, token: &Token) -> Result<User, ApiError> {
        let response = self
            .http
            .get(self.url("/auth/me"))
            .bearer_auth(token.as_str())
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        let (status, body) = read_response(response).await?;
        parse_me_response(status, &body)
    }

    async fn reactivate(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError> {
        let (status, body) = self
            .post_json("/auth/reactivate", &CredentialsRequest { email, password })
            .await?;
        parse_auth_response(status, &body)
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
