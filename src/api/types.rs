//! Auth API wire shapes, the token newtype, and API errors.

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ErrorCode;

/// Error code the identity server uses for a deactivated (recoverable) account.
pub const ACCOUNT_DEACTIVATED: &str = "ACCOUNT_DEACTIVATED";

// =============================================================================
// TOKEN
// =============================================================================

/// Opaque bearer token. Never parsed client-side, never printed.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token(<{} bytes>)", self.0.len())
    }
}

impl From<&str> for Token {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for Token {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// =============================================================================
// USER / RESPONSES
// =============================================================================

/// Profile of the signed-in user. Replaced as a whole, never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(alias = "_id", deserialize_with = "string_or_number")]
    pub id: String,
    pub username: String,
    pub email: String,
}

/// Successful login / register / reactivate body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub token: Token,
    #[serde(default)]
    pub user: Option<User>,
}

/// Failure body returned with 4xx/5xx statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Int(n) => n.to_string(),
    })
}

// =============================================================================
// REQUEST BODIES
// =============================================================================

#[derive(Serialize)]
pub(crate) struct CredentialsRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by auth API calls.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// The identity server could not be reached.
    #[error("network error: {0}")]
    Network(String),

    /// The identity server rejected the request.
    #[error("auth failed ({status}): {message}")]
    Auth { status: u16, message: String, code: Option<String> },

    /// The bearer token was rejected (`401` from `/auth/me`).
    #[error("token rejected by identity server")]
    Unauthorized,

    /// A success body could not be decoded.
    #[error("response decode failed: {0}")]
    Decode(String),

    /// The underlying HTTP client could not be constructed.
    #[error("HTTP client build failed: {0}")]
    HttpClientBuild(String),
}

impl ApiError {
    /// `true` when the account exists but is deactivated and may be reactivated.
    #[must_use]
    pub fn is_deactivated(&self) -> bool {
        matches!(self, Self::Auth { code: Some(code), .. } if code == ACCOUNT_DEACTIVATED)
    }

    /// Message suitable for showing to the person at the keyboard.
    ///
    /// Server-provided text is never shown; it stays in `Display` for logs.
    #[must_use]
    pub fn user_message(&self) -> String {
        let message = match self {
            Self::Network(_) => "Unable to reach the server. Check your connection and try again.",
            Self::Auth { .. } if self.is_deactivated() => "This account has been deactivated.",
            Self::Unauthorized => "Your session has expired. Please sign in again.",
            Self::Auth { .. } | Self::Decode(_) | Self::HttpClientBuild(_) => "Something went wrong. Please try again.",
        };
        message.to_owned()
    }
}

impl ErrorCode for ApiError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Network(_) => "E_NETWORK",
            Self::Auth { .. } if self.is_deactivated() => "E_ACCOUNT_DEACTIVATED",
            Self::Auth { .. } => "E_AUTH",
            Self::Unauthorized => "E_UNAUTHORIZED",
            Self::Decode(_) => "E_DECODE",
            Self::HttpClientBuild(_) => "E_HTTP_CLIENT_BUILD",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Auth { status: 500..=599, .. })
    }
}

// =============================================================================
// PARSING
// =============================================================================

/// Map a login / register / reactivate response to a result.
pub(crate) fn parse_auth_response(status: u16, body: &str) -> Result<AuthResponse, ApiError> {
    if !(200..300).contains(&status) {
        return Err(parse_error_body(status, body));
    }
    let parsed: AuthResponse = serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))?;
    if parsed.token.is_empty() {
        return Err(ApiError::Decode("empty token in auth response".into()));
    }
    Ok(parsed)
}

/// Map a `/auth/me` response to a result. `401` is the distinguished case.
pub(crate) fn parse_me_response(status: u16, body: &str) -> Result<User, ApiError> {
    if status == 401 {
        return Err(ApiError::Unauthorized);
    }
    if !(200..300).contains(&status) {
        return Err(parse_error_body(status, body));
    }
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn parse_error_body(status: u16, body: &str) -> ApiError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| format!("request failed with status {status}"));
    ApiError::Auth { status, message, code: parsed.code }
}

#[cfg(test)]
#[path = "types_test.rs"]
mod tests;
