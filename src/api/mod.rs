//! Auth API: the narrow contract with the identity server.
//!
//! DESIGN
//! ======
//! Session code depends only on the [`AuthApi`] trait, so tests script the
//! identity server with a mock and production wires in [`HttpAuthApi`].
//! Wire parsing lives in pure functions in [`types`] for testability.

pub mod http;
pub mod types;

pub use http::HttpAuthApi;
pub use types::{ACCOUNT_DEACTIVATED, ApiError, AuthResponse, Token, User};

/// Identity server operations used by the session subsystem.
#[async_trait::async_trait]
pub trait AuthApi: Send + Sync {
    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// [`ApiError::Network`] when unreachable, [`ApiError::Auth`] when rejected.
    async fn login(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError>;

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// Same shape as [`AuthApi::login`].
    async fn register(&self, username: &str, email: &str, password: &str) -> Result<AuthResponse, ApiError>;

    /// `GET /auth/me` with a bearer token.
    ///
    /// # Errors
    ///
    /// [`ApiError::Unauthorized`] when the token is rejected.
    async fn me(&self, token: &Token) -> Result<User, ApiError>;

    /// `POST /auth/reactivate`.
    ///
    /// # Errors
    ///
    /// Same shape as [`AuthApi::login`].
    async fn reactivate(&self, email: &str, password: &str) -> Result<AuthResponse, ApiError>;
}
