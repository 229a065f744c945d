//! Scripted collaborators shared by the unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::api::{ApiError, AuthApi, AuthResponse, Token, User};
use crate::session::SessionManager;
use crate::store::{MemoryTokenStore, StorageError, TokenStore};

// =============================================================================
// MockAuthApi
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login { email: String },
    Register { username: String, email: String },
    Me { token: String },
    Reactivate { email: String },
}

/// Identity server double. Responses are consumed in order; an empty queue
/// answers with a network error.
#[derive(Default)]
pub struct MockAuthApi {
    auth_results: Mutex<VecDeque<Result<AuthResponse, ApiError>>>,
    me_results: Mutex<VecDeque<Result<User, ApiError>>>,
    calls: Mutex<Vec<Call>>,
    me_gate: Mutex<Option<Arc<Notify>>>,
}

impl MockAuthApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_auth(&self, result: Result<AuthResponse, ApiError>) {
        self.auth_results.lock().unwrap().push_back(result);
    }

    pub fn push_me(&self, result: Result<User, ApiError>) {
        self.me_results.lock().unwrap().push_back(result);
    }

    /// Make every subsequent `me()` wait until the returned handle is notified.
    pub fn hold_me(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.me_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    #[must_use]
    pub fn me_calls(&self) -> usize {
        self.calls().iter().filter(|c| matches!(c, Call::Me { .. })).count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_auth(&self) -> Result<AuthResponse, ApiError> {
        self.auth_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("no scripted auth response".into())))
    }
}

#[async_trait::async_trait]
impl AuthApi for MockAuthApi {
    async fn login(&self, email: &str, _password: &str) -> Result<AuthResponse, ApiError> {
        self.record(Call::Login { email: email.to_owned() });
        self.next_auth()
    }

    async fn register(&self, username: &str, email: &str, _password: &str) -> Result<AuthResponse, ApiError> {
        self.record(Call::Register { username: username.to_owned(), email: email.to_owned() });
        self.next_auth()
    }

    async fn me(&self, token: &Token) -> Result<User, ApiError> {
        self.record(Call::Me { token: token.as_str().to_owned() });
        let gate = self.me_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.me_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Network("no scripted me response".into())))
    }

    async fn reactivate(&self, email: &str, _password: &str) -> Result<AuthResponse, ApiError> {
        self.record(Call::Reactivate { email: email.to_owned() });
        self.next_auth()
    }
}

// =============================================================================
// Stores
// =============================================================================

/// Store whose every operation fails.
pub struct FailingTokenStore;

#[async_trait::async_trait]
impl TokenStore for FailingTokenStore {
    async fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Io(std::io::Error::other("storage unavailable")))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::other("storage unavailable")))
    }

    async fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Io(std::io::Error::other("storage unavailable")))
    }
}

/// Memory store whose reads wait until released.
pub struct SlowReadStore {
    pub inner: MemoryTokenStore,
    pub release: Arc<Notify>,
}

impl SlowReadStore {
    #[must_use]
    pub fn with_entry(key: &str, value: &str) -> Self {
        Self { inner: MemoryTokenStore::with_entry(key, value), release: Arc::new(Notify::new()) }
    }
}

#[async_trait::async_trait]
impl TokenStore for SlowReadStore {
    async fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.release.notified().await;
        self.inner.read(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.inner.remove(key).await
    }
}

// =============================================================================
// Fixtures
// =============================================================================

#[must_use]
pub fn user(id: &str, username: &str, email: &str) -> User {
    User { id: id.into(), username: username.into(), email: email.into() }
}

#[must_use]
pub fn auth_response(token: &str, user: Option<User>) -> AuthResponse {
    AuthResponse { token: Token::new(token), user }
}

#[must_use]
pub fn deactivated() -> ApiError {
    ApiError::Auth { status: 403, message: "deactivated".into(), code: Some("ACCOUNT_DEACTIVATED".into()) }
}

/// Manager over a mock API and a memory store, optionally pre-seeded with a token.
#[must_use]
pub fn manager(stored_token: Option<&str>) -> (Arc<SessionManager>, Arc<MockAuthApi>, Arc<MemoryTokenStore>) {
    let api = Arc::new(MockAuthApi::new());
    let store = Arc::new(match stored_token {
        Some(token) => MemoryTokenStore::with_entry(crate::store::AUTH_TOKEN_KEY, token),
        None => MemoryTokenStore::new(),
    });
    let session = Arc::new(SessionManager::new(api.clone(), store.clone()));
    (session, api, store)
}
