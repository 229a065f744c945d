//! Session manager: owns the client session state machine.
//!
//! ARCHITECTURE
//! ============
//! `UNINITIALIZED -> HYDRATING -> {LOGGED_OUT, LOGGED_IN}`, then `sign_in` /
//! `sign_out` move between the two resolved phases. State is published as
//! immutable [`Session`] snapshots over a `tokio::sync::watch` channel; every
//! mutation is one `send_modify`, so observers never see phase, token, and
//! user out of step.
//!
//! STALE RESULTS
//! =============
//! Each token change bumps `Session::generation`. Async work (the stored
//! token read, profile fetches) records the generation it started under and
//! drops its result if the generation moved on in the meantime. A slow
//! profile fetch can therefore never resurrect a cleared session.
//!
//! ERROR HANDLING
//! ==============
//! Nothing here returns an error. Storage failures and profile fetch
//! failures are logged. The one failure with a side effect is a `401` from
//! `/auth/me` during `refresh_me`, which forces a sign-out.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthApi, Token, User};
use crate::error::ErrorCode;
use crate::store::{AUTH_TOKEN_KEY, TokenStore};

// =============================================================================
// PHASE / SESSION
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Uninitialized,
    Hydrating,
    LoggedOut,
    LoggedIn,
}

impl Phase {
    /// `true` once hydration has settled on signed-in or signed-out.
    #[must_use]
    pub fn is_resolved(self) -> bool {
        matches!(self, Self::LoggedOut | Self::LoggedIn)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Hydrating => "hydrating",
            Self::LoggedOut => "logged_out",
            Self::LoggedIn => "logged_in",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session.
///
/// Fields are private so the invariants hold for every value that exists:
/// `user` present implies `token` present, and `phase == LoggedIn` exactly
/// when `token` is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    phase: Phase,
    token: Option<Token>,
    user: Option<User>,
    generation: u64,
}

impl Session {
    fn uninitialized() -> Self {
        Self { phase: Phase::Uninitialized, token: None, user: None, generation: 0 }
    }

    fn logged_in(token: Token, user: Option<User>, generation: u64) -> Self {
        Self { phase: Phase::LoggedIn, token: Some(token), user, generation }
    }

    fn logged_out(generation: u64) -> Self {
        Self { phase: Phase::LoggedOut, token: None, user: None, generation }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn token(&self) -> Option<&Token> {
        self.token.as_ref()
    }

    #[must_use]
    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    /// Identity of the current token. Changes whenever the token does.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.phase == Phase::LoggedIn
    }
}

// =============================================================================
// MANAGER
// =============================================================================

pub struct SessionManager {
    api: Arc<dyn AuthApi>,
    store: Arc<dyn TokenStore>,
    state: watch::Sender<Session>,
    hydrate_started: AtomicBool,
    /// Generation of the last token store write.
    persisted: tokio::sync::Mutex<u64>,
    /// Generation for which the corrective profile fetch was already spent.
    corrective_refresh: Mutex<Option<u64>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, store: Arc<dyn TokenStore>) -> Self {
        let (state, _) = watch::channel(Session::uninitialized());
        Self {
            api,
            store,
            state,
            hydrate_started: AtomicBool::new(false),
            persisted: tokio::sync::Mutex::new(0),
            corrective_refresh: Mutex::new(None),
        }
    }

    /// Current session snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.state.borrow().clone()
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Receiver notified on every session change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.subscribe()
    }

    /// Wait until hydration has resolved the phase.
    pub async fn wait_resolved(&self) -> Session {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| s.phase.is_resolved()).await {
            Ok(session) => session.clone(),
            // The sender lives in `self`, so the channel cannot close here.
            Err(_) => self.snapshot(),
        }
    }

    // =========================================================================
    // HYDRATE
    // =========================================================================

    /// Load the persisted token once per process.
    ///
    /// The resolved phase is published before the follow-up profile fetch
    /// starts, so gating can proceed while the profile is still loading.
    pub async fn hydrate(&self) {
        if self.hydrate_started.swap(true, Ordering::SeqCst) {
            debug!("hydrate already started; ignoring");
            return;
        }

        let mut started = None;
        self.state.send_if_modified(|s| {
            if s.phase != Phase::Uninitialized {
                return false;
            }
            s.phase = Phase::Hydrating;
            started = Some(s.generation);
            true
        });
        let Some(started) = started else {
            debug!(phase = %self.phase(), "session already resolved; skipping hydrate");
            return;
        };

        let stored = self.store.get(AUTH_TOKEN_KEY).await;
        let has_token = stored.is_some();

        let applied = self.state.send_if_modified(|s| {
            if s.generation != started || s.phase != Phase::Hydrating {
                return false;
            }
            *s = match stored {
                Some(raw) => Session::logged_in(Token::new(raw), None, started + 1),
                None => Session::logged_out(started),
            };
            true
        });

        if !applied {
            debug!(started, "session changed during hydrate; discarding stored token read");
            return;
        }

        info!(phase = %self.phase(), "session hydrated");
        if has_token {
            let generation = self.state.borrow().generation;
            self.spend_corrective_refresh(generation);
            self.refresh_me().await;
        }
    }

    // =========================================================================
    // SIGN IN / SIGN OUT
    // =========================================================================

    /// Establish a session. Resolves once the token is persisted and, when no
    /// user was supplied, after one profile fetch attempt. Fetch failures are
    /// logged and leave the session signed in with no user.
    pub async fn sign_in(&self, token: Token, user: Option<User>) {
        let has_user = user.is_some();
        let generation = self.replace(|next| Session::logged_in(token.clone(), user, next));
        info!(generation, has_user, "signed in");

        self.persist(generation, Some(&token)).await;
        if has_user {
            return;
        }

        match self.api.me(&token).await {
            Ok(user) => {
                if !self.set_user_if_current(generation, user) {
                    debug!(generation, "discarding profile for superseded session");
                }
            }
            Err(e) => {
                warn!(generation, code = e.error_code(), error = %e, "profile fetch after sign-in failed");
            }
        }
    }

    /// Clear the session and remove the persisted token.
    pub async fn sign_out(&self) {
        let generation = self.replace(Session::logged_out);
        info!(generation, "signed out");
        self.persist(generation, None).await;
    }

    // =========================================================================
    // PROFILE
    // =========================================================================

    /// Re-fetch and replace the user. A rejected token forces a sign-out.
    pub async fn refresh_me(&self) {
        let (token, generation) = {
            let s = self.state.borrow();
            match &s.token {
                Some(token) => (token.clone(), s.generation),
                None => {
                    debug!("refresh_me without a token; nothing to do");
                    return;
                }
            }
        };

        match self.api.me(&token).await {
            Ok(user) => {
                if !self.set_user_if_current(generation, user) {
                    debug!(generation, "discarding profile for superseded session");
                }
            }
            Err(ApiError::Unauthorized) => self.force_sign_out(generation).await,
            Err(e) => {
                warn!(generation, code = e.error_code(), error = %e, "profile refresh failed");
            }
        }
    }

    /// One corrective `refresh_me` per token when signed in without a user.
    pub async fn ensure_user(&self) {
        let generation = {
            let s = self.state.borrow();
            if !s.is_logged_in() || s.user.is_some() {
                return;
            }
            s.generation
        };
        if !self.spend_corrective_refresh(generation) {
            debug!(generation, "corrective profile fetch already attempted");
            return;
        }
        self.refresh_me().await;
    }

    /// Claim the single corrective fetch for `generation`. `false` if already claimed.
    fn spend_corrective_refresh(&self, generation: u64) -> bool {
        let mut spent = self
            .corrective_refresh
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *spent == Some(generation) {
            return false;
        }
        *spent = Some(generation);
        true
    }

    async fn force_sign_out(&self, rejected: u64) {
        let mut cleared = None;
        self.state.send_if_modified(|s| {
            if s.generation != rejected || s.token.is_none() {
                return false;
            }
            let next = s.generation + 1;
            *s = Session::logged_out(next);
            cleared = Some(next);
            true
        });

        match cleared {
            Some(generation) => {
                warn!(rejected, "token rejected by identity server; forcing sign-out");
                self.persist(generation, None).await;
            }
            None => debug!(rejected, "rejected token already replaced; no forced sign-out"),
        }
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    /// Replace the whole session with a new generation. Returns that generation.
    fn replace(&self, build: impl FnOnce(u64) -> Session) -> u64 {
        let mut generation = 0;
        self.state.send_modify(|s| {
            generation = s.generation + 1;
            *s = build(generation);
        });
        generation
    }

    fn set_user_if_current(&self, generation: u64, user: User) -> bool {
        self.state.send_if_modified(|s| {
            if s.generation != generation || s.token.is_none() {
                return false;
            }
            s.user = Some(user);
            true
        })
    }

    /// Write (or remove) the token unless a newer generation already wrote.
    async fn persist(&self, generation: u64, token: Option<&Token>) {
        let mut written = self.persisted.lock().await;
        if *written > generation {
            debug!(generation, newer = *written, "skipping superseded token store write");
            return;
        }

        let result = match token {
            Some(token) => self.store.set(AUTH_TOKEN_KEY, token.as_str()).await,
            None => self.store.remove(AUTH_TOKEN_KEY).await,
        };
        if let Err(e) = result {
            warn!(generation, code = e.error_code(), error = %e, "token store write failed");
        }
        *written = generation;
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
