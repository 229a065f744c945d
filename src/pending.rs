//! Deferred sign-in commits and the submit lock that guards them.
//!
//! DESIGN
//! ======
//! A successful login is not applied right away. The screen shows its
//! success notification first, and only when that finishes does it call
//! [`PendingCommitQueue::flush`], which applies the session. The queue holds
//! one slot: a newer enqueue replaces an older one. Timers and animations are
//! not part of this module; whatever ends the notification simply calls
//! `flush`.
//!
//! The slot is taken before the commit starts, so a second `flush` racing
//! the first finds it empty and does nothing.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::api::{Token, User};
use crate::error::ErrorCode;
use crate::session::{Session, SessionManager};

// =============================================================================
// PENDING COMMIT QUEUE
// =============================================================================

/// A staged sign-in result. Exists only in memory.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub token: Token,
    pub user: Option<User>,
    pub created_at: Instant,
}

impl PendingCommit {
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Result of [`PendingCommitQueue::flush`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flush {
    /// Nothing was staged.
    Empty,
    /// The staged result was applied; carries the session right after `sign_in`.
    Committed(Session),
}

impl Flush {
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}

pub struct PendingCommitQueue {
    session: Arc<SessionManager>,
    slot: Mutex<Option<PendingCommit>>,
}

impl PendingCommitQueue {
    #[must_use]
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session, slot: Mutex::new(None) }
    }

    /// Stage a result, replacing anything already staged.
    pub fn enqueue(&self, token: Token, user: Option<User>) {
        let replaced = self
            .slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .replace(PendingCommit { token, user, created_at: Instant::now() });
        if let Some(old) = replaced {
            debug!(age_ms = old.age().as_millis(), "replaced staged sign-in");
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .is_some()
    }

    /// Drop the staged result without applying it.
    pub fn discard(&self) -> bool {
        self.take().is_some()
    }

    /// Apply the staged result, if any. Returns only after `sign_in` resolved.
    pub async fn flush(&self) -> Flush {
        let Some(pending) = self.take() else {
            debug!("flush with nothing staged");
            return Flush::Empty;
        };

        let age_ms = pending.age().as_millis();
        self.session.sign_in(pending.token, pending.user).await;
        let session = self.session.snapshot();
        info!(age_ms, generation = session.generation(), "staged sign-in committed");
        Flush::Committed(session)
    }

    fn take(&self) -> Option<PendingCommit> {
        self.slot
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
    }
}

// =============================================================================
// SUBMIT LOCK
// =============================================================================

/// Lock state of the screen that submits credentials.
///
/// `Unlocked -> Submitting -> {Error -> Unlocked, SuccessPending -> Committed -> Unlocked}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitState {
    Unlocked,
    Submitting,
    Error,
    SuccessPending,
    Committed,
}

impl SubmitState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unlocked => "unlocked",
            Self::Submitting => "submitting",
            Self::Error => "error",
            Self::SuccessPending => "success_pending",
            Self::Committed => "committed",
        }
    }
}

impl std::fmt::Display for SubmitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("cannot {action} while {from}")]
    InvalidTransition { from: SubmitState, action: &'static str },
}

impl ErrorCode for LockError {
    fn error_code(&self) -> &'static str {
        "E_LOCK_TRANSITION"
    }
}

#[derive(Debug)]
pub struct SubmitLock {
    state: Mutex<SubmitState>,
}

impl Default for SubmitLock {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmitLock {
    #[must_use]
    pub fn new() -> Self {
        Self { state: Mutex::new(SubmitState::Unlocked) }
    }

    #[must_use]
    pub fn state(&self) -> SubmitState {
        *self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Submission controls are disabled while a submit or a staged commit is in flight.
    #[must_use]
    pub fn controls_enabled(&self) -> bool {
        !matches!(self.state(), SubmitState::Submitting | SubmitState::SuccessPending)
    }

    /// # Errors
    ///
    /// Fails unless `Unlocked`.
    pub fn begin(&self) -> Result<(), LockError> {
        self.transition("submit", |s| matches!(s, SubmitState::Unlocked), SubmitState::Submitting)
    }

    /// # Errors
    ///
    /// Fails unless `Submitting`.
    pub fn fail(&self) -> Result<(), LockError> {
        self.transition("fail", |s| matches!(s, SubmitState::Submitting), SubmitState::Error)
    }

    /// # Errors
    ///
    /// Fails unless `Submitting`.
    pub fn succeed(&self) -> Result<(), LockError> {
        self.transition("stage success", |s| matches!(s, SubmitState::Submitting), SubmitState::SuccessPending)
    }

    /// # Errors
    ///
    /// Fails unless `SuccessPending`.
    pub fn commit(&self) -> Result<(), LockError> {
        self.transition("commit", |s| matches!(s, SubmitState::SuccessPending), SubmitState::Committed)
    }

    /// # Errors
    ///
    /// Fails unless `Error` or `Committed`.
    pub fn release(&self) -> Result<(), LockError> {
        self.transition(
            "release",
            |s| matches!(s, SubmitState::Error | SubmitState::Committed),
            SubmitState::Unlocked,
        )
    }

    fn transition(
        &self,
        action: &'static str,
        allowed: impl FnOnce(SubmitState) -> bool,
        to: SubmitState,
    ) -> Result<(), LockError> {
        let mut state = self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if !allowed(*state) {
            return Err(LockError::InvalidTransition { from: *state, action });
        }
        debug!(from = %*state, %to, "submit lock transition");
        *state = to;
        Ok(())
    }
}

#[cfg(test)]
#[path = "pending_test.rs"]
mod tests;
