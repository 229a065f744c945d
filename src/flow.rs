//! Login / registration screen flow.
//!
//! A submit takes the [`SubmitLock`], validates input, calls the identity
//! server, and on success stages the result in the [`PendingCommitQueue`]
//! instead of signing in. The session changes only when the host reports
//! that its success notification finished ([`AuthFlow::notification_finished`]).
//!
//! ERROR HANDLING
//! ==============
//! Errors from the identity server are returned to the caller for display
//! (see [`FlowError::user_message`]). A deactivated account is not an error:
//! it yields [`FlowOutcome::ReactivationOffered`] and the email is kept for
//! [`AuthFlow::reactivate`].

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::api::{ApiError, AuthApi, AuthResponse};
use crate::error::ErrorCode;
use crate::pending::{Flush, LockError, PendingCommitQueue, SubmitLock, SubmitState};
use crate::session::SessionManager;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// Success is staged; call `notification_finished` to apply it.
    Staged,
    /// The account is deactivated and may be reactivated.
    ReactivationOffered { email: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("a submission is already in progress")]
    Busy,

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl FlowError {
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Busy => "Please wait for the current request to finish.".to_owned(),
            Self::Validation(message) => message.clone(),
            Self::Api(e) => e.user_message(),
        }
    }
}

impl ErrorCode for FlowError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Busy => "E_BUSY",
            Self::Validation(_) => "E_VALIDATION",
            Self::Api(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Busy => true,
            Self::Validation(_) => false,
            Self::Api(e) => e.retryable(),
        }
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

/// Trim and lowercase; `None` unless exactly one `@` with text on both sides.
#[must_use]
pub fn normalize_email(email: &str) -> Option<String> {
    let normalized = email.trim().to_ascii_lowercase();
    let mut parts = normalized.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) if !local.is_empty() && !domain.is_empty() => Some(normalized),
        _ => None,
    }
}

fn validate_email(email: &str) -> Result<String, FlowError> {
    normalize_email(email).ok_or_else(|| FlowError::Validation("Enter a valid email address.".into()))
}

fn validate_password(password: &str) -> Result<(), FlowError> {
    if password.is_empty() {
        return Err(FlowError::Validation("Enter your password.".into()));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<String, FlowError> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err(FlowError::Validation("Choose a username.".into()));
    }
    Ok(trimmed.to_owned())
}

// =============================================================================
// FLOW
// =============================================================================

pub struct AuthFlow {
    api: Arc<dyn AuthApi>,
    session: Arc<SessionManager>,
    queue: PendingCommitQueue,
    lock: SubmitLock,
    deactivated_email: Mutex<Option<String>>,
}

impl AuthFlow {
    #[must_use]
    pub fn new(api: Arc<dyn AuthApi>, session: Arc<SessionManager>) -> Self {
        Self {
            api,
            queue: PendingCommitQueue::new(session.clone()),
            session,
            lock: SubmitLock::new(),
            deactivated_email: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    #[must_use]
    pub fn lock_state(&self) -> SubmitState {
        self.lock.state()
    }

    #[must_use]
    pub fn submit_enabled(&self) -> bool {
        self.lock.controls_enabled()
    }

    #[must_use]
    pub fn has_pending_commit(&self) -> bool {
        self.queue.is_pending()
    }

    /// Email of the deactivated account from the last login attempt, if any.
    #[must_use]
    pub fn reactivation_email(&self) -> Option<String> {
        self.deactivated_email
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// # Errors
    ///
    /// [`FlowError::Busy`] while another submission is in flight, otherwise
    /// validation or identity server failures.
    pub async fn login(&self, email: &str, password: &str) -> Result<FlowOutcome, FlowError> {
        self.lock.begin().map_err(|_| FlowError::Busy)?;
        self.forget_reactivation();
        let email = match validate_email(email).and_then(|email| validate_password(password).map(|()| email)) {
            Ok(email) => email,
            Err(e) => return Err(self.settle_error(e)),
        };

        match self.api.login(&email, password).await {
            Ok(response) => Ok(self.stage(response)),
            Err(e) if e.is_deactivated() => {
                info!("account deactivated; offering reactivation");
                log_lock_error(self.lock.fail().and_then(|()| self.lock.release()));
                *self
                    .deactivated_email
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(email.clone());
                Ok(FlowOutcome::ReactivationOffered { email })
            }
            Err(e) => Err(self.settle_error(e.into())),
        }
    }

    /// # Errors
    ///
    /// Same as [`AuthFlow::login`].
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<FlowOutcome, FlowError> {
        self.lock.begin().map_err(|_| FlowError::Busy)?;
        self.forget_reactivation();
        let validated = validate_username(username)
            .and_then(|username| validate_email(email).map(|email| (username, email)))
            .and_then(|fields| validate_password(password).map(|()| fields));
        let (username, email) = match validated {
            Ok(fields) => fields,
            Err(e) => return Err(self.settle_error(e)),
        };

        match self.api.register(&username, &email, password).await {
            Ok(response) => Ok(self.stage(response)),
            Err(e) => Err(self.settle_error(e.into())),
        }
    }

    /// Reactivate the account offered by the last login attempt.
    ///
    /// # Errors
    ///
    /// [`FlowError::Validation`] if no reactivation was offered, otherwise
    /// the same as [`AuthFlow::reactivate_with`].
    pub async fn reactivate(&self, password: &str) -> Result<FlowOutcome, FlowError> {
        let Some(email) = self.reactivation_email() else {
            return Err(FlowError::Validation("There is no deactivated account to reactivate.".into()));
        };
        self.reactivate_with(&email, password).await
    }

    /// # Errors
    ///
    /// Same as [`AuthFlow::login`].
    pub async fn reactivate_with(&self, email: &str, password: &str) -> Result<FlowOutcome, FlowError> {
        self.lock.begin().map_err(|_| FlowError::Busy)?;
        let email = match validate_email(email).and_then(|email| validate_password(password).map(|()| email)) {
            Ok(email) => email,
            Err(e) => return Err(self.settle_error(e)),
        };

        match self.api.reactivate(&email, password).await {
            Ok(response) => Ok(self.stage(response)),
            Err(e) => Err(self.settle_error(e.into())),
        }
    }

    /// The host's success notification finished: apply the staged result.
    ///
    /// Returns after `sign_in` has resolved, so a redirect computed from the
    /// returned session already sees it.
    pub async fn notification_finished(&self) -> Flush {
        let flushed = self.queue.flush().await;
        if flushed.is_committed() {
            log_lock_error(self.lock.commit().and_then(|()| self.lock.release()));
        }
        flushed
    }

    pub async fn sign_out(&self) {
        self.session.sign_out().await;
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn stage(&self, response: AuthResponse) -> FlowOutcome {
        info!(has_user = response.user.is_some(), "auth succeeded; staging sign-in");
        self.forget_reactivation();
        self.queue.enqueue(response.token, response.user);
        log_lock_error(self.lock.succeed());
        FlowOutcome::Staged
    }

    /// A new attempt supersedes any earlier reactivation offer.
    fn forget_reactivation(&self) {
        self.deactivated_email
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
    }

    /// Surface `error` and return the lock to `Unlocked`.
    fn settle_error(&self, error: FlowError) -> FlowError {
        if !matches!(error, FlowError::Validation(_)) {
            warn!(code = error.error_code(), error = %error, "auth request failed");
        }
        log_lock_error(self.lock.fail().and_then(|()| self.lock.release()));
        error
    }
}

fn log_lock_error(result: Result<(), LockError>) {
    if let Err(e) = result {
        warn!(code = e.error_code(), error = %e, "unexpected submit lock state");
    }
}

#[cfg(test)]
#[path = "flow_test.rs"]
mod tests;
