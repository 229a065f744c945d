//! # session-gate
//!
//! Client-side session lifecycle and navigation gating.
//!
//! ARCHITECTURE
//! ============
//! Components, leaves first:
//! - [`store`] persists one secret string (the auth token) across restarts.
//! - [`api`] is the narrow request/response contract with the identity server.
//! - [`session`] owns the session state machine and reconciles the stored
//!   token with the identity server.
//! - [`pending`] stages a sign-in result until the UI says it may be applied.
//! - [`gate`] turns (phase, route) into allow / hold / redirect decisions.
//! - [`flow`] is what a login or registration screen drives.
//!
//! Everything is explicitly constructed at process start and passed by
//! reference; there are no process-wide statics.

pub mod api;
pub mod config;
pub mod error;
pub mod flow;
pub mod gate;
pub mod pending;
pub mod session;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

pub use api::{AuthApi, AuthResponse, User};
pub use config::ClientConfig;
pub use error::ErrorCode;
pub use flow::{AuthFlow, FlowError, FlowOutcome};
pub use gate::{Action, NavigationGate, RouteLocation, RoutePolicy};
pub use pending::{Flush, PendingCommitQueue, SubmitLock, SubmitState};
pub use session::{Phase, Session, SessionManager};
pub use store::{AUTH_TOKEN_KEY, FileTokenStore, MemoryTokenStore, TokenStore};
