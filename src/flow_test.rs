use super::*;
use crate::api::{ApiError, Token};
use crate::error::ErrorCode;
use crate::gate::{NavigationGate, RouteLocation, RoutePolicy};
use crate::session::Phase;
use crate::test_helpers::{self, Call, MockAuthApi};

async fn flow() -> (AuthFlow, Arc<SessionManager>, Arc<MockAuthApi>) {
    let (session, api, _store) = test_helpers::manager(None);
    session.hydrate().await;
    (AuthFlow::new(api.clone(), session.clone()), session, api)
}

fn bo() -> crate::api::User {
    test_helpers::user("2", "bo", "a@a.com")
}

// =============================================================================
// validation
// =============================================================================

#[test]
fn normalize_email_accepts_single_at() {
    assert_eq!(normalize_email("  A@Example.COM "), Some("a@example.com".into()));
    assert_eq!(normalize_email("a@b"), Some("a@b".into()));
}

#[test]
fn normalize_email_rejects_malformed() {
    for raw in ["", "   ", "plain", "@b.com", "a@", "a@b@c"] {
        assert_eq!(normalize_email(raw), None, "{raw}");
    }
}

#[tokio::test]
async fn invalid_input_makes_no_call_and_unlocks() {
    let (flow, _session, api) = flow().await;

    let err = flow.login("nope", "pw").await.unwrap_err();
    assert_eq!(err.error_code(), "E_VALIDATION");
    assert_eq!(err.user_message(), "Enter a valid email address.");

    let err = flow.login("a@a.com", "").await.unwrap_err();
    assert_eq!(err.user_message(), "Enter your password.");

    let err = flow.register("  ", "a@a.com", "pw").await.unwrap_err();
    assert_eq!(err.user_message(), "Choose a username.");

    assert!(api.calls().is_empty());
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
}

#[tokio::test]
async fn login_sends_normalized_email() {
    let (flow, _session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));

    flow.login("  A@A.com ", "pw").await.unwrap();

    assert_eq!(api.calls(), vec![Call::Login { email: "a@a.com".into() }]);
}

// =============================================================================
// staged commit
// =============================================================================

#[tokio::test]
async fn login_stages_without_signing_in() {
    let (flow, session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));

    assert_eq!(flow.login("a@a.com", "pw").await.unwrap(), FlowOutcome::Staged);

    assert_eq!(session.phase(), Phase::LoggedOut);
    assert!(flow.has_pending_commit());
    assert_eq!(flow.lock_state(), SubmitState::SuccessPending);
    assert!(!flow.submit_enabled());
}

#[tokio::test]
async fn login_then_notification_redirects_home() {
    let (flow, session, api) = flow().await;
    let mut gate = NavigationGate::new(RoutePolicy::default());
    gate.on_session_change(session.phase());
    gate.on_splash_finished();
    assert_eq!(gate.on_route_change(RouteLocation::parse("(auth)/login")), None);

    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));
    flow.login("a@a.com", "pw").await.unwrap();
    assert_eq!(gate.on_session_change(session.phase()), None);

    let Flush::Committed(committed) = flow.notification_finished().await else {
        panic!("expected a commit");
    };
    assert_eq!(committed.token().map(Token::as_str), Some("tok1"));
    assert_eq!(committed.user(), Some(&bo()));
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
    assert!(flow.submit_enabled());

    assert_eq!(gate.on_session_change(committed.phase()), Some(RoutePolicy::default().home()));
}

#[tokio::test]
async fn notification_without_staged_result_does_nothing() {
    let (flow, session, _api) = flow().await;

    assert_eq!(flow.notification_finished().await, Flush::Empty);
    assert_eq!(session.phase(), Phase::LoggedOut);
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
}

#[tokio::test]
async fn second_notification_does_not_recommit() {
    let (flow, session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));
    flow.login("a@a.com", "pw").await.unwrap();

    assert!(flow.notification_finished().await.is_committed());
    let generation = session.snapshot().generation();
    assert_eq!(flow.notification_finished().await, Flush::Empty);
    assert_eq!(session.snapshot().generation(), generation);
}

#[tokio::test]
async fn submit_while_success_pending_is_busy() {
    let (flow, _session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));
    flow.login("a@a.com", "pw").await.unwrap();

    let err = flow.login("a@a.com", "pw").await.unwrap_err();
    assert!(matches!(err, FlowError::Busy));
    assert_eq!(api.calls().len(), 1);
    assert_eq!(flow.lock_state(), SubmitState::SuccessPending);
}

#[tokio::test]
async fn register_stages_and_commits() {
    let (flow, session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok-new", None)));
    api.push_me(Ok(test_helpers::user("7", "newbie", "n@a.com")));

    assert_eq!(flow.register(" newbie ", "N@a.com", "pw").await.unwrap(), FlowOutcome::Staged);
    assert!(flow.notification_finished().await.is_committed());

    assert_eq!(
        api.calls(),
        vec![
            Call::Register { username: "newbie".into(), email: "n@a.com".into() },
            Call::Me { token: "tok-new".into() },
        ]
    );
    assert_eq!(session.snapshot().user().map(|u| u.username.as_str()), Some("newbie"));
}

// =============================================================================
// failures
// =============================================================================

#[tokio::test]
async fn network_failure_surfaces_and_unlocks() {
    let (flow, session, api) = flow().await;
    api.push_auth(Err(ApiError::Network("connection refused".into())));

    let err = flow.login("a@a.com", "pw").await.unwrap_err();

    assert_eq!(err.error_code(), "E_NETWORK");
    assert!(err.retryable());
    assert_eq!(err.user_message(), "Unable to reach the server. Check your connection and try again.");
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
    assert_eq!(session.phase(), Phase::LoggedOut);
    assert!(!flow.has_pending_commit());
}

#[tokio::test]
async fn failure_leaves_existing_session_alone() {
    let (session, api, _store) = test_helpers::manager(Some("abc123"));
    api.push_me(Ok(test_helpers::user("1", "ana", "a@a.com")));
    session.hydrate().await;
    let before = session.snapshot();
    let flow = AuthFlow::new(api.clone(), session.clone());
    api.push_auth(Err(ApiError::Auth { status: 401, message: "Invalid credentials".into(), code: None }));

    let err = flow.login("x@a.com", "bad").await.unwrap_err();

    assert_eq!(err.user_message(), "Something went wrong. Please try again.");
    assert_eq!(session.snapshot(), before);
}

#[tokio::test]
async fn deactivated_account_offers_reactivation() {
    let (flow, session, api) = flow().await;
    api.push_auth(Err(test_helpers::deactivated()));

    let outcome = flow.login("a@a.com", "pw").await.unwrap();

    assert_eq!(outcome, FlowOutcome::ReactivationOffered { email: "a@a.com".into() });
    assert_eq!(api.calls(), vec![Call::Login { email: "a@a.com".into() }]);
    assert_eq!(session.phase(), Phase::LoggedOut);
    assert!(!flow.has_pending_commit());
    assert_eq!(flow.reactivation_email().as_deref(), Some("a@a.com"));
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
}

#[tokio::test]
async fn reactivate_uses_offered_email() {
    let (flow, session, api) = flow().await;
    api.push_auth(Err(test_helpers::deactivated()));
    api.push_auth(Ok(test_helpers::auth_response("tok-re", Some(bo()))));
    flow.login("a@a.com", "pw").await.unwrap();

    assert_eq!(flow.reactivate("pw").await.unwrap(), FlowOutcome::Staged);
    assert_eq!(flow.reactivation_email(), None);
    assert!(flow.notification_finished().await.is_committed());

    assert_eq!(api.calls().last(), Some(&Call::Reactivate { email: "a@a.com".into() }));
    assert_eq!(session.snapshot().token().map(Token::as_str), Some("tok-re"));
}

#[tokio::test]
async fn reactivate_without_offer_is_rejected() {
    let (flow, _session, api) = flow().await;

    let err = flow.reactivate("pw").await.unwrap_err();

    assert!(matches!(err, FlowError::Validation(_)));
    assert!(api.calls().is_empty());
    assert_eq!(flow.lock_state(), SubmitState::Unlocked);
}

#[tokio::test]
async fn failed_login_for_another_account_drops_reactivation_offer() {
    let (flow, _session, api) = flow().await;
    api.push_auth(Err(test_helpers::deactivated()));
    api.push_auth(Err(ApiError::Auth { status: 401, message: "Invalid credentials".into(), code: None }));
    flow.login("a@a.com", "pw").await.unwrap();

    flow.login("other@b.com", "secret").await.unwrap_err();

    assert_eq!(flow.reactivation_email(), None);
    let err = flow.reactivate("secret").await.unwrap_err();
    assert!(matches!(err, FlowError::Validation(_)));
    assert_eq!(
        api.calls(),
        vec![Call::Login { email: "a@a.com".into() }, Call::Login { email: "other@b.com".into() }]
    );
}

#[tokio::test]
async fn rejected_input_also_drops_reactivation_offer() {
    let (flow, _session, api) = flow().await;
    api.push_auth(Err(test_helpers::deactivated()));
    flow.login("a@a.com", "pw").await.unwrap();

    flow.login("not-an-email", "pw").await.unwrap_err();

    assert_eq!(flow.reactivation_email(), None);
    assert_eq!(api.calls().len(), 1);
}

#[tokio::test]
async fn sign_out_clears_committed_session() {
    let (flow, session, api) = flow().await;
    api.push_auth(Ok(test_helpers::auth_response("tok1", Some(bo()))));
    flow.login("a@a.com", "pw").await.unwrap();
    flow.notification_finished().await;

    flow.sign_out().await;

    let snapshot = session.snapshot();
    assert_eq!(snapshot.phase(), Phase::LoggedOut);
    assert!(snapshot.token().is_none());
    assert!(snapshot.user().is_none());
}
