use std::sync::atomic::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};

use super::backend::{
    mint_token, BANNED_EMAIL, BAN_REASON, DOCTOR_EMAIL, DOCTOR_ID, PASSWORD, UNVERIFIED_EMAIL,
};
use super::helpers::{create_client, drain_events, setup_backend, test_config, wait_for_event};
use crate::db::{keys, MemoryStorage, Storage};
use crate::error::AuthError;
use crate::models::{AuthToken, AuthenticatedUser, LogoutReason, SessionEvent};
use crate::services::AuthService;
use crate::utils::ManualClock;

#[tokio::test]
async fn test_login_persists_token_user_and_server_session_id() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    let mut events = auth.subscribe();

    assert!(!auth.restore().await.unwrap());
    let client_session_id = auth.session_id().expect("generated on restore");

    let user = auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    assert_eq!(user.id, DOCTOR_ID);
    assert!(user.has_role("doctor"));
    assert!(user.has_permission("appointments:read"));

    let server_session_id = backend.state.current_session(DOCTOR_ID).unwrap();
    let session_id = auth.session_id().unwrap();
    assert_eq!(session_id.as_str(), server_session_id);
    assert_ne!(session_id, client_session_id);

    let token = auth.current_token().unwrap();
    assert_eq!(
        storage.get(keys::ACCESS_TOKEN).await.unwrap().as_deref(),
        Some(token.as_str())
    );
    assert_eq!(
        storage.get(keys::SESSION_ID).await.unwrap(),
        Some(server_session_id)
    );
    assert_eq!(
        storage.get(keys::AUTHENTICATED).await.unwrap().as_deref(),
        Some("true")
    );
    let stored_user: AuthenticatedUser =
        serde_json::from_str(&storage.get(keys::USER).await.unwrap().unwrap()).unwrap();
    assert_eq!(stored_user, user);

    assert!(auth.is_authenticated());
    assert!(auth.is_heartbeat_running());
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, SessionEvent::LoggedIn { .. })).await,
        SessionEvent::LoggedIn { user_id: DOCTOR_ID }
    );
}

#[tokio::test]
async fn test_login_with_wrong_password_is_rejected() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));

    let result = auth.login(DOCTOR_EMAIL, "wrong-password").await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
    assert!(!auth.is_authenticated());
    assert!(!auth.is_heartbeat_running());
    assert_eq!(storage.get(keys::ACCESS_TOKEN).await.unwrap(), None);
}

#[tokio::test]
async fn test_login_with_unknown_email_is_rejected() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));

    let result = auth.login("nobody@hospital.test", PASSWORD).await;

    assert!(matches!(result, Err(AuthError::InvalidCredentials)));
}

#[tokio::test]
async fn test_unverified_account_asks_for_verification() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));
    let mut events = auth.subscribe();

    let result = auth.login(UNVERIFIED_EMAIL, PASSWORD).await;

    match result {
        Err(AuthError::Unverified { email }) => assert_eq!(email, UNVERIFIED_EMAIL),
        other => panic!("expected unverified error, got {other:?}"),
    }
    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::VerificationRequired {
            email: UNVERIFIED_EMAIL.to_string()
        }]
    );
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_banned_account_reports_reason() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));
    let mut events = auth.subscribe();

    let result = auth.login(BANNED_EMAIL, PASSWORD).await;

    match result {
        Err(AuthError::Banned { reason }) => assert_eq!(reason.as_deref(), Some(BAN_REASON)),
        other => panic!("expected banned error, got {other:?}"),
    }
    assert!(drain_events(&mut events).is_empty());
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_logout_clears_local_state_when_server_fails() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    storage.set(keys::LANGUAGE, "de").await.unwrap();
    storage.set(keys::DARK_MODE, "true").await.unwrap();
    let mut events = auth.subscribe();

    backend
        .state
        .fail_logout
        .store(true, std::sync::atomic::Ordering::SeqCst);
    auth.logout().await;

    assert_eq!(backend.state.logout_calls(), 1);
    assert!(storage.is_empty());
    let snapshot = auth.snapshot();
    assert!(snapshot.token.is_none());
    assert!(snapshot.user.is_none());
    assert!(snapshot.session_id.is_none());
    assert!(!auth.is_authenticated());
    assert!(!auth.is_heartbeat_running());
    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequested
        }]
    );
}

#[tokio::test]
async fn test_logout_ends_server_session() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();

    auth.logout().await;

    assert_eq!(backend.state.current_session(DOCTOR_ID), None);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_logout_without_session_skips_server_call() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));

    auth.logout().await;

    assert_eq!(backend.state.logout_calls(), 0);
    assert!(!auth.is_authenticated());
}

#[tokio::test]
async fn test_restore_resumes_persisted_session() {
    let backend = setup_backend().await;
    let storage = Arc::new(MemoryStorage::new());

    let first = AuthService::new(test_config(&backend), storage.clone()).unwrap();
    let user = first.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    let token = first.current_token().unwrap();
    drop(first);

    let second = AuthService::new(test_config(&backend), storage.clone()).unwrap();
    assert!(second.restore().await.unwrap());

    assert_eq!(second.current_user(), Some(user));
    assert_eq!(second.current_token(), Some(token));
    assert_eq!(
        second.session_id().map(|s| s.to_string()),
        backend.state.current_session(DOCTOR_ID)
    );
    assert!(second.is_heartbeat_running());
}

#[tokio::test]
async fn test_restore_with_expired_token_does_not_start_heartbeat() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    let past = Utc::now() - Duration::hours(2);
    storage
        .set(keys::ACCESS_TOKEN, &mint_token(past.timestamp(), past.timestamp() - 3600))
        .await
        .unwrap();
    storage
        .set(
            keys::USER,
            r#"{"id":1,"email":"doctor@hospital.test","roles":["doctor"]}"#,
        )
        .await
        .unwrap();

    assert!(!auth.restore().await.unwrap());
    assert!(auth.is_token_expired());
    assert!(!auth.is_heartbeat_running());
}

#[tokio::test]
async fn test_restore_discards_unparseable_token() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    storage.set(keys::ACCESS_TOKEN, "not-a-jwt").await.unwrap();
    storage.set(keys::AUTHENTICATED, "true").await.unwrap();

    assert!(!auth.restore().await.unwrap());

    assert_eq!(auth.current_token(), None);
    assert_eq!(storage.get(keys::ACCESS_TOKEN).await.unwrap(), None);
    assert_eq!(storage.get(keys::AUTHENTICATED).await.unwrap(), None);
    assert!(storage.get(keys::SESSION_ID).await.unwrap().is_some());
}

#[tokio::test]
async fn test_token_expiry_follows_the_clock() {
    let backend = setup_backend().await;
    let storage = Arc::new(MemoryStorage::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let auth = AuthService::with_clock(test_config(&backend), storage, clock.clone()).unwrap();

    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    let token = auth.current_token().unwrap();
    let issued_at = token.issued_at().unwrap();
    assert_eq!(token.expires_at().unwrap() - issued_at, Duration::hours(1));

    clock.set(issued_at);
    assert!(!auth.is_token_expiring_soon(900));
    assert!(!auth.is_token_expired());

    clock.advance(Duration::minutes(45) + Duration::seconds(1));
    assert!(auth.is_token_expiring_soon(900));
    assert!(!auth.is_token_expired());

    clock.advance(Duration::minutes(15));
    assert!(auth.is_token_expired());
}

#[test]
fn test_token_is_expired_exactly_at_exp() {
    let exp = Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap();
    let token = AuthToken::parse(mint_token(exp.timestamp(), exp.timestamp() - 3600)).unwrap();

    assert!(token.is_expired_at(exp));
    assert!(token.is_expired_at(exp + Duration::seconds(1)));
    assert!(!token.is_expired_at(exp - Duration::seconds(1)));

    assert!(token.expires_within(Duration::seconds(900), exp - Duration::seconds(900)));
    assert!(!token.expires_within(Duration::seconds(900), exp - Duration::seconds(901)));
}

#[test]
fn test_garbage_token_does_not_parse() {
    assert!(AuthToken::parse("not-a-jwt").is_err());
    assert!(AuthToken::parse("").is_err());
}

#[tokio::test]
async fn test_missing_token_counts_as_expired() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));

    assert!(auth.is_token_expired());
    assert!(auth.is_token_expiring_soon(0));
}

#[tokio::test]
async fn test_refresh_without_token_makes_no_request() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));

    let result = auth.refresh_token().await;

    assert!(matches!(result, Err(AuthError::NotAuthenticated)));
    assert_eq!(backend.state.refresh_calls(), 0);
}

#[tokio::test]
async fn test_refresh_replaces_token() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    let before = auth.current_token().unwrap();
    let session_id = auth.session_id();

    let refreshed = auth.refresh_token().await.unwrap();

    assert_ne!(refreshed, before);
    assert_eq!(auth.current_token(), Some(refreshed.clone()));
    assert_eq!(auth.session_id(), session_id);
    assert_eq!(
        storage.get(keys::ACCESS_TOKEN).await.unwrap().as_deref(),
        Some(refreshed.as_str())
    );
    assert_eq!(backend.state.refresh_calls(), 1);
}

#[tokio::test]
async fn test_logout_wins_over_refresh_in_flight() {
    let backend = setup_backend().await;
    let (auth, storage) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    let mut events = auth.subscribe();

    let refreshing = tokio::spawn({
        let auth = auth.clone();
        async move { auth.refresh_token().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    // the server keeps the session, so the refresh itself succeeds
    backend.state.fail_logout.store(true, Ordering::SeqCst);
    auth.logout().await;

    assert!(refreshing.await.unwrap().is_err());
    assert!(!auth.is_authenticated());
    assert_eq!(auth.current_token(), None);
    assert_eq!(storage.get(keys::ACCESS_TOKEN).await.unwrap(), None);
    assert_eq!(storage.get(keys::AUTHENTICATED).await.unwrap(), None);
    assert_eq!(
        drain_events(&mut events),
        vec![SessionEvent::LoggedOut {
            reason: LogoutReason::UserRequested
        }]
    );
}

#[tokio::test]
async fn test_stale_refresh_leaves_new_login_alone() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();

    let refreshing = tokio::spawn({
        let auth = auth.clone();
        async move { auth.refresh_token().await }
    });
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    auth.logout().await;
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();
    let token = auth.current_token().unwrap();
    let mut events = auth.subscribe();

    assert!(refreshing.await.unwrap().is_err());
    assert_eq!(auth.current_token(), Some(token));
    assert!(auth.is_authenticated());
    assert!(auth.is_heartbeat_running());
    assert!(drain_events(&mut events).is_empty());

    // a fresh refresh does not join the stale one
    assert!(auth.refresh_token().await.is_ok());
}

#[tokio::test]
async fn test_extreme_thresholds_do_not_panic() {
    let backend = setup_backend().await;
    let (auth, _) = create_client(test_config(&backend));
    auth.login(DOCTOR_EMAIL, PASSWORD).await.unwrap();

    assert!(auth.is_token_expiring_soon(i64::MAX));
    assert!(!auth.is_token_expiring_soon(i64::MIN));
}

#[test]
fn test_far_future_expiry_does_not_overflow() {
    let token = AuthToken::parse(mint_token(i64::MAX, 0)).unwrap();

    assert!(!token.is_expired_at(Utc::now()));
    assert!(!token.expires_within(Duration::seconds(900), Utc::now()));
    assert!(!token.expires_within(Duration::seconds(900), DateTime::<Utc>::MIN_UTC));
}
