use super::*;
use crate::auth::{Credential, CredentialProvider, LocalIssuer, TokenIssuer};
use crate::transport::ConnectionState;
use crate::transport::local::LocalBackbone;
use crate::utils::error::{AuthError, ProbeError, SessionError};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Counts requests so tests can assert that no network call happened.
struct CountingProvider {
    inner: LocalIssuer,
    calls: AtomicUsize,
}

#[async_trait]
impl CredentialProvider for CountingProvider {
    async fn request(&self, username: &str) -> Result<Credential, AuthError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.request(username).await
    }
}

struct RejectingProvider;

#[async_trait]
impl CredentialProvider for RejectingProvider {
    async fn request(&self, _username: &str) -> Result<Credential, AuthError> {
        Err(AuthError::CredentialRejected("500 Internal Server Error".into()))
    }
}

fn setup() -> (ConnectionManager, LocalBackbone, Arc<CountingProvider>) {
    let issuer = TokenIssuer::new("test-secret", 60);
    let backbone = LocalBackbone::new(issuer.clone());
    let provider = Arc::new(CountingProvider {
        inner: LocalIssuer::new(issuer),
        calls: AtomicUsize::new(0),
    });
    let manager = ConnectionManager::new(
        provider.clone(),
        Arc::new(backbone.clone()),
        ConnectionOptions::default(),
    );
    (manager, backbone, provider)
}

#[test]
fn test_channel_name_prefixes_room() {
    assert_eq!(channel_name("chat:", "lobby"), "chat:lobby");
    assert_ne!(channel_name("chat:", "a:b"), channel_name("chat:", "a"));
}

#[tokio::test]
async fn test_authenticate_connects() {
    let (manager, _, provider) = setup();
    let conn = manager.authenticate("alice").await.unwrap();

    assert_eq!(conn.state(), ConnectionState::Connected);
    assert_eq!(conn.client_id(), "alice");
    assert_eq!(conn.username(), "alice");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_blank_username_makes_no_network_call() {
    let (manager, _, provider) = setup();
    for name in ["", "   ", "\t\n"] {
        assert_eq!(
            manager.authenticate(name).await.unwrap_err(),
            AuthError::EmptyUsername
        );
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_credential_surfaces() {
    let issuer = TokenIssuer::new("test-secret", 60);
    let manager = ConnectionManager::new(
        Arc::new(RejectingProvider),
        Arc::new(LocalBackbone::new(issuer)),
        ConnectionOptions::default(),
    );
    assert!(matches!(
        manager.authenticate("alice").await,
        Err(AuthError::CredentialRejected(_))
    ));
}

#[tokio::test]
async fn test_unreachable_transport_surfaces() {
    let (manager, backbone, _) = setup();
    backbone.set_reachable(false);
    assert!(matches!(
        manager.authenticate("alice").await,
        Err(AuthError::TransportUnreachable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_connection_that_never_connects_times_out() {
    let (manager, backbone, _) = setup();
    backbone.stall_connect(true);

    let started = tokio::time::Instant::now();
    let err = manager.authenticate("alice").await.unwrap_err();
    assert!(matches!(err, AuthError::TransportUnreachable(_)));
    assert!(started.elapsed() >= Duration::from_millis(10_000));
}

#[tokio::test]
async fn test_get_channel_is_idempotent() {
    let (manager, _, _) = setup();
    let conn = manager.authenticate("alice").await.unwrap();

    let first = conn.channel("chat:lobby");
    let second = conn.channel("chat:lobby");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.name(), "chat:lobby");
}

#[tokio::test]
async fn test_ping_reports_latency_and_state_errors() {
    let (manager, backbone, _) = setup();
    let conn = manager.authenticate("alice").await.unwrap();

    backbone.script_pings([Some(42), None]);
    assert_eq!(conn.ping().await, Ok(42));
    assert_eq!(conn.ping().await, Err(ProbeError::Timeout));

    conn.close();
    assert_eq!(conn.state(), ConnectionState::Closed);
    assert_eq!(conn.ping().await, Err(ProbeError::NotConnected));
}

#[tokio::test]
async fn test_join_derives_channel_from_room() {
    let (manager, _, _) = setup();
    let conn = manager.authenticate("alice").await.unwrap();

    let session = conn.join("lobby").unwrap();
    assert_eq!(session.channel_name(), "chat:lobby");
    assert_eq!(session.identity().username, "alice");
    assert_eq!(conn.join("  ").unwrap_err(), SessionError::EmptyRoom);
}

#[tokio::test]
async fn test_rooms_differing_in_whitespace_do_not_collide() {
    let (manager, _, _) = setup();
    let conn = manager.authenticate("alice").await.unwrap();

    let plain = conn.join("lobby").unwrap();
    let padded = conn.join(" lobby").unwrap();
    assert_eq!(padded.channel_name(), "chat: lobby");
    assert_ne!(plain.channel_name(), padded.channel_name());
}

#[tokio::test]
async fn test_dropping_last_clone_closes_transport() {
    let (manager, _, _) = setup();
    let conn = manager.authenticate("alice").await.unwrap();
    let watcher = conn.watch_state();

    let clone = conn.clone();
    drop(conn);
    assert_eq!(*watcher.borrow(), ConnectionState::Connected);
    drop(clone);
    assert_eq!(*watcher.borrow(), ConnectionState::Closed);
}
