//! End-to-end: a real server on an ephemeral port, a client-side
//! `SessionAuthority` talking to it through `HttpAuthStore`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;

use donation_ledger::config::ServerConfig;
use donation_ledger::identity::{AuthError, AuthPhase, AuthStore, ClientConfig, HttpAuthStore, SessionAuthority, TokenCache};
use donation_ledger::notify::{NoticeLevel, NoticeLog};
use donation_ledger::server::{router, AppState};

// Bind port 0, serve the router in the background and hand back the address.
async fn start_server_ephemeral() -> Result<(SocketAddr, AppState)> {
    let cfg = ServerConfig {
        admin_password: Some("hunter2".into()),
        bootstrap_admin: Some(("admin@x.com".into(), "adminpass".into())),
        ..Default::default()
    };
    let state = AppState::from_config(&cfg)?;
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let app = router(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((addr, state))
}

fn authority(addr: SocketAddr, cache: TokenCache) -> Result<(SessionAuthority, NoticeLog)> {
    let store = HttpAuthStore::new(ClientConfig::new(format!("http://{}", addr)), cache)?;
    let log = NoticeLog::new();
    Ok((SessionAuthority::new(Arc::new(store), Arc::new(log.clone())), log))
}

#[tokio::test]
async fn unregistered_identity_is_rejected() -> Result<()> {
    let (addr, _) = start_server_ephemeral().await?;
    let (auth, log) = authority(addr, TokenCache::memory())?;
    auth.initialize().await;
    assert!(!auth.login("nobody@x.com", "whatever1").await);
    assert!(!auth.is_authorized());
    assert_eq!(log.last_error(), Some(AuthError::InvalidCredentials));
    Ok(())
}

#[tokio::test]
async fn member_without_grant_is_signed_out() -> Result<()> {
    let (addr, _) = start_server_ephemeral().await?;
    let dir = tempdir()?;
    let cache_path = dir.path().join("session.json");
    let (auth, log) = authority(addr, TokenCache::file(&cache_path))?;
    auth.initialize().await;

    // Signup never authorizes, even on success.
    assert!(!auth.signup("a@x.com", "secret1").await);
    assert!(!auth.is_authorized());
    assert!(log.notices().iter().any(|n| n.level == NoticeLevel::Info && n.error.is_none()));

    assert!(!auth.login("a@x.com", "secret1").await);
    assert!(!auth.is_authorized());
    assert_eq!(log.last_error(), Some(AuthError::InsufficientRole));
    assert_eq!(auth.current_authorization().phase, AuthPhase::Unauthenticated);
    // The forced sign-out also drops the persisted token.
    assert!(TokenCache::file(&cache_path).load().is_none());
    Ok(())
}

#[tokio::test]
async fn weak_signup_reports_minimum_length() -> Result<()> {
    let (addr, _) = start_server_ephemeral().await?;
    let (auth, log) = authority(addr, TokenCache::memory())?;
    auth.initialize().await;
    assert!(!auth.signup("b@x.com", "123").await);
    assert_eq!(log.last_error(), Some(AuthError::WeakCredential { min_len: 6 }));
    assert!(!auth.is_authorized());
    Ok(())
}

#[tokio::test]
async fn admin_session_survives_restart_until_logout() -> Result<()> {
    let (addr, _) = start_server_ephemeral().await?;
    let dir = tempdir()?;
    let cache_path = dir.path().join("session.json");

    let (first, _) = authority(addr, TokenCache::file(&cache_path))?;
    first.initialize().await;
    assert!(first.login("admin@x.com", "adminpass").await);
    assert!(first.is_authorized());
    let who = first.current_authorization().principal.expect("principal");
    assert_eq!(who.email, "admin@x.com");
    drop(first);

    // A fresh process restores the persisted session and re-checks the grant.
    let (second, _) = authority(addr, TokenCache::file(&cache_path))?;
    let snap = second.initialize().await;
    assert!(snap.is_authorized);
    assert!(!snap.is_loading);

    second.logout().await;
    assert!(!second.is_authorized());
    drop(second);

    let (third, _) = authority(addr, TokenCache::file(&cache_path))?;
    let snap = third.initialize().await;
    assert!(!snap.is_authorized);
    assert_eq!(snap.phase, AuthPhase::Unauthenticated);
    Ok(())
}

#[tokio::test]
async fn relogin_over_http_ends_the_replaced_session() -> Result<()> {
    let (addr, state) = start_server_ephemeral().await?;
    let store = HttpAuthStore::new(ClientConfig::new(format!("http://{}", addr)), TokenCache::memory())?;
    let first = store.sign_in("admin@x.com", "adminpass").await?;
    let second = store.sign_in("admin@x.com", "adminpass").await?;
    let uid = &second.principal.user_id;
    assert_eq!(state.backend.sessions.active_for_user(uid), 1);
    assert!(state.backend.session(&first.token).is_none());
    assert!(state.backend.session(&second.token).is_some());
    Ok(())
}

#[tokio::test]
async fn failed_relogin_over_http_does_not_survive_restart() -> Result<()> {
    let (addr, state) = start_server_ephemeral().await?;
    let dir = tempdir()?;
    let cache_path = dir.path().join("session.json");

    let (first, log) = authority(addr, TokenCache::file(&cache_path))?;
    first.initialize().await;
    assert!(first.login("admin@x.com", "adminpass").await);
    let uid = first.current_authorization().principal.expect("principal").user_id;
    assert!(!first.login("admin@x.com", "typo").await);
    assert_eq!(log.last_error(), Some(AuthError::InvalidCredentials));
    assert_eq!(state.backend.sessions.active_for_user(&uid), 0);
    drop(first);

    let (second, _) = authority(addr, TokenCache::file(&cache_path))?;
    assert!(!second.initialize().await.is_authorized);
    Ok(())
}

#[tokio::test]
async fn unreachable_server_counts_as_unauthenticated() -> Result<()> {
    let store = HttpAuthStore::new(ClientConfig::new("http://127.0.0.1:9"), TokenCache::memory())?;
    let log = NoticeLog::new();
    let auth = SessionAuthority::new(Arc::new(store), Arc::new(log.clone()));
    let snap = auth.initialize().await;
    assert!(!snap.is_authorized);
    assert!(!snap.is_loading);
    assert!(!auth.login("admin@x.com", "adminpass").await);
    assert!(matches!(log.last_error(), Some(AuthError::StoreUnavailable { .. })));
    Ok(())
}
