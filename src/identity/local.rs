use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use super::error::AuthError;
use super::principal::Principal;
use super::provider::{AuthBackend, AuthStore, LoginRequest, SessionChange, SessionEvent};
use super::roles::Role;
use super::session::Session;
use super::token_cache::TokenCache;

/// In-process client of an `AuthBackend`. Each instance models one client
/// process: it holds at most one session token in its cache.
pub struct LocalAuthStore {
    backend: Arc<AuthBackend>,
    cache: TokenCache,
    events: broadcast::Sender<SessionChange>,
}

impl LocalAuthStore {
    pub fn new(backend: Arc<AuthBackend>, cache: TokenCache) -> Self {
        let (events, _) = broadcast::channel(32);
        Self { backend, cache, events }
    }

    pub fn backend(&self) -> &Arc<AuthBackend> { &self.backend }

    fn emit(&self, change: SessionChange) {
        // No receivers is fine.
        let _ = self.events.send(change);
    }
}

#[async_trait]
impl AuthStore for LocalAuthStore {
    async fn sign_in(&self, identity: &str, secret: &str) -> Result<Session, AuthError> {
        let session = self.backend.authenticate(&LoginRequest { email: identity.to_string(), password: secret.to_string() })?;
        if let Some(prev) = self.cache.load() {
            self.backend.end_session(&prev);
        }
        self.cache.store(&session.token);
        self.emit(SessionChange::signed_in(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, identity: &str, secret: &str, redirect_to: Option<&str>) -> Result<Principal, AuthError> {
        if let Some(r) = redirect_to {
            debug!(target: "auth", redirect_to = r, "signup redirect requested");
        }
        self.backend.register(identity, secret)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let token = self.cache.clear();
        if let Some(t) = &token {
            self.backend.end_session(t);
            self.emit(SessionChange::ended(SessionEvent::SignedOut, token));
        }
        Ok(())
    }

    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let Some(token) = self.cache.load() else { return Ok(None); };
        match self.backend.session(&token) {
            Some(s) => Ok(Some(s)),
            None => {
                self.cache.clear();
                self.emit(SessionChange::ended(SessionEvent::Expired, Some(token)));
                Ok(None)
            }
        }
    }

    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, AuthError> {
        Ok(self.backend.has_role(user_id, role))
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionChange> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_in_caches_token_and_emits() {
        let backend = Arc::new(AuthBackend::default());
        backend.register("a@x.com", "secret1").unwrap();
        let store = LocalAuthStore::new(backend.clone(), TokenCache::memory());
        let mut rx = store.subscribe();

        let s = store.sign_in("a@x.com", "secret1").await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.event, SessionEvent::SignedIn);
        assert_eq!(change.token.as_deref(), Some(s.token.as_str()));
        assert_eq!(store.current_session().await.unwrap(), Some(s.clone()));

        store.sign_out().await.unwrap();
        let change = rx.recv().await.unwrap();
        assert_eq!(change.event, SessionEvent::SignedOut);
        assert!(store.current_session().await.unwrap().is_none());
        assert!(backend.session(&s.token).is_none());
    }

    #[tokio::test]
    async fn sign_out_without_session_is_quiet() {
        let store = LocalAuthStore::new(Arc::new(AuthBackend::default()), TokenCache::memory());
        let mut rx = store.subscribe();
        store.sign_out().await.unwrap();
        assert!(matches!(rx.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn revoked_session_reports_expired() {
        let backend = Arc::new(AuthBackend::default());
        backend.bootstrap_admin("root@x.com", "hunter22").unwrap();
        let store = LocalAuthStore::new(backend.clone(), TokenCache::memory());
        let s = store.sign_in("root@x.com", "hunter22").await.unwrap();
        let mut rx = store.subscribe();

        backend.sessions.revoke_user(&s.principal.user_id);
        assert!(store.current_session().await.unwrap().is_none());
        let change = rx.recv().await.unwrap();
        assert_eq!(change.event, SessionEvent::Expired);
        assert_eq!(change.token, Some(s.token));
    }
}
