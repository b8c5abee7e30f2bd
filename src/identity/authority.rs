//! Session authority: the one place a client process decides whether the
//! current visitor may mutate protected data.
//!
//! The authorization flag is derived from (session, admin grant) and is only
//! ever set after the grant lookup for the current session has returned true.
//! Every state change bumps an epoch; asynchronous work captures the epoch it
//! started under and drops its result when the epoch has moved on.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::notify::{Notice, Notifier};

use super::error::AuthError;
use super::principal::Principal;
use super::provider::{AuthStore, SessionChange, SessionEvent};
use super::roles::Role;
use super::session::{Session, SessionToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthPhase {
    Uninitialized,
    Loading,
    Unauthenticated,
    Authenticating,
    Authorized,
}

/// Read-only snapshot handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Authorization {
    pub is_authorized: bool,
    pub is_loading: bool,
    pub principal: Option<Principal>,
    pub phase: AuthPhase,
}

// Tokens this authority already handled itself; their SignedIn echoes are ignored.
const SETTLED_CAP: usize = 16;

struct AuthorityState {
    phase: AuthPhase,
    session: Option<Session>,
    epoch: u64,
    settled: VecDeque<SessionToken>,
}

impl AuthorityState {
    fn new() -> Self {
        Self { phase: AuthPhase::Uninitialized, session: None, epoch: 0, settled: VecDeque::new() }
    }

    fn snapshot(&self) -> Authorization {
        let principal = match self.phase {
            AuthPhase::Authorized | AuthPhase::Loading => self.session.as_ref().map(|s| s.principal.clone()),
            _ => None,
        };
        Authorization {
            is_authorized: self.phase == AuthPhase::Authorized && self.session.is_some(),
            is_loading: matches!(self.phase, AuthPhase::Uninitialized | AuthPhase::Loading),
            principal,
            phase: self.phase,
        }
    }

    /// Drop the held session and enter `phase` under a fresh epoch.
    fn begin(&mut self, phase: AuthPhase) -> u64 {
        self.epoch += 1;
        self.phase = phase;
        self.session = None;
        self.epoch
    }

    fn settle(&mut self, token: &str) {
        if self.is_settled(token) { return; }
        if self.settled.len() == SETTLED_CAP { self.settled.pop_front(); }
        self.settled.push_back(token.to_string());
    }

    fn is_settled(&self, token: &str) -> bool {
        self.settled.iter().any(|t| t == token)
    }
}

struct Inner {
    store: Arc<dyn AuthStore>,
    notifier: Arc<dyn Notifier>,
    redirect_to: Option<String>,
    state: Mutex<AuthorityState>,
    tx: watch::Sender<Authorization>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(h) = self.listener.get_mut().take() {
            h.abort();
        }
    }
}

/// How a login attempt ended when no error is reported. `Superseded` covers a
/// logout or a newer login moving the epoch on while this attempt was in
/// flight; the attempt returns false without a notice.
enum LoginOutcome {
    Authorized,
    Superseded,
}

// `interval` rejects a zero period.
const MIN_WATCH_PERIOD: Duration = Duration::from_millis(10);

#[derive(Clone)]
pub struct SessionAuthority {
    inner: Arc<Inner>,
}

impl SessionAuthority {
    pub fn new(store: Arc<dyn AuthStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_signup_redirect(store, notifier, None)
    }

    pub fn with_signup_redirect(store: Arc<dyn AuthStore>, notifier: Arc<dyn Notifier>, redirect_to: Option<String>) -> Self {
        let state = AuthorityState::new();
        let (tx, _) = watch::channel(state.snapshot());
        Self {
            inner: Arc::new(Inner {
                store,
                notifier,
                redirect_to,
                state: Mutex::new(state),
                tx,
                listener: Mutex::new(None),
            }),
        }
    }

    pub fn current_authorization(&self) -> Authorization {
        self.inner.tx.borrow().clone()
    }

    pub fn is_authorized(&self) -> bool {
        self.inner.tx.borrow().is_authorized
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Authorization> {
        self.inner.tx.subscribe()
    }

    /// Apply `f` to the state and publish the resulting snapshot, under one lock
    /// so publications keep mutation order.
    fn mutate<R>(&self, f: impl FnOnce(&mut AuthorityState) -> R) -> R {
        let mut st = self.inner.state.lock();
        let out = f(&mut st);
        let snap = st.snapshot();
        self.inner.tx.send_if_modified(|cur| {
            if *cur == snap { return false; }
            *cur = snap;
            true
        });
        out
    }

    fn mutate_if(&self, epoch: u64, f: impl FnOnce(&mut AuthorityState)) -> bool {
        self.mutate(|st| {
            if st.epoch != epoch { return false; }
            f(st);
            true
        })
    }

    /// Subscribe to session changes and restore any persisted session.
    pub async fn initialize(&self) -> Authorization {
        self.ensure_listener();
        let epoch = self.mutate(|st| st.begin(AuthPhase::Loading));
        match self.inner.store.current_session().await {
            Ok(None) => {
                self.mutate_if(epoch, |st| st.phase = AuthPhase::Unauthenticated);
            }
            Ok(Some(session)) => {
                debug!(target: "auth", user_id = %session.principal.user_id, "restored session; resolving role");
                let held = self.mutate_if(epoch, |st| {
                    st.settle(&session.token);
                    st.session = Some(session.clone());
                });
                if held {
                    self.settle_restored(epoch, session).await;
                }
            }
            Err(e) => {
                self.log_failure(&e);
                self.mutate_if(epoch, |st| st.phase = AuthPhase::Unauthenticated);
            }
        }
        self.current_authorization()
    }

    pub async fn login(&self, identity: &str, secret: &str) -> bool {
        let (epoch, prior) = self.mutate(|st| {
            let prior = st.session.take();
            (st.begin(AuthPhase::Authenticating), prior)
        });
        match self.authenticate(epoch, prior, identity, secret).await {
            Ok(LoginOutcome::Authorized) => {
                self.inner.notifier.notify(Notice::success("logged in as admin"));
                true
            }
            Ok(LoginOutcome::Superseded) => {
                debug!(target: "auth", "login superseded by a later state change");
                false
            }
            Err(e) => {
                self.report(e);
                false
            }
        }
    }

    /// `prior` is the session held before this attempt. A failed attempt ends
    /// it at the store, so no stale token outlives the cleared local state.
    async fn authenticate(
        &self,
        epoch: u64,
        prior: Option<Session>,
        identity: &str,
        secret: &str,
    ) -> Result<LoginOutcome, AuthError> {
        let session = match self.inner.store.sign_in(identity, secret).await {
            Ok(s) => s,
            Err(e) => {
                self.mutate_if(epoch, |st| st.phase = AuthPhase::Unauthenticated);
                if let Some(prev) = prior {
                    debug!(target: "auth", user_id = %prev.principal.user_id, "ending previous session after failed login");
                    self.force_sign_out(epoch, &prev).await;
                }
                return Err(e);
            }
        };
        self.mutate(|st| st.settle(&session.token));
        match self.resolve_role(epoch, &session).await {
            Ok(true) => Ok(LoginOutcome::Authorized),
            Ok(false) => {
                self.force_sign_out(epoch, &session).await;
                Ok(LoginOutcome::Superseded)
            }
            Err(e) => {
                self.force_sign_out(epoch, &session).await;
                Err(e)
            }
        }
    }

    /// Registers a principal without any grant. Never authorizes.
    pub async fn signup(&self, identity: &str, secret: &str) -> bool {
        match self.inner.store.sign_up(identity, secret, self.inner.redirect_to.as_deref()).await {
            Ok(p) => {
                info!(target: "auth", user_id = %p.user_id, "signup complete; awaiting admin grant");
                self.inner.notifier.notify(Notice::info(
                    "account created; an administrator must grant access before you can make changes",
                ));
            }
            Err(e) => self.report(e),
        }
        false
    }

    /// Clears local state first, then ends the remote session. Remote failures
    /// are logged only.
    pub async fn logout(&self) {
        self.mutate(|st| {
            st.begin(AuthPhase::Unauthenticated);
        });
        if let Err(e) = self.inner.store.sign_out().await {
            warn!(target: "auth", code = e.code(), "remote sign-out failed; local state already cleared: {}", e);
        }
        self.inner.notifier.notify(Notice::success("logged out"));
    }

    /// Re-check the held session against the store and drop it when it has
    /// expired or been revoked.
    pub async fn refresh(&self) -> Authorization {
        let held = {
            let st = self.inner.state.lock();
            st.session.as_ref().map(|s| (st.epoch, s.token.clone()))
        };
        if let Some((epoch, token)) = held {
            match self.inner.store.current_session().await {
                Ok(Some(cur)) if cur.token == token => {}
                Ok(_) => self.end_external(epoch),
                Err(e) => self.log_failure(&e),
            }
        }
        self.current_authorization()
    }

    /// Periodically `refresh` until the authority is dropped.
    /// Periods below 10ms are raised to 10ms.
    pub fn spawn_expiry_watch(&self, period: Duration) -> JoinHandle<()> {
        let period = period.max(MIN_WATCH_PERIOD);
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.tick().await;
            loop {
                tick.tick().await;
                let Some(inner) = weak.upgrade() else { break; };
                SessionAuthority { inner }.refresh().await;
            }
        })
    }

    fn ensure_listener(&self) {
        let mut slot = self.inner.listener.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) { return; }
        let mut rx = self.inner.store.subscribe();
        let weak = Arc::downgrade(&self.inner);
        *slot = Some(tokio::spawn(async move {
            loop {
                let change = match rx.recv().await {
                    Ok(c) => c,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(target: "auth", skipped, "session listener lagged; re-checking session");
                        let Some(inner) = weak.upgrade() else { break; };
                        let this = SessionAuthority { inner };
                        tokio::spawn(async move { this.refresh().await; });
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break; };
                SessionAuthority { inner }.on_session_change(change);
            }
        }));
    }

    /// Runs inside notification delivery: never calls the store directly.
    fn on_session_change(&self, change: SessionChange) {
        debug!(target: "auth", event = ?change.event, "session change");
        match change.event {
            SessionEvent::SignedIn => {
                let Some(session) = change.session else { return; };
                let epoch = self.mutate(|st| {
                    let held = st.session.as_ref().is_some_and(|s| s.token == session.token);
                    if st.phase == AuthPhase::Authenticating || held || st.is_settled(&session.token) {
                        return None;
                    }
                    let e = st.begin(AuthPhase::Loading);
                    st.settle(&session.token);
                    st.session = Some(session.clone());
                    Some(e)
                });
                let Some(epoch) = epoch else { return; };
                let this = self.clone();
                tokio::spawn(async move { this.confirm_and_resolve(epoch, session).await; });
            }
            SessionEvent::SignedOut | SessionEvent::Expired => {
                let epoch = {
                    let st = self.inner.state.lock();
                    let held = matches!((&st.session, &change.token), (Some(s), Some(t)) if &s.token == t);
                    (held && st.phase != AuthPhase::Authenticating).then_some(st.epoch)
                };
                if let Some(epoch) = epoch {
                    self.end_external(epoch);
                }
            }
        }
    }

    fn end_external(&self, epoch: u64) {
        let ended = self.mutate_if(epoch, |st| {
            st.begin(AuthPhase::Unauthenticated);
        });
        if ended {
            info!(target: "auth", "session expired or was revoked");
            self.inner.notifier.notify(Notice::info("session ended; log in again to make changes"));
        }
    }

    async fn confirm_and_resolve(&self, epoch: u64, session: Session) {
        match self.inner.store.current_session().await {
            Ok(Some(cur)) if cur.token == session.token => self.settle_restored(epoch, session).await,
            Ok(_) => {
                self.mutate_if(epoch, |st| {
                    st.begin(AuthPhase::Unauthenticated);
                });
            }
            Err(e) => {
                self.log_failure(&e);
                self.mutate_if(epoch, |st| {
                    st.begin(AuthPhase::Unauthenticated);
                });
            }
        }
    }

    /// Resolution for sessions the authority did not create itself. Lookup
    /// failures fail closed but leave the remote session for a later retry.
    async fn settle_restored(&self, epoch: u64, session: Session) {
        match self.resolve_role(epoch, &session).await {
            Ok(_) => {}
            Err(AuthError::InsufficientRole) => self.force_sign_out(epoch, &session).await,
            Err(e) => self.log_failure(&e),
        }
    }

    /// Ok(true): authorized. Ok(false): grant present but the epoch moved on.
    /// Err(InsufficientRole): no grant; local state already cleared.
    async fn resolve_role(&self, epoch: u64, session: &Session) -> Result<bool, AuthError> {
        let user_id = session.principal.user_id.as_str();
        match self.inner.store.has_role(user_id, Role::Admin).await {
            Ok(true) => {
                let applied = self.mutate_if(epoch, |st| {
                    st.phase = AuthPhase::Authorized;
                    st.session = Some(session.clone());
                });
                if applied {
                    info!(target: "auth", user_id, "admin session authorized");
                }
                Ok(applied)
            }
            Ok(false) => {
                info!(target: "auth", user_id, "principal lacks admin role");
                self.mutate_if(epoch, |st| {
                    st.begin(AuthPhase::Unauthenticated);
                });
                Err(AuthError::InsufficientRole)
            }
            Err(e) => {
                self.mutate_if(epoch, |st| {
                    st.begin(AuthPhase::Unauthenticated);
                });
                Err(e)
            }
        }
    }

    /// End `session` at the store unless the store already moved on to a
    /// different session.
    async fn force_sign_out(&self, epoch: u64, session: &Session) {
        self.mutate_if(epoch, |st| {
            st.begin(AuthPhase::Unauthenticated);
        });
        match self.inner.store.current_session().await {
            Ok(Some(cur)) if cur.token != session.token => {
                debug!(target: "auth", "store holds a newer session; skipping forced sign-out");
                return;
            }
            Ok(None) => return,
            _ => {}
        }
        if let Err(e) = self.inner.store.sign_out().await {
            warn!(target: "auth", code = e.code(), "failed to end session: {}", e);
        }
    }

    fn report(&self, err: AuthError) {
        self.log_failure(&err);
        self.inner.notifier.notify(Notice::from_error(err));
    }

    fn log_failure(&self, err: &AuthError) {
        match err {
            AuthError::StoreUnavailable { reason } => {
                warn!(target: "auth", code = err.code(), reason = %reason, "auth store unavailable")
            }
            AuthError::ServerMisconfigured => error!(target: "auth", code = err.code(), "auth server misconfigured"),
            other => info!(target: "auth", code = other.code(), "auth request rejected: {}", other),
        }
    }
}
