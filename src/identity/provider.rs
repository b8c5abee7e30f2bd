use std::collections::HashMap;

use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use chrono::Duration;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::tprintln;

use super::error::AuthError;
use super::principal::{looks_like_email, normalize_identity, Principal};
use super::roles::{Role, RoleGrants};
use super::session::{Session, SessionManager, SessionToken};

pub const DEFAULT_MIN_SECRET_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
    Expired,
}

/// Delivered to subscribers on every session change. `token` names the session
/// the event is about so listeners can discard stale notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    pub event: SessionEvent,
    pub token: Option<SessionToken>,
    pub session: Option<Session>,
}

impl SessionChange {
    pub fn signed_in(session: Session) -> Self {
        Self { event: SessionEvent::SignedIn, token: Some(session.token.clone()), session: Some(session) }
    }

    pub fn ended(event: SessionEvent, token: Option<SessionToken>) -> Self {
        Self { event, token, session: None }
    }
}

/// Client-side view of the authentication and role service.
#[async_trait]
pub trait AuthStore: Send + Sync {
    async fn sign_in(&self, identity: &str, secret: &str) -> Result<Session, AuthError>;
    async fn sign_up(&self, identity: &str, secret: &str, redirect_to: Option<&str>) -> Result<Principal, AuthError>;
    /// Ends the session this client holds, if any.
    async fn sign_out(&self) -> Result<(), AuthError>;
    async fn current_session(&self) -> Result<Option<Session>, AuthError>;
    async fn has_role(&self, user_id: &str, role: Role) -> Result<bool, AuthError>;
    fn subscribe(&self) -> broadcast::Receiver<SessionChange>;
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

struct UserRecord {
    principal: Principal,
    password_hash: String,
}

/// Server-side owner of principals, sessions and role grants.
pub struct AuthBackend {
    users: RwLock<HashMap<String, UserRecord>>,
    pub sessions: SessionManager,
    pub roles: RoleGrants,
    pub min_secret_len: usize,
}

impl Default for AuthBackend {
    fn default() -> Self { Self::new(DEFAULT_MIN_SECRET_LEN, Duration::hours(1)) }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| AuthError::unavailable(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| AuthError::unavailable(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::unavailable(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(hash: &str, password: &str) -> bool {
    if let Ok(parsed) = PasswordHash::new(hash) {
        Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok()
    } else { false }
}

impl AuthBackend {
    pub fn new(min_secret_len: usize, session_ttl: Duration) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            sessions: SessionManager::new(session_ttl),
            roles: RoleGrants::new(),
            min_secret_len,
        }
    }

    /// Create a principal with no role grant.
    pub fn register(&self, identity: &str, secret: &str) -> Result<Principal, AuthError> {
        if !looks_like_email(identity) {
            return Err(AuthError::InvalidIdentity);
        }
        if secret.chars().count() < self.min_secret_len {
            return Err(AuthError::WeakCredential { min_len: self.min_secret_len });
        }
        let email = normalize_identity(identity);
        if self.users.read().contains_key(&email) {
            return Err(AuthError::AlreadyRegistered);
        }
        let password_hash = hash_password(secret)?;
        let principal = Principal { user_id: uuid::Uuid::new_v4().to_string(), email: email.clone() };
        {
            let mut users = self.users.write();
            // Re-check under the write lock; hashing ran unlocked.
            if users.contains_key(&email) {
                return Err(AuthError::AlreadyRegistered);
            }
            users.insert(email, UserRecord { principal: principal.clone(), password_hash });
        }
        info!(target: "auth", user_id = %principal.user_id, "principal registered");
        Ok(principal)
    }

    pub fn authenticate(&self, req: &LoginRequest) -> Result<Session, AuthError> {
        let email = normalize_identity(&req.email);
        let (principal, phc) = {
            let users = self.users.read();
            let Some(rec) = users.get(&email) else {
                debug!(target: "auth", "login for unknown identity");
                return Err(AuthError::InvalidCredentials);
            };
            (rec.principal.clone(), rec.password_hash.clone())
        };
        if !verify_password(&phc, &req.password) {
            debug!(target: "auth", user_id = %principal.user_id, "password mismatch");
            return Err(AuthError::InvalidCredentials);
        }
        let session = self.sessions.issue(principal)?;
        tprintln!("auth.login user={} sid={}", session.principal.user_id, session.session_id);
        Ok(session)
    }

    pub fn session(&self, token: &str) -> Option<Session> {
        self.sessions.validate(token)
    }

    pub fn end_session(&self, token: &str) -> bool {
        self.sessions.logout(token)
    }

    pub fn find_principal(&self, identity: &str) -> Option<Principal> {
        self.users.read().get(&normalize_identity(identity)).map(|r| r.principal.clone())
    }

    pub fn has_role(&self, user_id: &str, role: Role) -> bool {
        self.roles.has_role(user_id, role)
    }

    /// Out-of-band provisioning of a grant by identity.
    pub fn grant_role(&self, identity: &str, role: Role) -> Result<Principal, AuthError> {
        let principal = self.find_principal(identity).ok_or(AuthError::InvalidCredentials)?;
        if self.roles.grant(&principal.user_id, role) {
            info!(target: "auth", user_id = %principal.user_id, role = %role, "role granted");
        }
        Ok(principal)
    }

    /// Remove a grant and end every session the principal holds.
    pub fn revoke_role(&self, identity: &str, role: Role) -> Result<usize, AuthError> {
        let principal = self.find_principal(identity).ok_or(AuthError::InvalidCredentials)?;
        self.roles.revoke(&principal.user_id, role);
        let ended = self.sessions.revoke_user(&principal.user_id);
        info!(target: "auth", user_id = %principal.user_id, role = %role, ended, "role revoked");
        Ok(ended)
    }

    /// Register (when needed) and grant admin to a configured account.
    pub fn bootstrap_admin(&self, identity: &str, secret: &str) -> Result<Principal, AuthError> {
        match self.register(identity, secret) {
            Ok(_) | Err(AuthError::AlreadyRegistered) => {}
            Err(e) => return Err(e),
        }
        self.grant_role(identity, Role::Admin)
    }
}
