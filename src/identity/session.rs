use std::collections::{HashMap, HashSet};

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tprintln;

use super::error::AuthError;
use super::principal::Principal;

pub type SessionToken = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub token: SessionToken,
    pub principal: Principal,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

pub(crate) fn gen_id() -> Result<String, AuthError> {
    encode_id(getrandom::getrandom)
}

// 256-bit random token base64url without padding
fn encode_id(fill: impl FnOnce(&mut [u8]) -> Result<(), getrandom::Error>) -> Result<String, AuthError> {
    let mut buf = [0u8; 32];
    fill(&mut buf).map_err(|e| AuthError::unavailable(format!("no randomness for session token: {}", e)))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

/// Issues and validates bearer sessions. One instance per auth backend; nothing
/// here is process-global. Ended sessions are removed outright and expired
/// ones are swept on every issue.
pub struct SessionManager {
    pub ttl: Duration,
    sessions: RwLock<HashMap<SessionToken, Session>>,
    user_index: RwLock<HashMap<String, HashSet<SessionToken>>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::hours(1)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(HashMap::new()),
            user_index: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue(&self, principal: Principal) -> Result<Session, AuthError> {
        self.prune_expired();
        let now = Utc::now();
        let sess = Session {
            session_id: gen_id()?,
            token: gen_id()?,
            principal,
            issued_at: now,
            expires_at: now + self.ttl,
        };
        self.sessions.write().insert(sess.token.clone(), sess.clone());
        self.user_index
            .write()
            .entry(sess.principal.user_id.clone())
            .or_default()
            .insert(sess.token.clone());
        tprintln!("session.issue user={} sid={} ttl_secs={}", sess.principal.user_id, sess.session_id, self.ttl.num_seconds());
        Ok(sess)
    }

    /// Returns the live session for `token`, pruning it when expired.
    pub fn validate(&self, token: &str) -> Option<Session> {
        let now = Utc::now();
        let mut expired = false;
        let out = {
            let map = self.sessions.read();
            match map.get(token) {
                Some(s) if !s.is_expired_at(now) => Some(s.clone()),
                Some(_) => { expired = true; None }
                None => None,
            }
        };
        if expired {
            self.remove(token);
            tprintln!("session.expired token_len={}", token.len());
        }
        out
    }

    fn remove(&self, token: &str) -> Option<Session> {
        let ent = self.sessions.write().remove(token)?;
        let mut idx = self.user_index.write();
        if let Some(set) = idx.get_mut(&ent.principal.user_id) {
            set.remove(token);
            if set.is_empty() { idx.remove(&ent.principal.user_id); }
        }
        Some(ent)
    }

    /// Drop every expired session, presented or not. Returns how many went.
    pub fn prune_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<SessionToken> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.is_expired_at(now))
            .map(|s| s.token.clone())
            .collect();
        let count = expired.iter().filter(|t| self.remove(t).is_some()).count();
        if count > 0 {
            tprintln!("session.prune count={}", count);
        }
        count
    }

    /// Sessions currently held, expired or not.
    pub fn stored(&self) -> usize {
        self.sessions.read().len()
    }

    /// Invalidate one session. Returns false when the token was not live.
    pub fn logout(&self, token: &str) -> bool {
        self.remove(token).is_some()
    }

    pub fn revoke_user(&self, user_id: &str) -> usize {
        let tokens = self.user_index.write().remove(user_id).unwrap_or_default();
        let count = {
            let mut s = self.sessions.write();
            tokens.iter().filter(|t| s.remove(*t).is_some()).count()
        };
        tprintln!("session.revoke user={} count={}", user_id, count);
        count
    }

    pub fn active_for_user(&self, user_id: &str) -> usize {
        let now = Utc::now();
        let idx = self.user_index.read();
        let map = self.sessions.read();
        idx.get(user_id)
            .map(|set| set.iter().filter(|t| map.get(*t).is_some_and(|s| !s.is_expired_at(now))).count())
            .unwrap_or(0)
    }
}
