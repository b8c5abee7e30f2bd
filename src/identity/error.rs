//! Authentication failure taxonomy shared by the stores and the session authority.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum AuthError {
    #[error("invalid login credentials")]
    InvalidCredentials,
    #[error("account does not hold the admin role")]
    InsufficientRole,
    #[error("identity is already registered")]
    AlreadyRegistered,
    #[error("secret must be at least {min_len} characters")]
    WeakCredential { min_len: usize },
    #[error("identity must be an email address")]
    InvalidIdentity,
    #[error("auth store unavailable: {reason}")]
    StoreUnavailable { reason: String },
    #[error("server secret is not configured")]
    ServerMisconfigured,
}

impl AuthError {
    pub fn unavailable<S: Into<String>>(reason: S) -> Self {
        AuthError::StoreUnavailable { reason: reason.into() }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InsufficientRole => "insufficient_role",
            AuthError::AlreadyRegistered => "already_registered",
            AuthError::WeakCredential { .. } => "weak_credential",
            AuthError::InvalidIdentity => "invalid_identity",
            AuthError::StoreUnavailable { .. } => "store_unavailable",
            AuthError::ServerMisconfigured => "server_misconfigured",
        }
    }

    /// Text shown to the end user. Infrastructure failures collapse to one
    /// generic message; the distinct cause only goes to the log.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::StoreUnavailable { .. } | AuthError::ServerMisconfigured => {
                "there was a problem logging in".to_string()
            }
            AuthError::InvalidCredentials => "wrong email or password".to_string(),
            AuthError::InsufficientRole => "this account is not an admin".to_string(),
            other => other.to_string(),
        }
    }

    pub fn is_infrastructure(&self) -> bool {
        matches!(self, AuthError::StoreUnavailable { .. } | AuthError::ServerMisconfigured)
    }
}
