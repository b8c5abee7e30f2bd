//! Shared-secret admin verification function.
//!
//! Compares a submitted password to one configured secret. No identity, no
//! roles, no session: callers get `{ success }` and an HTTP status. The role
//! based `SessionAuthority` supersedes this for gating; the function is kept
//! for deployments that still call it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info};

use crate::identity::AuthError;

pub const ADMIN_PASSWORD_ENV: &str = "ADMIN_PASSWORD";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyBody {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyResponse {
    pub status: u16,
    pub body: VerifyBody,
}

impl VerifyResponse {
    fn ok() -> Self {
        Self { status: 200, body: VerifyBody { success: true, message: None } }
    }

    fn fail(status: u16, message: &str) -> Self {
        Self { status, body: VerifyBody { success: false, message: Some(message.to_string()) } }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AdminVerifier {
    secret: Option<String>,
}

// Length is not hidden; content comparison does not short-circuit.
fn secrets_match(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() { return false; }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

impl AdminVerifier {
    /// An empty secret counts as unconfigured.
    pub fn new(secret: Option<String>) -> Self {
        Self { secret: secret.filter(|s| !s.is_empty()) }
    }

    pub fn is_configured(&self) -> bool { self.secret.is_some() }

    pub fn verify(&self, candidate: &str) -> Result<bool, AuthError> {
        let Some(secret) = self.secret.as_deref() else { return Err(AuthError::ServerMisconfigured); };
        Ok(secrets_match(secret.as_bytes(), candidate.as_bytes()))
    }

    /// Handle a raw request body the way the HTTP function answers it.
    pub fn respond(&self, body: &[u8]) -> VerifyResponse {
        let req: Value = match serde_json::from_slice(body) {
            Ok(Value::Null) => {
                error!(target: "verifier", "verification request body is null");
                return VerifyResponse::fail(500, "something went wrong");
            }
            Ok(v) => v,
            Err(e) => {
                error!(target: "verifier", "unreadable verification request: {}", e);
                return VerifyResponse::fail(500, "something went wrong");
            }
        };
        let outcome = match req.get("password").and_then(Value::as_str) {
            Some(candidate) => self.verify(candidate),
            // A missing or non-string password never matches.
            None if self.is_configured() => Ok(false),
            None => Err(AuthError::ServerMisconfigured),
        };
        match outcome {
            Ok(true) => {
                info!(target: "verifier", "admin verification succeeded");
                VerifyResponse::ok()
            }
            Ok(false) => {
                info!(target: "verifier", "admin verification failed: wrong password");
                VerifyResponse::fail(401, "wrong password")
            }
            Err(e) => {
                error!(target: "verifier", code = e.code(), "{} not configured", ADMIN_PASSWORD_ENV);
                VerifyResponse::fail(500, "server configuration problem")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_password_succeeds() {
        let v = AdminVerifier::new(Some("hunter2".into()));
        let r = v.respond(br#"{"password":"hunter2"}"#);
        assert_eq!(r.status, 200);
        assert_eq!(r.body, VerifyBody { success: true, message: None });
        assert_eq!(serde_json::to_value(&r.body).unwrap(), serde_json::json!({"success": true}));
    }

    #[test]
    fn wrong_password_is_401() {
        let v = AdminVerifier::new(Some("hunter2".into()));
        let r = v.respond(br#"{"password":"wrong"}"#);
        assert_eq!(r.status, 401);
        assert!(!r.body.success);
        assert!(r.body.message.is_some());
    }

    #[test]
    fn unconfigured_secret_is_500() {
        for v in [AdminVerifier::new(None), AdminVerifier::new(Some(String::new()))] {
            assert!(!v.is_configured());
            assert_eq!(v.verify("anything"), Err(AuthError::ServerMisconfigured));
            let r = v.respond(br#"{"password":"hunter2"}"#);
            assert_eq!(r.status, 500);
            assert!(!r.body.success);
        }
    }

    #[test]
    fn malformed_body_is_500() {
        let v = AdminVerifier::new(Some("hunter2".into()));
        assert_eq!(v.respond(b"{not json").status, 500);
        assert_eq!(v.respond(b"").status, 500);
        assert_eq!(v.respond(b"null").status, 500);
    }

    #[test]
    fn json_without_string_password_is_a_mismatch() {
        let v = AdminVerifier::new(Some("hunter2".into()));
        let bodies: [&[u8]; 5] = [br#"{}"#, br#"{"password":123}"#, br#"{"pass":"hunter2"}"#, br#"{"password":null}"#, b"[]"];
        for body in bodies {
            let r = v.respond(body);
            assert_eq!(r.status, 401, "body {:?}", std::str::from_utf8(body));
            assert_eq!(r.body.message.as_deref(), Some("wrong password"));
        }
        // Misconfiguration still wins over a missing password.
        assert_eq!(AdminVerifier::new(None).respond(br#"{}"#).status, 500);
    }

    #[test]
    fn prefix_does_not_match() {
        let v = AdminVerifier::new(Some("hunter2".into()));
        assert_eq!(v.verify("hunter"), Ok(false));
        assert_eq!(v.verify("hunter22"), Ok(false));
    }
}
