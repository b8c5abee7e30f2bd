use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub email: String,
}

/// Normalize an identity for lookups: trimmed and lower-cased.
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

/// Minimal shape check for an email identity: one '@' with text on both sides
/// and a dot somewhere in the domain.
pub fn looks_like_email(identity: &str) -> bool {
    let s = identity.trim();
    let Some((local, domain)) = s.split_once('@') else { return false; };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape() {
        assert!(looks_like_email("a@x.com"));
        assert!(looks_like_email("  Admin@Example.org "));
        assert!(!looks_like_email("a@x"));
        assert!(!looks_like_email("@x.com"));
        assert!(!looks_like_email("a@@x.com"));
        assert!(!looks_like_email("a b@x.com"));
        assert!(!looks_like_email("plain"));
    }

    #[test]
    fn normalize_lowercases_and_trims() {
        assert_eq!(normalize_identity("  A@X.Com "), "a@x.com");
    }
}
