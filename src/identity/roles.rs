use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Role-grant table keyed by (principal id, role). Grants are provisioned out
/// of band; clients only ever read it through `has_role`.
#[derive(Default)]
pub struct RoleGrants {
    grants: RwLock<HashSet<(String, Role)>>,
}

impl RoleGrants {
    pub fn new() -> Self { Self::default() }

    pub fn grant(&self, user_id: &str, role: Role) -> bool {
        self.grants.write().insert((user_id.to_string(), role))
    }

    pub fn revoke(&self, user_id: &str, role: Role) -> bool {
        self.grants.write().remove(&(user_id.to_string(), role))
    }

    pub fn has_role(&self, user_id: &str, role: Role) -> bool {
        self.grants.read().contains(&(user_id.to_string(), role))
    }
}
