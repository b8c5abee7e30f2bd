//! Server configuration from environment variables, overridable by CLI flags.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;

use crate::identity::DEFAULT_MIN_SECRET_LEN;
use crate::verifier::ADMIN_PASSWORD_ENV;

pub const DEFAULT_HTTP_PORT: u16 = 7878;
pub const DEFAULT_SESSION_TTL_SECS: i64 = 60 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: IpAddr,
    pub http_port: u16,
    /// Secret for the legacy verify-admin function; `None` makes it answer 500.
    pub admin_password: Option<String>,
    pub min_secret_len: usize,
    pub session_ttl_secs: i64,
    /// (identity, secret) registered and granted admin at startup.
    pub bootstrap_admin: Option<(String, String)>,
    /// JSON ledger file; in-memory when unset.
    pub data_file: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            http_port: DEFAULT_HTTP_PORT,
            admin_password: None,
            min_secret_len: DEFAULT_MIN_SECRET_LEN,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            bootstrap_admin: None,
            data_file: None,
        }
    }
}

fn parse_env<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name).and_then(|v| v.trim().parse::<T>().ok())
}

fn arg_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].as_str());
        }
        if let Some(v) = args[i].strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(v);
        }
        i += 1;
    }
    None
}

fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Option<T> {
    arg_value(args, flag).and_then(|v| v.parse::<T>().ok())
}

impl ServerConfig {
    pub fn from_env_and_args(args: &[String]) -> Self {
        Self::from_lookup(&|name| std::env::var(name).ok(), args)
    }

    /// Flags win over environment variables, which win over defaults.
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>, args: &[String]) -> Self {
        let d = Self::default();
        let bootstrap_admin = match (lookup("LEDGER_BOOTSTRAP_ADMIN"), lookup("LEDGER_BOOTSTRAP_ADMIN_PASSWORD")) {
            (Some(id), Some(pw)) if !id.trim().is_empty() && !pw.is_empty() => Some((id.trim().to_string(), pw)),
            _ => None,
        };
        Self {
            bind: parse_arg(args, "--bind").or_else(|| parse_env(lookup, "LEDGER_BIND")).unwrap_or(d.bind),
            http_port: parse_arg(args, "--http-port").or_else(|| parse_env(lookup, "LEDGER_HTTP_PORT")).unwrap_or(d.http_port),
            admin_password: lookup(ADMIN_PASSWORD_ENV).filter(|s| !s.is_empty()),
            min_secret_len: parse_env(lookup, "LEDGER_MIN_SECRET_LEN").unwrap_or(d.min_secret_len),
            session_ttl_secs: parse_env(lookup, "LEDGER_SESSION_TTL_SECS").filter(|v: &i64| *v > 0).unwrap_or(d.session_ttl_secs),
            bootstrap_admin,
            data_file: arg_value(args, "--data-file")
                .map(PathBuf::from)
                .or_else(|| lookup("LEDGER_DATA_FILE").filter(|s| !s.is_empty()).map(PathBuf::from)),
        }
    }
}
