//! Client-side persistence of the current session token so a restarted
//! process can restore its session.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::session::SessionToken;

#[derive(Debug, Serialize, Deserialize)]
struct CachedToken {
    token: SessionToken,
}

#[derive(Debug, Default)]
pub struct TokenCache {
    path: Option<PathBuf>,
    mem: Mutex<Option<SessionToken>>,
}

impl TokenCache {
    /// Memory-only cache; lost when the process exits.
    pub fn memory() -> Self { Self::default() }

    /// File-backed cache. An unreadable or malformed file counts as empty.
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let loaded = std::fs::read(&path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<CachedToken>(&bytes).ok())
            .map(|c| c.token);
        Self { path: Some(path), mem: Mutex::new(loaded) }
    }

    pub fn load(&self) -> Option<SessionToken> {
        self.mem.lock().clone()
    }

    pub fn store(&self, token: &str) {
        *self.mem.lock() = Some(token.to_string());
        if let Some(p) = &self.path {
            let body = CachedToken { token: token.to_string() };
            let res = serde_json::to_vec(&body)
                .map_err(anyhow::Error::from)
                .and_then(|bytes| {
                    if let Some(dir) = p.parent() { std::fs::create_dir_all(dir).ok(); }
                    std::fs::write(p, bytes).map_err(anyhow::Error::from)
                });
            if let Err(e) = res {
                warn!(target: "auth", path = %p.display(), "failed to persist session token: {}", e);
            }
        }
    }

    pub fn clear(&self) -> Option<SessionToken> {
        let prev = self.mem.lock().take();
        if let Some(p) = &self.path {
            if p.exists() {
                if let Err(e) = std::fs::remove_file(p) {
                    warn!(target: "auth", path = %p.display(), "failed to remove session token file: {}", e);
                }
            }
        }
        prev
    }
}
