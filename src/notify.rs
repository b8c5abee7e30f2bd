//! User-facing notifications raised by the session authority.
//! The UI layer decides how to render them; the default sink writes to tracing.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::identity::AuthError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    pub error: Option<AuthError>,
}

impl Notice {
    pub fn success<S: Into<String>>(msg: S) -> Self { Self { level: NoticeLevel::Success, message: msg.into(), error: None } }
    pub fn info<S: Into<String>>(msg: S) -> Self { Self { level: NoticeLevel::Info, message: msg.into(), error: None } }

    pub fn from_error(err: AuthError) -> Self {
        Self { level: NoticeLevel::Error, message: err.user_message(), error: Some(err) }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notice: Notice);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, notice: Notice) {
        match notice.level {
            NoticeLevel::Error => warn!(target: "notice", "{}", notice.message),
            _ => info!(target: "notice", "{}", notice.message),
        }
    }
}

/// Collects notices in memory, for headless clients and tests.
#[derive(Debug, Default, Clone)]
pub struct NoticeLog {
    inner: Arc<Mutex<Vec<Notice>>>,
}

impl NoticeLog {
    pub fn new() -> Self { Self::default() }

    pub fn notices(&self) -> Vec<Notice> { self.inner.lock().clone() }

    pub fn last(&self) -> Option<Notice> { self.inner.lock().last().cloned() }

    pub fn last_error(&self) -> Option<AuthError> {
        self.inner.lock().iter().rev().find_map(|n| n.error.clone())
    }

    pub fn clear(&self) { self.inner.lock().clear(); }
}

impl Notifier for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.inner.lock().push(notice);
    }
}
