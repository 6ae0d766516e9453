//! User-facing notifications.
//!
//! The session manager reports outcomes ("Logged out successfully", a
//! backend rejection message, ...) through [`Notifier`]. How they are shown
//! is up to the application; [`LogNotifier`] just writes them to the log.

use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: NoticeKind, text: &str);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: NoticeKind, text: &str) {
        match kind {
            NoticeKind::Success => info!(notice = text, "success"),
            NoticeKind::Error => warn!(notice = text, "error"),
        }
    }
}

impl<F> Notifier for F
where
    F: Fn(NoticeKind, &str) + Send + Sync,
{
    fn notify(&self, kind: NoticeKind, text: &str) {
        self(kind, text)
    }
}
