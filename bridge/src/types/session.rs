use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Telegram chat identifier. Also the key that owns a mailbox.
pub type ChatId = i64;

#[derive(Debug)]
struct SessionFlags {
    auth_failed: AtomicBool,
    sync_notifications: AtomicBool,
    unread_only: AtomicBool,
}

/// One polling target.
///
/// Clones share their flags, so the registry can clear `auth_failed` or
/// toggle preferences while the supervisor task holds its own copy.
#[derive(Debug, Clone)]
pub struct UserSession {
    chat_id: ChatId,
    flags: Arc<SessionFlags>,
}

impl UserSession {
    pub fn new(chat_id: ChatId) -> Self {
        Self::with_flags(chat_id, false, true, false)
    }

    pub fn with_flags(
        chat_id: ChatId,
        auth_failed: bool,
        sync_notifications: bool,
        unread_only: bool,
    ) -> Self {
        Self {
            chat_id,
            flags: Arc::new(SessionFlags {
                auth_failed: AtomicBool::new(auth_failed),
                sync_notifications: AtomicBool::new(sync_notifications),
                unread_only: AtomicBool::new(unread_only),
            }),
        }
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn auth_failed(&self) -> bool {
        self.flags.auth_failed.load(Ordering::SeqCst)
    }

    /// Set `auth_failed`. Returns true if the flag was previously clear.
    pub fn mark_auth_failed(&self) -> bool {
        !self.flags.auth_failed.swap(true, Ordering::SeqCst)
    }

    /// Clear `auth_failed`. Returns true if the flag was previously set.
    pub fn clear_auth_failed(&self) -> bool {
        self.flags.auth_failed.swap(false, Ordering::SeqCst)
    }

    pub fn sync_notifications(&self) -> bool {
        self.flags.sync_notifications.load(Ordering::SeqCst)
    }

    pub fn set_sync_notifications(&self, enabled: bool) {
        self.flags.sync_notifications.store(enabled, Ordering::SeqCst);
    }

    pub fn unread_only(&self) -> bool {
        self.flags.unread_only.load(Ordering::SeqCst)
    }

    pub fn set_unread_only(&self, enabled: bool) {
        self.flags.unread_only.store(enabled, Ordering::SeqCst);
    }
}
