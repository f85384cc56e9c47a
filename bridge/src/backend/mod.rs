//! Collaborator seams consumed by the sync core
//!
//! The polling and reconciliation logic in `sync/` only talks to these
//! traits. Concrete implementations live in `adapters/`:
//! - [`MailStore`] / [`Mailbox`]: Gmail REST API
//! - [`Notifier`]: Telegram Bot API
//! - [`Ledger`], [`CredentialProvider`], [`SessionStore`]: SQLite
//!
//! Every operation takes the chat it acts on explicitly. Implementations
//! must be safe to call concurrently from different users' tasks.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::types::error::Result;
use crate::types::{
    ActionKind, ChatId, Credentials, MailMessage, NotificationHandle, TrackedMessage,
};

/// Per-chat OAuth credential storage
pub trait CredentialProvider: Send + Sync {
    fn get(&self, chat_id: ChatId) -> Result<Option<Credentials>>;

    fn store(&self, chat_id: ChatId, credentials: &Credentials) -> Result<()>;

    /// Forget the stored credentials for a chat
    fn clear(&self, chat_id: ChatId) -> Result<()>;
}

/// Result of a successful mailbox authentication
pub struct Authenticated {
    pub mailbox: Arc<dyn Mailbox>,
    /// Set when the store had to refresh the access token
    pub refreshed: Option<Credentials>,
}

/// Entry point to a remote mail service
#[async_trait]
pub trait MailStore: Send + Sync {
    /// Authenticate with stored tokens and open the user's mailbox.
    ///
    /// Rejected or revoked tokens yield `BridgeError::Auth`; any other error
    /// is an infrastructure problem and says nothing about the credentials.
    async fn authenticate(&self, credentials: &Credentials) -> Result<Authenticated>;
}

/// Read/mutate access to one authenticated mailbox
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Most recent inbox messages, newest first
    async fn fetch_recent(&self, limit: usize, unread_only: bool) -> Result<Vec<MailMessage>>;

    /// Whether the message is still in the inbox. Returns true when the
    /// answer is ambiguous so that errors never look like deletions.
    async fn still_present(&self, message_id: &str) -> bool;

    /// Whether the message has been read. Returns false when unsure.
    async fn is_read(&self, message_id: &str) -> bool;

    async fn trash(&self, message_id: &str) -> Result<()>;

    async fn archive(&self, message_id: &str) -> Result<()>;

    async fn star(&self, message_id: &str) -> Result<()>;
}

/// Outbound user-facing notification channel
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, chat_id: ChatId, message: &MailMessage)
        -> Result<NotificationHandle>;

    async fn retract(&self, chat_id: ChatId, handle: NotificationHandle) -> Result<()>;

    async fn notify_text(&self, chat_id: ChatId, text: &str) -> Result<()>;
}

/// Durable record of tracked messages, partitioned by chat
pub trait Ledger: Send + Sync {
    /// The subset of `message_ids` already tracked for this chat
    fn known(&self, chat_id: ChatId, message_ids: &[String]) -> Result<HashSet<String>>;

    /// Insert a tracked message. Metadata of an existing row is left untouched.
    fn upsert(&self, chat_id: ChatId, message: &TrackedMessage) -> Result<()>;

    fn attach_handle(
        &self,
        chat_id: ChatId,
        message_id: &str,
        handle: NotificationHandle,
    ) -> Result<()>;

    fn get(&self, chat_id: ChatId, message_id: &str) -> Result<Option<TrackedMessage>>;

    /// Returns true if a row was removed
    fn delete(&self, chat_id: ChatId, message_id: &str) -> Result<bool>;

    /// Tracked messages ordered by `received_at` descending
    fn recent_for_user(&self, chat_id: ChatId, limit: usize) -> Result<Vec<TrackedMessage>>;

    fn count_for_user(&self, chat_id: ChatId) -> Result<u64>;

    fn record_action(
        &self,
        chat_id: ChatId,
        message_id: &str,
        action: ActionKind,
        detail: Option<&str>,
    ) -> Result<()>;
}

/// Persistence of session-level flags
pub trait SessionStore: Send + Sync {
    fn set_auth_failed(&self, chat_id: ChatId, failed: bool) -> Result<()>;

    fn set_sync_notifications(&self, chat_id: ChatId, enabled: bool) -> Result<()>;

    fn set_unread_only(&self, chat_id: ChatId, enabled: bool) -> Result<()>;
}

/// The set of collaborators shared by the core, the registry and the bot
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialProvider>,
    pub mail: Arc<dyn MailStore>,
    pub notifier: Arc<dyn Notifier>,
    pub ledger: Arc<dyn Ledger>,
    pub sessions: Arc<dyn SessionStore>,
}
