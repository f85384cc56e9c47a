//! In-memory collaborators for unit tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::backend::{
    Authenticated, Collaborators, CredentialProvider, Ledger, MailStore, Mailbox, Notifier,
    SessionStore,
};
use crate::types::error::{BridgeError, Result};
use crate::types::{
    ActionKind, ChatId, Credentials, MailMessage, NotificationHandle, TrackedMessage,
};

pub fn message(id: &str, minutes_ago: i64) -> MailMessage {
    MailMessage {
        message_id: id.to_string(),
        subject: format!("Subject {}", id),
        sender: "Alice <alice@example.com>".to_string(),
        received_at: Utc::now() - ChronoDuration::minutes(minutes_ago),
        body: "Hello there".to_string(),
        attachments: vec![],
        labels: vec!["INBOX".to_string(), "UNREAD".to_string()],
        is_read: false,
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        access_token: "access".to_string(),
        refresh_token: Some("refresh".to_string()),
        expires_at: None,
        email: Some("user@example.com".to_string()),
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    pub stored: Mutex<HashMap<ChatId, Credentials>>,
    pub cleared: Mutex<Vec<ChatId>>,
    pub get_calls: AtomicUsize,
}

impl FakeCredentials {
    pub fn with(chat_id: ChatId, credentials: Credentials) -> Self {
        let fake = Self::default();
        fake.stored.lock().unwrap().insert(chat_id, credentials);
        fake
    }
}

impl CredentialProvider for FakeCredentials {
    fn get(&self, chat_id: ChatId) -> Result<Option<Credentials>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.stored.lock().unwrap().get(&chat_id).cloned())
    }

    fn store(&self, chat_id: ChatId, credentials: &Credentials) -> Result<()> {
        self.stored
            .lock()
            .unwrap()
            .insert(chat_id, credentials.clone());
        Ok(())
    }

    fn clear(&self, chat_id: ChatId) -> Result<()> {
        self.stored.lock().unwrap().remove(&chat_id);
        self.cleared.lock().unwrap().push(chat_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMailbox {
    /// Current inbox, newest first
    pub inbox: Mutex<Vec<MailMessage>>,
    /// Number of upcoming fetches that fail
    pub fetch_failures: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub presence_calls: AtomicUsize,
    pub read_ids: Mutex<HashSet<String>>,
    pub trashed: Mutex<Vec<String>>,
    pub archived: Mutex<Vec<String>>,
    pub starred: Mutex<Vec<String>>,
    /// Cancelled from inside the next presence check
    pub cancel_on_presence: Mutex<Option<CancellationToken>>,
    /// Cancelled from inside the next successful fetch
    pub cancel_on_fetch: Mutex<Option<CancellationToken>>,
}

impl FakeMailbox {
    pub fn set_inbox(&self, messages: Vec<MailMessage>) {
        *self.inbox.lock().unwrap() = messages;
    }

    pub fn remove(&self, message_id: &str) {
        self.inbox
            .lock()
            .unwrap()
            .retain(|m| m.message_id != message_id);
    }

    pub fn mark_read(&self, message_id: &str) {
        self.read_ids.lock().unwrap().insert(message_id.to_string());
    }
}

#[async_trait]
impl Mailbox for FakeMailbox {
    async fn fetch_recent(&self, limit: usize, unread_only: bool) -> Result<Vec<MailMessage>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fetch_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fetch_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(BridgeError::TransientFetch("connection reset".to_string()));
        }
        if let Some(token) = self.cancel_on_fetch.lock().unwrap().take() {
            token.cancel();
        }
        let read = self.read_ids.lock().unwrap().clone();
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !unread_only || !read.contains(&m.message_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn still_present(&self, message_id: &str) -> bool {
        self.presence_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(token) = self.cancel_on_presence.lock().unwrap().take() {
            token.cancel();
        }
        self.inbox
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.message_id == message_id)
    }

    async fn is_read(&self, message_id: &str) -> bool {
        self.read_ids.lock().unwrap().contains(message_id)
    }

    async fn trash(&self, message_id: &str) -> Result<()> {
        self.remove(message_id);
        self.trashed.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn archive(&self, message_id: &str) -> Result<()> {
        self.remove(message_id);
        self.archived.lock().unwrap().push(message_id.to_string());
        Ok(())
    }

    async fn star(&self, message_id: &str) -> Result<()> {
        self.starred.lock().unwrap().push(message_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMailStore {
    pub mailbox: Arc<FakeMailbox>,
    pub reject_tokens: AtomicBool,
    pub unreachable: AtomicBool,
    pub refreshed: Mutex<Option<Credentials>>,
    pub auth_calls: AtomicUsize,
}

#[async_trait]
impl MailStore for FakeMailStore {
    async fn authenticate(&self, _credentials: &Credentials) -> Result<Authenticated> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_tokens.load(Ordering::SeqCst) {
            return Err(BridgeError::Auth("invalid_grant".to_string()));
        }
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("dns failure".to_string()));
        }
        Ok(Authenticated {
            mailbox: self.mailbox.clone(),
            refreshed: self.refreshed.lock().unwrap().clone(),
        })
    }
}

pub struct FakeNotifier {
    pub delivered: Mutex<Vec<(ChatId, String)>>,
    pub retracted: Mutex<Vec<NotificationHandle>>,
    pub texts: Mutex<Vec<(ChatId, String)>>,
    pub text_attempts: AtomicUsize,
    /// Message ids whose delivery fails
    pub fail_for: Mutex<HashSet<String>>,
    pub fail_retract: AtomicBool,
    pub fail_text: AtomicBool,
    /// The next `deliver` panics instead of returning
    pub panic_next_deliver: AtomicBool,
    next_handle: AtomicI64,
}

impl Default for FakeNotifier {
    fn default() -> Self {
        Self {
            delivered: Mutex::new(vec![]),
            retracted: Mutex::new(vec![]),
            texts: Mutex::new(vec![]),
            text_attempts: AtomicUsize::new(0),
            fail_for: Mutex::new(HashSet::new()),
            fail_retract: AtomicBool::new(false),
            fail_text: AtomicBool::new(false),
            panic_next_deliver: AtomicBool::new(false),
            next_handle: AtomicI64::new(100),
        }
    }
}

impl FakeNotifier {
    pub fn delivered_ids(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn text_count(&self) -> usize {
        self.texts.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn deliver(
        &self,
        chat_id: ChatId,
        message: &MailMessage,
    ) -> Result<NotificationHandle> {
        if self.panic_next_deliver.swap(false, Ordering::SeqCst) {
            panic!("notifier crashed while delivering {}", message.message_id);
        }
        if self.fail_for.lock().unwrap().contains(&message.message_id) {
            return Err(BridgeError::Telegram("Bad Request: chat not found".to_string()));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((chat_id, message.message_id.clone()));
        Ok(NotificationHandle(
            self.next_handle.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn retract(&self, _chat_id: ChatId, handle: NotificationHandle) -> Result<()> {
        if self.fail_retract.load(Ordering::SeqCst) {
            return Err(BridgeError::Telegram(
                "Bad Request: message to delete not found".to_string(),
            ));
        }
        self.retracted.lock().unwrap().push(handle);
        Ok(())
    }

    async fn notify_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.text_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_text.load(Ordering::SeqCst) {
            return Err(BridgeError::Telegram("Too Many Requests".to_string()));
        }
        self.texts.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLedger {
    pub rows: Mutex<HashMap<(ChatId, String), TrackedMessage>>,
    pub actions: Mutex<Vec<(ChatId, String, ActionKind, Option<String>)>>,
    pub upserts: AtomicUsize,
    /// Silently drop attached handles, as a broken store would
    pub drop_handles: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Message ids whose delete fails
    pub fail_delete_for: Mutex<HashSet<String>>,
    pub fail_recent: AtomicBool,
}

impl MemoryLedger {
    pub fn insert(&self, chat_id: ChatId, message: TrackedMessage) {
        self.rows
            .lock()
            .unwrap()
            .insert((chat_id, message.message_id.clone()), message);
    }

    pub fn contains(&self, chat_id: ChatId, message_id: &str) -> bool {
        self.rows
            .lock()
            .unwrap()
            .contains_key(&(chat_id, message_id.to_string()))
    }

    pub fn actions_of(&self, kind: ActionKind) -> Vec<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, k, _)| *k == kind)
            .map(|(_, id, _, _)| id.clone())
            .collect()
    }

    pub fn detail_of(&self, kind: ActionKind, message_id: &str) -> Option<String> {
        self.actions
            .lock()
            .unwrap()
            .iter()
            .find(|(_, id, k, _)| *k == kind && id == message_id)
            .and_then(|(_, _, _, detail)| detail.clone())
    }
}

impl Ledger for MemoryLedger {
    fn known(&self, chat_id: ChatId, message_ids: &[String]) -> Result<HashSet<String>> {
        let rows = self.rows.lock().unwrap();
        Ok(message_ids
            .iter()
            .filter(|id| rows.contains_key(&(chat_id, (*id).clone())))
            .cloned()
            .collect())
    }

    fn upsert(&self, chat_id: ChatId, message: &TrackedMessage) -> Result<()> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.rows
            .lock()
            .unwrap()
            .entry((chat_id, message.message_id.clone()))
            .or_insert_with(|| message.clone());
        Ok(())
    }

    fn attach_handle(
        &self,
        chat_id: ChatId,
        message_id: &str,
        handle: NotificationHandle,
    ) -> Result<()> {
        if self.drop_handles.load(Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(row) = self
            .rows
            .lock()
            .unwrap()
            .get_mut(&(chat_id, message_id.to_string()))
        {
            row.notification_handle = Some(handle);
        }
        Ok(())
    }

    fn get(&self, chat_id: ChatId, message_id: &str) -> Result<Option<TrackedMessage>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(chat_id, message_id.to_string()))
            .cloned())
    }

    fn delete(&self, chat_id: ChatId, message_id: &str) -> Result<bool> {
        if self.fail_delete.load(Ordering::SeqCst)
            || self.fail_delete_for.lock().unwrap().contains(message_id)
        {
            return Err(BridgeError::Database("database is locked".to_string()));
        }
        Ok(self
            .rows
            .lock()
            .unwrap()
            .remove(&(chat_id, message_id.to_string()))
            .is_some())
    }

    fn recent_for_user(&self, chat_id: ChatId, limit: usize) -> Result<Vec<TrackedMessage>> {
        if self.fail_recent.load(Ordering::SeqCst) {
            return Err(BridgeError::Database("no such table".to_string()));
        }
        let mut rows: Vec<TrackedMessage> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((chat, _), _)| *chat == chat_id)
            .map(|(_, m)| m.clone())
            .collect();
        rows.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        rows.truncate(limit);
        Ok(rows)
    }

    fn count_for_user(&self, chat_id: ChatId) -> Result<u64> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .keys()
            .filter(|(chat, _)| *chat == chat_id)
            .count() as u64)
    }

    fn record_action(
        &self,
        chat_id: ChatId,
        message_id: &str,
        action: ActionKind,
        detail: Option<&str>,
    ) -> Result<()> {
        self.actions.lock().unwrap().push((
            chat_id,
            message_id.to_string(),
            action,
            detail.map(str::to_string),
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeSessionStore {
    /// `auth_failed` writes
    pub writes: Mutex<Vec<(ChatId, bool)>>,
    pub preferences: Mutex<Vec<(ChatId, &'static str, bool)>>,
}

impl SessionStore for FakeSessionStore {
    fn set_auth_failed(&self, chat_id: ChatId, failed: bool) -> Result<()> {
        self.writes.lock().unwrap().push((chat_id, failed));
        Ok(())
    }

    fn set_sync_notifications(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        self.preferences
            .lock()
            .unwrap()
            .push((chat_id, "sync_notifications", enabled));
        Ok(())
    }

    fn set_unread_only(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        self.preferences
            .lock()
            .unwrap()
            .push((chat_id, "unread_only", enabled));
        Ok(())
    }
}

/// All fakes wired together, with typed handles kept for assertions
pub struct Harness {
    pub credentials: Arc<FakeCredentials>,
    pub mail: Arc<FakeMailStore>,
    pub mailbox: Arc<FakeMailbox>,
    pub notifier: Arc<FakeNotifier>,
    pub ledger: Arc<MemoryLedger>,
    pub sessions: Arc<FakeSessionStore>,
}

impl Harness {
    /// Harness with credentials stored for `chat_id`
    pub fn connected(chat_id: ChatId) -> Self {
        let mail = Arc::new(FakeMailStore::default());
        Self {
            credentials: Arc::new(FakeCredentials::with(chat_id, credentials())),
            mailbox: mail.mailbox.clone(),
            mail,
            notifier: Arc::new(FakeNotifier::default()),
            ledger: Arc::new(MemoryLedger::default()),
            sessions: Arc::new(FakeSessionStore::default()),
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            credentials: self.credentials.clone(),
            mail: self.mail.clone(),
            notifier: self.notifier.clone(),
            ledger: self.ledger.clone(),
            sessions: self.sessions.clone(),
        }
    }
}
