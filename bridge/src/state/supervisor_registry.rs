//! Supervisor registry
//!
//! Keeps one polling task per chat. Each task runs under a child of the
//! registry's cancellation token so a single user can be stopped without
//! touching the others.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::backend::SessionStore;
use crate::sync::PollSupervisor;
use crate::types::error::Result;
use crate::types::{ChatId, UserSession};

struct RunningSupervisor {
    session: UserSession,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct SupervisorRegistry {
    supervisor: Arc<PollSupervisor>,
    sessions: Arc<dyn SessionStore>,
    poll_interval: Duration,
    cancel: CancellationToken,
    running: RwLock<HashMap<ChatId, RunningSupervisor>>,
}

impl SupervisorRegistry {
    pub fn new(
        supervisor: Arc<PollSupervisor>,
        sessions: Arc<dyn SessionStore>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            supervisor,
            sessions,
            poll_interval,
            cancel,
            running: RwLock::new(HashMap::new()),
        }
    }

    /// Start polling for `session` unless a task is already running for
    /// the chat. Returns the live session, which may be an existing one.
    pub async fn start(&self, session: UserSession) -> UserSession {
        let chat_id = session.chat_id();
        let mut running = self.running.write().await;

        if let Some(existing) = running.get(&chat_id) {
            if !existing.handle.is_finished() {
                return existing.session.clone();
            }
        }

        info!(chat_id = %chat_id, "Starting supervisor");
        let cancel = self.cancel.child_token();
        let supervisor = self.supervisor.clone();
        let task_session = session.clone();
        let task_cancel = cancel.clone();
        let interval = self.poll_interval;
        let handle = tokio::spawn(async move {
            supervisor.run(task_session, interval, task_cancel).await;
        });

        running.insert(
            chat_id,
            RunningSupervisor {
                session: session.clone(),
                cancel,
                handle,
            },
        );
        session
    }

    /// Live session for a chat, if its supervisor is registered
    pub async fn session(&self, chat_id: ChatId) -> Option<UserSession> {
        let running = self.running.read().await;
        running.get(&chat_id).map(|r| r.session.clone())
    }

    /// Cancel and forget one chat's supervisor
    pub async fn stop(&self, chat_id: ChatId) -> bool {
        let entry = {
            let mut running = self.running.write().await;
            running.remove(&chat_id)
        };

        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                if let Err(e) = entry.handle.await {
                    warn!(chat_id = %chat_id, "Supervisor task ended abnormally: {}", e);
                }
                info!(chat_id = %chat_id, "Supervisor stopped");
                true
            }
            None => false,
        }
    }

    /// Clear `auth_failed` on the live session and in storage
    pub async fn clear_auth_failure(&self, chat_id: ChatId) -> Result<bool> {
        let cleared = match self.session(chat_id).await {
            Some(session) => self.supervisor.clear_auth_failure(&session),
            None => false,
        };
        self.sessions.set_auth_failed(chat_id, false)?;
        Ok(cleared)
    }

    pub async fn set_sync_notifications(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        self.sessions.set_sync_notifications(chat_id, enabled)?;
        if let Some(session) = self.session(chat_id).await {
            session.set_sync_notifications(enabled);
        }
        Ok(())
    }

    pub async fn set_unread_only(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        self.sessions.set_unread_only(chat_id, enabled)?;
        if let Some(session) = self.session(chat_id).await {
            session.set_unread_only(enabled);
        }
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        let running = self.running.read().await;
        running.values().filter(|r| !r.handle.is_finished()).count()
    }

    /// Cancel every supervisor and wait for all of them to exit
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let entries: Vec<(ChatId, RunningSupervisor)> = {
            let mut running = self.running.write().await;
            running.drain().collect()
        };

        info!(count = entries.len(), "Shutting down supervisors");
        for (chat_id, entry) in entries {
            if let Err(e) = entry.handle.await {
                warn!(chat_id = %chat_id, "Supervisor task ended abnormally: {}", e);
            }
        }
    }
}
