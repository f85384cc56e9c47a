//! One poll cycle for one user
//!
//! authenticate -> reconcile -> fetch (with backoff) -> diff -> deliver

use std::collections::HashSet;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::reconcile::{RetractionReason, SyncEngine};
use super::{backoff_delay, notify_best_effort, pause, CycleSettings, REAUTH_NOTICE};
use crate::backend::{Collaborators, Mailbox};
use crate::types::error::{BridgeError, Result};
use crate::types::{ActionKind, ChatId, CycleOutcome, MailMessage, TrackedMessage, UserSession};

/// What happened to a single new message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Delivered and the handle is durably recorded
    Delivered,
    /// The notifier rejected the message; the row stays tracked without a handle
    Failed,
    /// Delivered, but the handle could not be verified; cleaned up again
    Unverified,
    /// The pre-delivery record could not be written; nothing was sent
    NotRecorded,
}

pub struct PollCycle {
    collab: Collaborators,
    engine: SyncEngine,
    settings: CycleSettings,
}

impl PollCycle {
    pub fn new(collab: Collaborators, settings: CycleSettings) -> Self {
        let engine = SyncEngine::new(
            collab.notifier.clone(),
            collab.ledger.clone(),
            settings.reconcile_window,
            settings.retraction_gap,
        );
        Self {
            collab,
            engine,
            settings,
        }
    }

    pub fn settings(&self) -> &CycleSettings {
        &self.settings
    }

    /// Run one cycle for `session`.
    ///
    /// Authentication problems are handled here and end the cycle with an
    /// empty outcome. Exhausted fetch retries and infrastructure errors are
    /// returned to the supervisor.
    pub async fn execute(
        &self,
        session: &UserSession,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();
        let chat_id = session.chat_id();

        if session.auth_failed() {
            return Ok(outcome);
        }

        let Some(mailbox) = self.open_mailbox(session).await? else {
            return Ok(outcome);
        };

        match self.engine.reconcile(session, mailbox.as_ref(), cancel).await {
            Ok(report) => outcome.retracted = report.retracted,
            Err(BridgeError::Cancelled) => return Err(BridgeError::Cancelled),
            Err(e) => warn!(chat_id = %chat_id, "Reconciliation failed, continuing with fetch: {}", e),
        }

        if cancel.is_cancelled() {
            return Err(BridgeError::Cancelled);
        }
        let fetched = self
            .fetch_with_retry(chat_id, mailbox.as_ref(), session.unread_only(), cancel)
            .await?;
        let fresh = self.new_messages(chat_id, fetched)?;

        if fresh.is_empty() {
            debug!(chat_id = %chat_id, "No new messages");
            return Ok(outcome);
        }

        info!(chat_id = %chat_id, count = fresh.len(), "Delivering new messages");

        for (i, message) in fresh.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            if i > 0 {
                pause(cancel, self.settings.delivery_gap).await?;
            }
            outcome.attempted += 1;
            match self.deliver_one(chat_id, message).await {
                DeliveryOutcome::Delivered => outcome.delivered += 1,
                DeliveryOutcome::Failed
                | DeliveryOutcome::Unverified
                | DeliveryOutcome::NotRecorded => outcome.failed += 1,
            }
        }

        info!(
            chat_id = %chat_id,
            attempted = outcome.attempted,
            delivered = outcome.delivered,
            failed = outcome.failed,
            retracted = outcome.retracted,
            "Poll cycle complete"
        );

        Ok(outcome)
    }

    /// Load credentials and authenticate. `None` means the session is (now)
    /// flagged and the cycle should end quietly.
    async fn open_mailbox(&self, session: &UserSession) -> Result<Option<Arc<dyn Mailbox>>> {
        let chat_id = session.chat_id();

        let Some(credentials) = self.collab.credentials.get(chat_id)? else {
            debug!(chat_id = %chat_id, "No stored credentials, pausing polling");
            self.flag_auth_failure(session);
            return Ok(None);
        };

        let authenticated = match self.collab.mail.authenticate(&credentials).await {
            Ok(authenticated) => authenticated,
            Err(e) if e.is_auth() => {
                warn!(chat_id = %chat_id, "Stored tokens rejected: {}", e);
                if let Err(e) = self.collab.credentials.clear(chat_id) {
                    error!(chat_id = %chat_id, "Failed to clear rejected credentials: {}", e);
                }
                self.flag_auth_failure(session);
                notify_best_effort(self.collab.notifier.as_ref(), chat_id, REAUTH_NOTICE).await;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if session.clear_auth_failed() {
            self.persist_auth_flag(chat_id, false);
        }

        if let Some(refreshed) = authenticated.refreshed {
            debug!(chat_id = %chat_id, "Persisting refreshed tokens");
            if let Err(e) = self.collab.credentials.store(chat_id, &refreshed) {
                warn!(chat_id = %chat_id, "Failed to store refreshed tokens: {}", e);
            }
        }

        Ok(Some(authenticated.mailbox))
    }

    fn flag_auth_failure(&self, session: &UserSession) {
        if session.mark_auth_failed() {
            self.persist_auth_flag(session.chat_id(), true);
        }
    }

    fn persist_auth_flag(&self, chat_id: ChatId, failed: bool) {
        if let Err(e) = self.collab.sessions.set_auth_failed(chat_id, failed) {
            warn!(chat_id = %chat_id, failed, "Failed to persist auth flag: {}", e);
        }
    }

    /// Fetch the recent inbox, retrying transient failures with exponential
    /// backoff. The backoff sleep follows every failed attempt.
    async fn fetch_with_retry(
        &self,
        chat_id: ChatId,
        mailbox: &dyn Mailbox,
        unread_only: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<MailMessage>> {
        let mut last_error = None;

        for attempt in 1..=self.settings.fetch_attempts {
            match mailbox.fetch_recent(self.settings.fetch_window, unread_only).await {
                Ok(messages) => return Ok(messages),
                Err(e) => {
                    let delay = backoff_delay(attempt);
                    warn!(
                        chat_id = %chat_id,
                        attempt,
                        delay_secs = delay.as_secs(),
                        "Inbox fetch failed: {}",
                        e
                    );
                    last_error = Some(e);
                    pause(cancel, delay).await?;
                }
            }
        }

        let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
        Err(BridgeError::TransientFetch(format!(
            "gave up after {} attempts: {}",
            self.settings.fetch_attempts, reason
        )))
    }

    /// Drop everything the ledger already knows, keeping fetch order
    fn new_messages(&self, chat_id: ChatId, fetched: Vec<MailMessage>) -> Result<Vec<MailMessage>> {
        if fetched.is_empty() {
            return Ok(fetched);
        }
        let ids: Vec<String> = fetched.iter().map(|m| m.message_id.clone()).collect();
        let known: HashSet<String> = self.collab.ledger.known(chat_id, &ids)?;

        Ok(fetched
            .into_iter()
            .filter(|m| !known.contains(&m.message_id))
            .collect())
    }

    /// Track, deliver and verify a single message.
    ///
    /// The row is written before delivery so that a crash between the two
    /// can never lead to a second delivery.
    pub async fn deliver_one(&self, chat_id: ChatId, message: &MailMessage) -> DeliveryOutcome {
        let ledger = &self.collab.ledger;
        let message_id = message.message_id.as_str();

        if let Err(e) = ledger.upsert(chat_id, &TrackedMessage::from_fetched(message)) {
            error!(chat_id = %chat_id, message_id = %message_id, "Failed to track message: {}", e);
            return DeliveryOutcome::NotRecorded;
        }

        let handle = match self.collab.notifier.deliver(chat_id, message).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(chat_id = %chat_id, message_id = %message_id, "Delivery failed: {}", e);
                self.log_action(chat_id, message_id, ActionKind::DeliveryFailed, &e.to_string());
                return DeliveryOutcome::Failed;
            }
        };

        let attached = ledger
            .attach_handle(chat_id, message_id, handle)
            .and_then(|_| ledger.get(chat_id, message_id));

        match attached {
            Ok(Some(row)) if row.notification_handle == Some(handle) => {
                self.log_action(chat_id, message_id, ActionKind::Delivered, &handle.to_string());
                DeliveryOutcome::Delivered
            }
            other => {
                let detail = match other {
                    Err(e) => format!("handle not recorded: {}", e),
                    _ => "handle missing after attach".to_string(),
                };
                error!(chat_id = %chat_id, message_id = %message_id, handle = %handle, "{}", detail);
                self.log_action(chat_id, message_id, ActionKind::Error, &detail);

                let mut row = TrackedMessage::from_fetched(message);
                row.notification_handle = Some(handle);
                self.engine
                    .retract(chat_id, &row, RetractionReason::Unverified)
                    .await;
                DeliveryOutcome::Unverified
            }
        }
    }

    fn log_action(&self, chat_id: ChatId, message_id: &str, action: ActionKind, detail: &str) {
        if let Err(e) = self
            .collab
            .ledger
            .record_action(chat_id, message_id, action, Some(detail))
        {
            warn!(chat_id = %chat_id, "Failed to record {} action: {}", action.as_str(), e);
        }
    }
}
