//! Deletion reconciliation
//!
//! Compares the most recently received tracked messages of a chat against
//! the remote inbox and retracts the notifications of those that are gone.
//! Only the newest `window` rows are verified each pass; older rows are
//! considered settled and are never re-checked.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{notify_best_effort, pause};
use crate::backend::{Ledger, Mailbox, Notifier};
use crate::types::error::{BridgeError, Result};
use crate::types::{ActionKind, ChatId, TrackedMessage, UserSession};

/// Why a tracked message is being retracted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractionReason {
    /// No longer in the inbox (trashed, archived or deleted)
    Removed,
    /// Read while the chat only follows unread mail
    Read,
    /// Delivered, but the handle never made it into the ledger
    Unverified,
}

impl RetractionReason {
    fn detail(&self) -> &'static str {
        match self {
            Self::Removed => "removed from inbox",
            Self::Read => "marked as read",
            Self::Unverified => "delivery not recorded",
        }
    }
}

/// Outcome of retracting one tracked message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetractionOutcome {
    /// Ledger row deleted; notification removed or already gone
    Retracted,
    /// Ledger row was not there anymore
    NotTracked,
    /// Ledger deletion failed; the row will be retried next pass
    LedgerDeleteFailed,
}

/// Summary of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: u32,
    /// All retractions, whatever the reason
    pub retracted: u32,
    /// The part of `retracted` caused by mail being read
    pub retracted_read: u32,
    pub retraction_failures: u32,
}

impl ReconcileReport {
    /// Text sent to the chat after a pass, if anything was retracted
    pub fn summary(&self) -> Option<String> {
        let removed = self.retracted - self.retracted_read;
        let mut lines = Vec::new();
        if removed > 0 {
            lines.push(format!("🗑 {} deleted emails removed", removed));
        }
        if self.retracted_read > 0 {
            lines.push(format!("📖 {} read emails removed", self.retracted_read));
        }
        if lines.is_empty() {
            None
        } else {
            Some(lines.join("\n"))
        }
    }
}

pub struct SyncEngine {
    notifier: Arc<dyn Notifier>,
    ledger: Arc<dyn Ledger>,
    window: usize,
    retraction_gap: Duration,
}

impl SyncEngine {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        ledger: Arc<dyn Ledger>,
        window: usize,
        retraction_gap: Duration,
    ) -> Self {
        Self {
            notifier,
            ledger,
            window,
            retraction_gap,
        }
    }

    /// Run one reconciliation pass for `session`.
    ///
    /// Per-candidate failures are logged and skipped. Only a failure to load
    /// the candidates, or cancellation, is returned as an error.
    pub async fn reconcile(
        &self,
        session: &UserSession,
        mailbox: &dyn Mailbox,
        cancel: &CancellationToken,
    ) -> Result<ReconcileReport> {
        let chat_id = session.chat_id();
        let candidates = self.ledger.recent_for_user(chat_id, self.window)?;
        let mut report = ReconcileReport::default();

        debug!(chat_id = %chat_id, candidates = candidates.len(), "Reconciling tracked messages");

        for candidate in &candidates {
            if cancel.is_cancelled() {
                return Err(BridgeError::Cancelled);
            }
            report.checked += 1;

            let Some(reason) = self.retraction_reason(session, mailbox, candidate).await else {
                continue;
            };

            match self.retract(chat_id, candidate, reason).await {
                RetractionOutcome::Retracted => {
                    report.retracted += 1;
                    if reason == RetractionReason::Read {
                        report.retracted_read += 1;
                    }
                    pause(cancel, self.retraction_gap).await?;
                }
                RetractionOutcome::NotTracked => {}
                RetractionOutcome::LedgerDeleteFailed => report.retraction_failures += 1,
            }
        }

        if let Some(summary) = report.summary() {
            info!(
                chat_id = %chat_id,
                retracted = report.retracted,
                read = report.retracted_read,
                "Removed notifications for messages gone from the inbox"
            );
            if session.sync_notifications() {
                notify_best_effort(self.notifier.as_ref(), chat_id, &summary).await;
            }
        }

        Ok(report)
    }

    /// Evaluate both retraction triggers for one candidate.
    async fn retraction_reason(
        &self,
        session: &UserSession,
        mailbox: &dyn Mailbox,
        candidate: &TrackedMessage,
    ) -> Option<RetractionReason> {
        if !mailbox.still_present(&candidate.message_id).await {
            return Some(RetractionReason::Removed);
        }
        if session.unread_only() && mailbox.is_read(&candidate.message_id).await {
            return Some(RetractionReason::Read);
        }
        None
    }

    /// Retract the notification (if any), then delete the ledger row.
    ///
    /// The ledger deletion is attempted even if the retraction failed.
    pub async fn retract(
        &self,
        chat_id: ChatId,
        candidate: &TrackedMessage,
        reason: RetractionReason,
    ) -> RetractionOutcome {
        let message_id = candidate.message_id.as_str();

        if let Some(handle) = candidate.notification_handle {
            if let Err(e) = self.notifier.retract(chat_id, handle).await {
                warn!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    handle = %handle,
                    "Failed to retract notification (may already be gone): {}",
                    e
                );
                self.log_action(chat_id, message_id, ActionKind::RetractionFailed, &e.to_string());
            }
        }

        match self.ledger.delete(chat_id, message_id) {
            Ok(true) => {
                self.log_action(chat_id, message_id, ActionKind::Retracted, reason.detail());
                RetractionOutcome::Retracted
            }
            Ok(false) => {
                debug!(chat_id = %chat_id, message_id = %message_id, "Ledger row already gone");
                RetractionOutcome::NotTracked
            }
            Err(e) => {
                warn!(
                    chat_id = %chat_id,
                    message_id = %message_id,
                    "Failed to delete ledger row: {}",
                    e
                );
                RetractionOutcome::LedgerDeleteFailed
            }
        }
    }

    fn log_action(&self, chat_id: ChatId, message_id: &str, action: ActionKind, detail: &str) {
        if let Err(e) = self.ledger.record_action(chat_id, message_id, action, Some(detail)) {
            warn!(chat_id = %chat_id, "Failed to record {} action: {}", action.as_str(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message, Harness};
    use crate::types::NotificationHandle;
    use std::sync::atomic::Ordering;

    const CHAT: ChatId = 1001;

    fn engine(h: &Harness) -> SyncEngine {
        SyncEngine::new(
            h.notifier.clone(),
            h.ledger.clone(),
            20,
            Duration::from_millis(200),
        )
    }

    fn tracked(id: &str, minutes_ago: i64, handle: Option<i64>) -> TrackedMessage {
        let mut row = TrackedMessage::from_fetched(&message(id, minutes_ago));
        row.notification_handle = handle.map(NotificationHandle);
        row
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_message_is_retracted() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 5, Some(555)));
        h.mailbox.set_inbox(vec![]);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 1);
        assert_eq!(*h.notifier.retracted.lock().unwrap(), vec![NotificationHandle(555)]);
        assert!(!h.ledger.contains(CHAT, "x"));
        assert_eq!(h.ledger.actions_of(ActionKind::Retracted), vec!["x".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_present_messages_are_left_alone() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("a", 1, Some(1)));
        h.mailbox.set_inbox(vec![message("a", 1)]);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.retracted, 0);
        assert!(h.ledger.contains(CHAT, "a"));
        assert_eq!(h.notifier.text_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_retraction_still_deletes_row() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 5, Some(9)));
        h.notifier.fail_retract.store(true, Ordering::SeqCst);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 1);
        assert!(!h.ledger.contains(CHAT, "x"));
        assert_eq!(h.ledger.actions_of(ActionKind::RetractionFailed), vec!["x".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_is_not_counted() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 5, Some(9)));
        h.ledger.fail_delete.store(true, Ordering::SeqCst);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 0);
        assert_eq!(report.retraction_failures, 1);
        assert_eq!(h.notifier.text_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_does_not_stop_the_pass() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 1, Some(1)));
        h.ledger.insert(CHAT, tracked("y", 2, Some(2)));
        h.ledger.fail_delete_for.lock().unwrap().insert("x".to_string());
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.retracted, 1);
        assert_eq!(report.retraction_failures, 1);
        assert!(h.ledger.contains(CHAT, "x"));
        assert!(!h.ledger.contains(CHAT, "y"));
        assert_eq!(h.ledger.actions_of(ActionKind::Retracted), vec!["y".to_string()]);
        let texts = h.notifier.texts.lock().unwrap();
        assert!(texts[0].1.contains("1 deleted emails removed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhandled_rows_are_deleted_without_retract_call() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("pending", 5, None));
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 1);
        assert!(h.notifier.retracted.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_limits_checked_rows() {
        let h = Harness::connected(CHAT);
        for i in 0..25 {
            h.ledger.insert(CHAT, tracked(&format!("m{}", i), i, Some(i)));
        }
        let inbox: Vec<_> = (0..25).map(|i| message(&format!("m{}", i), i)).collect();
        h.mailbox.set_inbox(inbox);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 20);
        assert_eq!(h.mailbox.presence_calls.load(Ordering::SeqCst), 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_old_rows_outside_window_are_not_retracted() {
        let h = Harness::connected(CHAT);
        for i in 0..21 {
            h.ledger.insert(CHAT, tracked(&format!("m{}", i), i, Some(i)));
        }
        // Everything except the oldest row is still present
        let inbox: Vec<_> = (0..20).map(|i| message(&format!("m{}", i), i)).collect();
        h.mailbox.set_inbox(inbox);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 0);
        assert!(h.ledger.contains(CHAT, "m20"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_sent_only_when_enabled() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 1, Some(1)));
        h.ledger.insert(CHAT, tracked("y", 2, Some(2)));
        let session = UserSession::new(CHAT);

        engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        let texts = h.notifier.texts.lock().unwrap().clone();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].1.contains("2 deleted emails removed"));

        let quiet = Harness::connected(CHAT);
        quiet.ledger.insert(CHAT, tracked("x", 1, Some(1)));
        let session = UserSession::with_flags(CHAT, false, false, false);
        engine(&quiet)
            .reconcile(&session, quiet.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(quiet.notifier.text_attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_failure_is_swallowed() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("x", 1, Some(1)));
        h.notifier.fail_text.store(true, Ordering::SeqCst);
        let session = UserSession::new(CHAT);

        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 1);
        assert_eq!(h.notifier.text_attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_messages_retracted_in_unread_mode() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("read", 1, Some(1)));
        h.ledger.insert(CHAT, tracked("unread", 2, Some(2)));
        h.mailbox.set_inbox(vec![message("read", 1), message("unread", 2)]);
        h.mailbox.mark_read("read");

        let unread_only = UserSession::with_flags(CHAT, false, true, true);
        let report = engine(&h)
            .reconcile(&unread_only, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 1);
        assert_eq!(report.retracted_read, 1);
        assert!(!h.ledger.contains(CHAT, "read"));
        assert!(h.ledger.contains(CHAT, "unread"));
        assert_eq!(
            h.ledger.detail_of(ActionKind::Retracted, "read").as_deref(),
            Some("marked as read")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_summary_separates_deleted_and_read() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("gone", 1, Some(1)));
        h.ledger.insert(CHAT, tracked("read", 2, Some(2)));
        h.mailbox.set_inbox(vec![message("read", 2)]);
        h.mailbox.mark_read("read");

        let session = UserSession::with_flags(CHAT, false, true, true);
        let report = engine(&h)
            .reconcile(&session, h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 2);
        assert_eq!(report.retracted_read, 1);
        let texts = h.notifier.texts.lock().unwrap();
        assert_eq!(texts.len(), 1);
        assert_eq!(texts[0].1, "🗑 1 deleted emails removed\n📖 1 read emails removed");
    }

    #[test]
    fn test_empty_report_has_no_summary() {
        assert_eq!(ReconcileReport::default().summary(), None);
        let read_only = ReconcileReport {
            retracted: 2,
            retracted_read: 2,
            ..ReconcileReport::default()
        };
        assert_eq!(read_only.summary().as_deref(), Some("📖 2 read emails removed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_messages_kept_when_following_all_mail() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT, tracked("read", 1, Some(1)));
        h.mailbox.set_inbox(vec![message("read", 1)]);
        h.mailbox.mark_read("read");

        let report = engine(&h)
            .reconcile(&UserSession::new(CHAT), h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.retracted, 0);
        assert!(h.ledger.contains(CHAT, "read"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_gap_after_each_retraction() {
        let h = Harness::connected(CHAT);
        for i in 0..3 {
            h.ledger.insert(CHAT, tracked(&format!("g{}", i), i, Some(i)));
        }
        let start = tokio::time::Instant::now();

        engine(&h)
            .reconcile(&UserSession::new(CHAT), h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(start.elapsed() >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_chats_untouched() {
        let h = Harness::connected(CHAT);
        h.ledger.insert(CHAT + 1, tracked("x", 1, Some(1)));

        let report = engine(&h)
            .reconcile(&UserSession::new(CHAT), h.mailbox.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.checked, 0);
        assert!(h.ledger.contains(CHAT + 1, "x"));
    }
}
