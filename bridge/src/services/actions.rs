//! Inline mailbox actions triggered from notification buttons

use tracing::{info, warn};

use super::commands::{CallbackAction, CallbackKind};
use crate::backend::Collaborators;
use crate::types::error::{BridgeError, Result};
use crate::types::{ActionKind, ChatId, NotificationHandle};

/// What the front-end should do with the notification afterwards
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The notification was removed along with the tracked row
    Removed,
    /// The notification stays; its keyboard should show the starred state
    Starred,
}

impl ActionOutcome {
    pub fn toast(&self, kind: CallbackKind) -> &'static str {
        match (self, kind) {
            (ActionOutcome::Removed, CallbackKind::Archive) => "📥 Archived",
            (ActionOutcome::Removed, _) => "🗑 Moved to trash",
            (ActionOutcome::Starred, _) => "⭐ Starred",
        }
    }
}

/// Apply a button action to the user's mailbox.
///
/// `notification` is the chat message the button belongs to. Delete and
/// archive remove it and forget the tracked row, so the next reconcile pass
/// has nothing left to do for that message.
pub async fn apply_action(
    collab: &Collaborators,
    chat_id: ChatId,
    action: &CallbackAction,
    notification: NotificationHandle,
) -> Result<ActionOutcome> {
    let credentials = collab
        .credentials
        .get(chat_id)?
        .ok_or_else(|| BridgeError::Auth("no Gmail account connected".to_string()))?;
    let authenticated = collab.mail.authenticate(&credentials).await?;
    if let Some(refreshed) = &authenticated.refreshed {
        collab.credentials.store(chat_id, refreshed)?;
    }
    let mailbox = authenticated.mailbox;
    let message_id = action.message_id.as_str();

    let (outcome, recorded) = match action.kind {
        CallbackKind::Delete => {
            mailbox.trash(message_id).await?;
            (ActionOutcome::Removed, ActionKind::Deleted)
        }
        CallbackKind::Archive => {
            mailbox.archive(message_id).await?;
            (ActionOutcome::Removed, ActionKind::Archived)
        }
        CallbackKind::Star => {
            mailbox.star(message_id).await?;
            (ActionOutcome::Starred, ActionKind::Starred)
        }
    };

    info!(chat_id = %chat_id, message_id = %message_id, action = recorded.as_str(), "Applied inline action");

    if outcome == ActionOutcome::Removed {
        let handle = collab
            .ledger
            .get(chat_id, message_id)?
            .and_then(|row| row.notification_handle)
            .unwrap_or(notification);
        if let Err(e) = collab.notifier.retract(chat_id, handle).await {
            warn!(chat_id = %chat_id, handle = %handle, "Failed to remove notification: {}", e);
        }
        collab.ledger.delete(chat_id, message_id)?;
    }

    if let Err(e) = collab
        .ledger
        .record_action(chat_id, message_id, recorded, None)
    {
        warn!(chat_id = %chat_id, "Failed to record {} action: {}", recorded.as_str(), e);
    }

    Ok(outcome)
}
