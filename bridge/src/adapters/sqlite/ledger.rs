//! SQLite-backed message ledger

use chrono::{TimeZone, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use std::collections::HashSet;
use tracing::debug;

use super::DbPool;
use crate::backend::Ledger;
use crate::types::error::Result;
use crate::types::{ActionKind, ChatId, NotificationHandle, TrackedMessage};

/// Action log rows kept per chat; older ones are pruned on insert
pub const ACTION_LOG_KEEP: usize = 500;

pub struct SqliteLedger {
    pool: DbPool,
    action_log_keep: usize,
}

impl SqliteLedger {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            action_log_keep: ACTION_LOG_KEEP,
        }
    }

    pub fn with_action_log_keep(mut self, keep: usize) -> Self {
        self.action_log_keep = keep;
        self
    }
}

fn row_to_tracked(row: &Row) -> rusqlite::Result<TrackedMessage> {
    let received_ms: i64 = row.get(3)?;
    let handle: Option<i64> = row.get(4)?;
    Ok(TrackedMessage {
        message_id: row.get(0)?,
        subject: row.get(1)?,
        sender: row.get(2)?,
        received_at: Utc
            .timestamp_millis_opt(received_ms)
            .single()
            .unwrap_or_default(),
        notification_handle: handle.map(NotificationHandle),
    })
}

impl Ledger for SqliteLedger {
    fn known(&self, chat_id: ChatId, message_ids: &[String]) -> Result<HashSet<String>> {
        if message_ids.is_empty() {
            return Ok(HashSet::new());
        }

        let conn = self.pool.get()?;
        let placeholders = vec!["?"; message_ids.len()].join(", ");
        let sql = format!(
            "SELECT message_id FROM tracked_messages
             WHERE chat_id = {} AND message_id IN ({})",
            chat_id, placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(message_ids.iter()), |row| {
            row.get::<_, String>(0)
        })?;

        let mut known = HashSet::new();
        for row in rows {
            known.insert(row?);
        }
        Ok(known)
    }

    fn upsert(&self, chat_id: ChatId, message: &TrackedMessage) -> Result<()> {
        let conn = self.pool.get()?;
        // Metadata is immutable once tracked; only a missing handle is filled in
        conn.execute(
            "INSERT INTO tracked_messages
                (chat_id, message_id, subject, sender, received_at, notification_handle, tracked_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(chat_id, message_id) DO UPDATE SET
                notification_handle = COALESCE(tracked_messages.notification_handle, excluded.notification_handle)",
            params![
                chat_id,
                message.message_id,
                message.subject,
                message.sender,
                message.received_at.timestamp_millis(),
                message.notification_handle.map(|h| h.0),
                Utc::now().timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn attach_handle(
        &self,
        chat_id: ChatId,
        message_id: &str,
        handle: NotificationHandle,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        let updated = conn.execute(
            "UPDATE tracked_messages SET notification_handle = ?1
             WHERE chat_id = ?2 AND message_id = ?3",
            params![handle.0, chat_id, message_id],
        )?;
        if updated == 0 {
            debug!(chat_id = %chat_id, message_id = %message_id, "No tracked row to attach handle to");
        }
        Ok(())
    }

    fn get(&self, chat_id: ChatId, message_id: &str) -> Result<Option<TrackedMessage>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT message_id, subject, sender, received_at, notification_handle
                 FROM tracked_messages WHERE chat_id = ?1 AND message_id = ?2",
                params![chat_id, message_id],
                row_to_tracked,
            )
            .optional()?;
        Ok(row)
    }

    fn delete(&self, chat_id: ChatId, message_id: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        let deleted = conn.execute(
            "DELETE FROM tracked_messages WHERE chat_id = ?1 AND message_id = ?2",
            params![chat_id, message_id],
        )?;
        Ok(deleted > 0)
    }

    fn recent_for_user(&self, chat_id: ChatId, limit: usize) -> Result<Vec<TrackedMessage>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT message_id, subject, sender, received_at, notification_handle
             FROM tracked_messages WHERE chat_id = ?1
             ORDER BY received_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], row_to_tracked)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn count_for_user(&self, chat_id: ChatId) -> Result<u64> {
        let conn = self.pool.get()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tracked_messages WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn record_action(
        &self,
        chat_id: ChatId,
        message_id: &str,
        action: ActionKind,
        detail: Option<&str>,
    ) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO action_log (id, chat_id, message_id, action, detail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                uuid::Uuid::new_v4().to_string(),
                chat_id,
                message_id,
                action.as_str(),
                detail,
                Utc::now().timestamp_millis(),
            ],
        )?;

        let pruned = conn.execute(
            "DELETE FROM action_log WHERE chat_id = ?1 AND rowid NOT IN (
                SELECT rowid FROM action_log WHERE chat_id = ?1
                ORDER BY created_at DESC, rowid DESC LIMIT ?2
             )",
            params![chat_id, self.action_log_keep as i64],
        )?;
        if pruned > 0 {
            debug!(chat_id = %chat_id, pruned, "Pruned action log");
        }
        Ok(())
    }
}

/// Most recent actions for a chat, newest first
pub fn recent_actions(
    pool: &DbPool,
    chat_id: ChatId,
    limit: usize,
) -> Result<Vec<(String, ActionKind, Option<String>)>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT message_id, action, detail FROM action_log
         WHERE chat_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut actions = Vec::new();
    for row in rows {
        let (message_id, action, detail) = row?;
        if let Some(kind) = ActionKind::parse(&action) {
            actions.push((message_id, kind, detail));
        }
    }
    Ok(actions)
}
