use rusqlite::{params, OptionalExtension, Row};

use super::DbPool;
use crate::backend::SessionStore;
use crate::types::error::Result;
use crate::types::{ChatId, UserSession};

fn row_to_session(row: &Row) -> rusqlite::Result<UserSession> {
    Ok(UserSession::with_flags(
        row.get(0)?,
        row.get::<_, i64>(1)? != 0,
        row.get::<_, i64>(2)? != 0,
        row.get::<_, i64>(3)? != 0,
    ))
}

/// Insert a session, or overwrite the flags of an existing one
pub fn upsert_session(pool: &DbPool, session: &UserSession) -> Result<()> {
    let conn = pool.get()?;
    let now = chrono::Utc::now().timestamp_millis();
    conn.execute(
        "INSERT INTO sessions (chat_id, auth_failed, sync_notifications, unread_only, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)
         ON CONFLICT(chat_id) DO UPDATE SET
            auth_failed = excluded.auth_failed,
            sync_notifications = excluded.sync_notifications,
            unread_only = excluded.unread_only,
            updated_at = excluded.updated_at",
        params![
            session.chat_id(),
            session.auth_failed(),
            session.sync_notifications(),
            session.unread_only(),
            now,
        ],
    )?;
    Ok(())
}

pub fn get_session(pool: &DbPool, chat_id: ChatId) -> Result<Option<UserSession>> {
    let conn = pool.get()?;
    let session = conn
        .query_row(
            "SELECT chat_id, auth_failed, sync_notifications, unread_only
             FROM sessions WHERE chat_id = ?1",
            params![chat_id],
            row_to_session,
        )
        .optional()?;
    Ok(session)
}

pub fn list_sessions(pool: &DbPool) -> Result<Vec<UserSession>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT chat_id, auth_failed, sync_notifications, unread_only
         FROM sessions ORDER BY created_at",
    )?;
    let rows = stmt.query_map([], row_to_session)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?);
    }
    Ok(sessions)
}

fn set_flag(pool: &DbPool, chat_id: ChatId, column: &str, value: bool) -> Result<()> {
    let conn = pool.get()?;
    // Column names come from the fixed set below, never from user input
    let sql = format!(
        "UPDATE sessions SET {} = ?1, updated_at = ?2 WHERE chat_id = ?3",
        column
    );
    conn.execute(
        &sql,
        params![value, chrono::Utc::now().timestamp_millis(), chat_id],
    )?;
    Ok(())
}

pub fn set_auth_failed(pool: &DbPool, chat_id: ChatId, failed: bool) -> Result<()> {
    set_flag(pool, chat_id, "auth_failed", failed)
}

pub fn set_sync_notifications(pool: &DbPool, chat_id: ChatId, enabled: bool) -> Result<()> {
    set_flag(pool, chat_id, "sync_notifications", enabled)
}

pub fn set_unread_only(pool: &DbPool, chat_id: ChatId, enabled: bool) -> Result<()> {
    set_flag(pool, chat_id, "unread_only", enabled)
}

/// [`SessionStore`] over the `sessions` table
pub struct SqliteSessionStore {
    pool: DbPool,
}

impl SqliteSessionStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl SessionStore for SqliteSessionStore {
    fn set_auth_failed(&self, chat_id: ChatId, failed: bool) -> Result<()> {
        set_auth_failed(&self.pool, chat_id, failed)
    }

    fn set_sync_notifications(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        set_sync_notifications(&self.pool, chat_id, enabled)
    }

    fn set_unread_only(&self, chat_id: ChatId, enabled: bool) -> Result<()> {
        set_unread_only(&self.pool, chat_id, enabled)
    }
}
