use rusqlite::Connection;

use crate::types::error::Result;

pub fn initialize_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch("
        -- One row per connected Telegram chat
        CREATE TABLE IF NOT EXISTS sessions (
            chat_id             INTEGER PRIMARY KEY,    -- Telegram chat id
            auth_failed         INTEGER NOT NULL DEFAULT 0,
            sync_notifications  INTEGER NOT NULL DEFAULT 1,
            unread_only         INTEGER NOT NULL DEFAULT 0,
            created_at          INTEGER NOT NULL,       -- unix epoch ms
            updated_at          INTEGER NOT NULL
        );

        -- OAuth tokens, encrypted at rest
        CREATE TABLE IF NOT EXISTS credentials (
            chat_id             INTEGER PRIMARY KEY REFERENCES sessions(chat_id) ON DELETE CASCADE,
            email               TEXT,
            access_token        TEXT NOT NULL,          -- base64(nonce || ciphertext)
            refresh_token       TEXT,                   -- base64(nonce || ciphertext)
            expires_at          INTEGER,                -- unix epoch seconds
            updated_at          INTEGER NOT NULL
        );

        -- Messages seen by the poller, and the notification that announced them
        CREATE TABLE IF NOT EXISTS tracked_messages (
            chat_id             INTEGER NOT NULL REFERENCES sessions(chat_id) ON DELETE CASCADE,
            message_id          TEXT NOT NULL,          -- Gmail message id
            subject             TEXT NOT NULL,
            sender              TEXT NOT NULL,
            received_at         INTEGER NOT NULL,       -- unix epoch ms
            notification_handle INTEGER,                -- Telegram message id, NULL until delivered
            tracked_at          INTEGER NOT NULL,
            PRIMARY KEY (chat_id, message_id)
        );

        CREATE INDEX IF NOT EXISTS idx_tracked_received ON tracked_messages(chat_id, received_at DESC);

        -- Audit trail of what the bridge did, capped per chat by the ledger
        CREATE TABLE IF NOT EXISTS action_log (
            id                  TEXT PRIMARY KEY,       -- UUID
            chat_id             INTEGER NOT NULL,
            message_id          TEXT NOT NULL,
            action              TEXT NOT NULL,          -- 'delivered' | 'delivery_failed' | 'error' | 'retracted' | ...
            detail              TEXT,
            created_at          INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_action_log_chat ON action_log(chat_id, created_at DESC);
    ")?;

    Ok(())
}
