//! Encrypted OAuth token storage
//!
//! Tokens are encrypted with [`TokenCipher`] before they reach the
//! `credentials` table. A row that no longer decrypts (for example after the
//! bridge secret changed) is treated as missing, which sends the user back
//! through `/connect`.

use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use tracing::{debug, warn};

use super::DbPool;
use crate::backend::CredentialProvider;
use crate::encryption::TokenCipher;
use crate::types::error::Result;
use crate::types::{ChatId, Credentials};

pub struct SqliteCredentialStore {
    pool: DbPool,
    cipher: Arc<TokenCipher>,
}

impl SqliteCredentialStore {
    pub fn new(pool: DbPool, cipher: Arc<TokenCipher>) -> Self {
        Self { pool, cipher }
    }
}

impl CredentialProvider for SqliteCredentialStore {
    fn get(&self, chat_id: ChatId) -> Result<Option<Credentials>> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT email, access_token, refresh_token, expires_at
                 FROM credentials WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((email, access_token, refresh_token, expires_at)) = row else {
            return Ok(None);
        };

        let decrypted = self.cipher.decrypt(&access_token).and_then(|access| {
            let refresh = refresh_token
                .as_deref()
                .map(|t| self.cipher.decrypt(t))
                .transpose()?;
            Ok((access, refresh))
        });

        match decrypted {
            Ok((access_token, refresh_token)) => Ok(Some(Credentials {
                access_token,
                refresh_token,
                expires_at,
                email,
            })),
            Err(e) => {
                warn!(chat_id = %chat_id, "Stored tokens could not be decrypted: {}", e);
                Ok(None)
            }
        }
    }

    fn store(&self, chat_id: ChatId, credentials: &Credentials) -> Result<()> {
        let access = self.cipher.encrypt(&credentials.access_token)?;
        let refresh = credentials
            .refresh_token
            .as_deref()
            .map(|t| self.cipher.encrypt(t))
            .transpose()?;

        let conn = self.pool.get()?;
        // A refresh response may omit the refresh token; keep the old one then
        conn.execute(
            "INSERT INTO credentials (chat_id, email, access_token, refresh_token, expires_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(chat_id) DO UPDATE SET
                email = COALESCE(excluded.email, credentials.email),
                access_token = excluded.access_token,
                refresh_token = COALESCE(excluded.refresh_token, credentials.refresh_token),
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at",
            params![
                chat_id,
                credentials.email,
                access,
                refresh,
                credentials.expires_at,
                chrono::Utc::now().timestamp_millis(),
            ],
        )?;
        debug!(chat_id = %chat_id, "Stored credentials");
        Ok(())
    }

    fn clear(&self, chat_id: ChatId) -> Result<()> {
        let conn = self.pool.get()?;
        conn.execute("DELETE FROM credentials WHERE chat_id = ?1", params![chat_id])?;
        debug!(chat_id = %chat_id, "Cleared credentials");
        Ok(())
    }
}
