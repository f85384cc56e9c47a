//! Thin client for the Gmail REST API

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::mapping::{
    to_mail_message, GmailMessage, GmailMessageList, GmailProfile, LABEL_INBOX, LABEL_STARRED,
    LABEL_TRASH,
};
use crate::backend::Mailbox;
use crate::types::error::{BridgeError, Result};
use crate::types::MailMessage;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Error)]
pub enum GmailError {
    #[error("not found")]
    NotFound,

    #[error("unauthorized ({0})")]
    Unauthorized(StatusCode),

    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("decode: {0}")]
    Decode(String),
}

impl From<GmailError> for BridgeError {
    fn from(err: GmailError) -> Self {
        match err {
            GmailError::Unauthorized(_) => BridgeError::Auth(err.to_string()),
            GmailError::Transport(msg) => BridgeError::Network(msg),
            other => BridgeError::MailApi(other.to_string()),
        }
    }
}

/// One user's mailbox, bound to an access token
pub struct GmailMailbox {
    http: Client,
    base_url: String,
    access_token: String,
}

impl GmailMailbox {
    pub fn new(http: Client, base_url: &str, access_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/users/me/{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, GmailError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await
            .map_err(|e| GmailError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> std::result::Result<T, GmailError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await
            .map_err(|e| GmailError::Transport(e.to_string()))?;
        Self::read_json(response).await
    }

    async fn read_json<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> std::result::Result<T, GmailError> {
        let status = response.status();
        match status {
            s if s.is_success() => response
                .json()
                .await
                .map_err(|e| GmailError::Decode(e.to_string())),
            StatusCode::NOT_FOUND => Err(GmailError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(GmailError::Unauthorized(status))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(GmailError::Status { status, body })
            }
        }
    }

    pub async fn profile(&self) -> std::result::Result<GmailProfile, GmailError> {
        self.get_json("profile", &[]).await
    }

    async fn list_inbox(
        &self,
        limit: usize,
        unread_only: bool,
    ) -> std::result::Result<GmailMessageList, GmailError> {
        let mut query = vec![
            ("labelIds", LABEL_INBOX.to_string()),
            ("maxResults", limit.to_string()),
        ];
        if unread_only {
            query.push(("q", "is:unread".to_string()));
        }
        self.get_json("messages", &query).await
    }

    async fn get_message(
        &self,
        id: &str,
        format: &str,
    ) -> std::result::Result<GmailMessage, GmailError> {
        self.get_json(&format!("messages/{}", id), &[("format", format.to_string())])
            .await
    }

    async fn modify_labels(
        &self,
        id: &str,
        add: &[&str],
        remove: &[&str],
    ) -> std::result::Result<(), GmailError> {
        let body = serde_json::json!({ "addLabelIds": add, "removeLabelIds": remove });
        let _: serde_json::Value = self
            .post_json(&format!("messages/{}/modify", id), &body)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Mailbox for GmailMailbox {
    async fn fetch_recent(&self, limit: usize, unread_only: bool) -> Result<Vec<MailMessage>> {
        let list = self
            .list_inbox(limit, unread_only)
            .await
            .map_err(|e| BridgeError::TransientFetch(e.to_string()))?;

        let mut messages = Vec::with_capacity(list.messages.len());
        for reference in list.messages {
            match self.get_message(&reference.id, "full").await {
                Ok(message) => messages.push(to_mail_message(&message)),
                // Deleted between list and get
                Err(GmailError::NotFound) => {
                    debug!(message_id = %reference.id, "Message vanished while fetching")
                }
                Err(e) => return Err(BridgeError::TransientFetch(e.to_string())),
            }
        }

        // The list endpoint already returns newest first; keep it stable
        messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));
        Ok(messages)
    }

    async fn still_present(&self, message_id: &str) -> bool {
        match self.get_message(message_id, "minimal").await {
            Ok(message) => message.has_label(LABEL_INBOX) && !message.has_label(LABEL_TRASH),
            Err(GmailError::NotFound) => false,
            Err(e) => {
                warn!(message_id = %message_id, "Presence check inconclusive: {}", e);
                true
            }
        }
    }

    async fn is_read(&self, message_id: &str) -> bool {
        match self.get_message(message_id, "minimal").await {
            Ok(message) => !message.has_label(super::mapping::LABEL_UNREAD),
            Err(e) => {
                debug!(message_id = %message_id, "Read-state check inconclusive: {}", e);
                false
            }
        }
    }

    async fn trash(&self, message_id: &str) -> Result<()> {
        let _: serde_json::Value = self
            .post_json(&format!("messages/{}/trash", message_id), &serde_json::json!({}))
            .await?;
        Ok(())
    }

    async fn archive(&self, message_id: &str) -> Result<()> {
        self.modify_labels(message_id, &[], &[LABEL_INBOX]).await?;
        Ok(())
    }

    async fn star(&self, message_id: &str) -> Result<()> {
        self.modify_labels(message_id, &[LABEL_STARRED], &[]).await?;
        Ok(())
    }
}
