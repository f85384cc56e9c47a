//! Telegram Bot API adapter
//!
//! A minimal JSON-over-HTTPS client for the handful of Bot API methods the
//! bridge needs, plus the [`Notifier`](crate::backend::Notifier) built on it.

pub mod format;
mod notifier;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::error::{BridgeError, Result};
use crate::types::ChatId;

pub use notifier::TelegramNotifier;

pub const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<IncomingMessage>,
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub message: Option<IncomingMessage>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// Envelope of every Bot API response
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    error_code: Option<i64>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    endpoint: String,
}

impl TelegramClient {
    pub fn new(http: reqwest::Client, api_base: &str, token: &str) -> Self {
        Self {
            http,
            endpoint: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    async fn call<P: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R> {
        let response = self
            .http
            .post(format!("{}/{}", self.endpoint, method))
            .json(params)
            .send()
            .await?;

        let body: ApiResponse<R> = response
            .json()
            .await
            .map_err(|e| BridgeError::Telegram(format!("{}: invalid response: {}", method, e)))?;

        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                description,
                error_code,
                ..
            } => Err(BridgeError::Telegram(format!(
                "{} failed ({}): {}",
                method,
                error_code.unwrap_or_default(),
                description.unwrap_or_else(|| "no description".to_string())
            ))),
        }
    }

    /// Send an HTML message and return its message id
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<i64> {
        let mut params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
        });
        if let Some(keyboard) = keyboard {
            params["reply_markup"] = serde_json::to_value(keyboard)?;
        }

        let sent: IncomingMessage = self.call("sendMessage", &params).await?;
        debug!(chat_id = %chat_id, message_id = sent.message_id, "Message sent");
        Ok(sent.message_id)
    }

    pub async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<()> {
        let params = serde_json::json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call("deleteMessage", &params).await?;
        Ok(())
    }

    pub async fn edit_reply_markup(
        &self,
        chat_id: ChatId,
        message_id: i64,
        keyboard: &InlineKeyboardMarkup,
    ) -> Result<()> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "reply_markup": keyboard,
        });
        // Returns the edited message, or `true` for inline messages
        let _: serde_json::Value = self.call("editMessageReplyMarkup", &params).await?;
        Ok(())
    }

    pub async fn answer_callback_query(&self, callback_id: &str, text: &str) -> Result<()> {
        let params = serde_json::json!({ "callback_query_id": callback_id, "text": text });
        let _: bool = self.call("answerCallbackQuery", &params).await?;
        Ok(())
    }

    /// Long-poll for updates after `offset`
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> Result<Vec<Update>> {
        let params = serde_json::json!({
            "offset": offset,
            "timeout": timeout_secs,
            "allowed_updates": ["message", "callback_query"],
        });
        self.call("getUpdates", &params).await
    }
}
