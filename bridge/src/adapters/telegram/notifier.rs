use async_trait::async_trait;
use std::sync::Arc;

use super::format::{action_keyboard, escape_html, render_notification};
use super::TelegramClient;
use crate::backend::Notifier;
use crate::types::error::Result;
use crate::types::{ChatId, MailMessage, NotificationHandle};

/// [`Notifier`] that posts mail notifications into the user's chat
pub struct TelegramNotifier {
    client: Arc<TelegramClient>,
}

impl TelegramNotifier {
    pub fn new(client: Arc<TelegramClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, chat_id: ChatId, message: &MailMessage) -> Result<NotificationHandle> {
        let text = render_notification(message);
        let keyboard = action_keyboard(&message.message_id, false);
        let message_id = self
            .client
            .send_message(chat_id, &text, Some(&keyboard))
            .await?;
        Ok(NotificationHandle(message_id))
    }

    async fn retract(&self, chat_id: ChatId, handle: NotificationHandle) -> Result<()> {
        self.client.delete_message(chat_id, handle.0).await
    }

    async fn notify_text(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.client
            .send_message(chat_id, &escape_html(text), None)
            .await?;
        Ok(())
    }
}
