//! Telegram front-end
//!
//! A producer task long-polls `getUpdates` and feeds a channel; the consumer
//! handles commands and button callbacks one update at a time.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::actions::{apply_action, ActionOutcome};
use super::commands::{BotCommand, CallbackAction};
use crate::adapters::sqlite::{ledger::recent_actions, sessions, DbPool};
use crate::adapters::telegram::format::{action_keyboard, escape_html};
use crate::adapters::telegram::{CallbackQuery, IncomingMessage, TelegramClient, Update};
use crate::backend::Collaborators;
use crate::oauth::{parse_authorization_input, OAuthManager};
use crate::state::SupervisorRegistry;
use crate::sync::pause;
use crate::types::error::{BridgeError, Result};
use crate::types::{ChatId, NotificationHandle, UserSession};

/// Wait after a failed `getUpdates` call
const UPDATE_RETRY_DELAY: Duration = Duration::from_secs(5);

const HELP_TEXT: &str = "📬 <b>mailgram</b> forwards new Gmail messages to this chat.\n\n\
/connect - authorize access to your Gmail account\n\
/code &lt;code&gt; - finish authorization with the code from Google\n\
/status - show connection and settings\n\
/sync on|off - report notifications removed for deleted mail\n\
/unread on|off - only forward unread messages\n\
/reconnect - resume polling after an authorization problem";

const NOT_CONNECTED: &str = "Not connected yet. Send /connect to link your Gmail account.";

pub struct BotService {
    client: Arc<TelegramClient>,
    collab: Collaborators,
    oauth: Arc<OAuthManager>,
    registry: Arc<SupervisorRegistry>,
    pool: DbPool,
    long_poll_secs: u64,
}

impl BotService {
    pub fn new(
        client: Arc<TelegramClient>,
        collab: Collaborators,
        oauth: Arc<OAuthManager>,
        registry: Arc<SupervisorRegistry>,
        pool: DbPool,
        long_poll_secs: u64,
    ) -> Self {
        Self {
            client,
            collab,
            oauth,
            registry,
            pool,
            long_poll_secs,
        }
    }

    /// Receive and handle updates until `cancel` fires
    pub async fn run(&self, cancel: CancellationToken) {
        let (tx, rx) = flume::unbounded::<Update>();
        let producer = tokio::spawn(poll_updates(
            self.client.clone(),
            self.long_poll_secs,
            tx,
            cancel.clone(),
        ));

        info!("Bot front-end started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = rx.recv_async() => match received {
                    Ok(update) => self.handle_update(update).await,
                    Err(_) => break,
                },
            }
        }

        if let Err(e) = producer.await {
            warn!("Update producer ended abnormally: {}", e);
        }
        info!("Bot front-end stopped");
    }

    async fn handle_update(&self, update: Update) {
        debug!(update_id = update.update_id, "Handling update");
        if let Some(message) = update.message {
            self.handle_message(message).await;
        } else if let Some(query) = update.callback_query {
            self.handle_callback(query).await;
        }
    }

    async fn handle_message(&self, message: IncomingMessage) {
        let chat_id = message.chat.id;
        let Some(command) = message.text.as_deref().and_then(BotCommand::parse) else {
            return;
        };

        let reply = match self.handle_command(chat_id, command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(chat_id = %chat_id, "Command failed: {}", e);
                error_reply(&e)
            }
        };

        if let Err(e) = self.client.send_message(chat_id, &reply, None).await {
            error!(chat_id = %chat_id, "Failed to send reply: {}", e);
        }
    }

    /// Run one command and return the HTML reply
    pub async fn handle_command(&self, chat_id: ChatId, command: BotCommand) -> Result<String> {
        info!(chat_id = %chat_id, command = command.name(), "Bot command");
        match command {
            BotCommand::Start => Ok(HELP_TEXT.to_string()),
            BotCommand::Connect => {
                let url = self.oauth.start_auth_flow(chat_id)?;
                Ok(format!(
                    "🔑 Open this link and allow access:\n{}\n\n\
                     Then send <code>/code</code> followed by the code, or paste the full \
                     address your browser was redirected to.",
                    escape_html(&url)
                ))
            }
            BotCommand::Code(input) => self.complete_authorization(chat_id, &input).await,
            BotCommand::Status => self.status(chat_id).await,
            BotCommand::Sync(value) => {
                let Some(session) = self.known_session(chat_id).await? else {
                    return Ok(NOT_CONNECTED.to_string());
                };
                match value {
                    Some(enabled) => {
                        self.registry.set_sync_notifications(chat_id, enabled).await?;
                        Ok(format!("Deletion reports are now {}.", on_off(enabled)))
                    }
                    None => Ok(format!(
                        "Deletion reports are {}. Use /sync on or /sync off.",
                        on_off(session.sync_notifications())
                    )),
                }
            }
            BotCommand::Unread(value) => {
                let Some(session) = self.known_session(chat_id).await? else {
                    return Ok(NOT_CONNECTED.to_string());
                };
                match value {
                    Some(enabled) => {
                        self.registry.set_unread_only(chat_id, enabled).await?;
                        Ok(format!("Unread-only mode is now {}.", on_off(enabled)))
                    }
                    None => Ok(format!(
                        "Unread-only mode is {}. Use /unread on or /unread off.",
                        on_off(session.unread_only())
                    )),
                }
            }
            BotCommand::Reconnect => self.reconnect(chat_id).await,
            BotCommand::Unknown(name) => Ok(format!(
                "Unknown command /{}. Send /help for the list.",
                escape_html(&name)
            )),
        }
    }

    async fn complete_authorization(&self, chat_id: ChatId, input: &str) -> Result<String> {
        let Some((code, state)) = parse_authorization_input(input) else {
            return Ok("Usage: <code>/code &lt;authorization code&gt;</code>".to_string());
        };

        let tokens = self
            .oauth
            .complete_auth_flow(chat_id, &code, state.as_deref())
            .await?;

        // Keep the preferences of a returning user
        let session = sessions::get_session(&self.pool, chat_id)?
            .unwrap_or_else(|| UserSession::new(chat_id));
        session.clear_auth_failed();
        sessions::upsert_session(&self.pool, &session)?;

        let mut credentials = tokens.into_credentials(None);
        self.collab.credentials.store(chat_id, &credentials)?;

        // Verify the tokens right away and learn the account address
        let authenticated = self.collab.mail.authenticate(&credentials).await?;
        if let Some(refreshed) = authenticated.refreshed {
            self.collab.credentials.store(chat_id, &refreshed)?;
            credentials = refreshed;
        }

        self.registry.start(session).await;
        self.registry.clear_auth_failure(chat_id).await?;

        info!(chat_id = %chat_id, "Gmail account connected");
        Ok(format!(
            "✅ Connected{}. New mail will show up here.",
            credentials
                .email
                .map(|email| format!(" to {}", escape_html(&email)))
                .unwrap_or_default()
        ))
    }

    async fn status(&self, chat_id: ChatId) -> Result<String> {
        let Some(session) = self.known_session(chat_id).await? else {
            return Ok(NOT_CONNECTED.to_string());
        };

        let account = match self.collab.credentials.get(chat_id)? {
            Some(credentials) => credentials
                .email
                .map(|email| escape_html(&email))
                .unwrap_or_else(|| "connected".to_string()),
            None => "not connected".to_string(),
        };
        let polling = if session.auth_failed() {
            "paused, authorization needed"
        } else if self.registry.session(chat_id).await.is_some() {
            "active"
        } else {
            "stopped"
        };
        let tracked = self.collab.ledger.count_for_user(chat_id)?;

        let mut reply = format!(
            "📊 <b>Status</b>\nAccount: {}\nPolling: {}\nTracked notifications: {}\n\
             Deletion reports: {}\nUnread only: {}",
            account,
            polling,
            tracked,
            on_off(session.sync_notifications()),
            on_off(session.unread_only()),
        );

        let recent = recent_actions(&self.pool, chat_id, 3)?;
        if !recent.is_empty() {
            reply.push_str("\n\nRecent activity:");
            for (message_id, kind, _) in recent {
                reply.push_str(&format!(
                    "\n• {} <code>{}</code>",
                    kind.as_str(),
                    escape_html(&message_id)
                ));
            }
        }
        Ok(reply)
    }

    async fn reconnect(&self, chat_id: ChatId) -> Result<String> {
        let Some(session) = self.known_session(chat_id).await? else {
            return Ok(NOT_CONNECTED.to_string());
        };
        if self.collab.credentials.get(chat_id)?.is_none() {
            return Ok("No stored authorization. Send /connect to sign in again.".to_string());
        }

        self.registry.start(session).await;
        let cleared = self.registry.clear_auth_failure(chat_id).await?;
        Ok(if cleared {
            "🔄 Polling resumed.".to_string()
        } else {
            "Polling is already active.".to_string()
        })
    }

    /// The live session if a supervisor runs, otherwise the stored one
    async fn known_session(&self, chat_id: ChatId) -> Result<Option<UserSession>> {
        if let Some(session) = self.registry.session(chat_id).await {
            return Ok(Some(session));
        }
        sessions::get_session(&self.pool, chat_id)
    }

    async fn handle_callback(&self, query: CallbackQuery) {
        let toast = match self.run_callback(&query).await {
            Ok(toast) => toast,
            Err(e) => {
                warn!(callback_id = %query.id, "Callback failed: {}", e);
                callback_error_toast(&e)
            }
        };

        if let Err(e) = self.client.answer_callback_query(&query.id, toast).await {
            warn!(callback_id = %query.id, "Failed to answer callback: {}", e);
        }
    }

    async fn run_callback(&self, query: &CallbackQuery) -> Result<&'static str> {
        let action = query
            .data
            .as_deref()
            .and_then(CallbackAction::parse)
            .ok_or_else(|| BridgeError::InvalidInput("unrecognized button".to_string()))?;
        let message = query
            .message
            .as_ref()
            .ok_or_else(|| BridgeError::InvalidInput("button message is gone".to_string()))?;
        let chat_id = message.chat.id;

        let outcome = apply_action(
            &self.collab,
            chat_id,
            &action,
            NotificationHandle(message.message_id),
        )
        .await?;

        if outcome == ActionOutcome::Starred {
            let keyboard = action_keyboard(&action.message_id, true);
            if let Err(e) = self
                .client
                .edit_reply_markup(chat_id, message.message_id, &keyboard)
                .await
            {
                debug!(chat_id = %chat_id, "Could not update keyboard: {}", e);
            }
        }

        Ok(outcome.toast(action.kind))
    }
}

async fn poll_updates(
    client: Arc<TelegramClient>,
    timeout_secs: u64,
    tx: flume::Sender<Update>,
    cancel: CancellationToken,
) {
    let mut offset = 0;
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = client.get_updates(offset, timeout_secs) => result,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = offset.max(update.update_id + 1);
                    if tx.send(update).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                if pause(&cancel, UPDATE_RETRY_DELAY).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!("Update producer stopped");
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

fn error_reply(err: &BridgeError) -> String {
    match err {
        BridgeError::Auth(_) => {
            "⚠️ Authorization failed or expired. Send /connect to start over.".to_string()
        }
        BridgeError::Network(_) => "⚠️ Could not reach Google right now, try again.".to_string(),
        _ => "⚠️ Something went wrong, please try again later.".to_string(),
    }
}

fn callback_error_toast(err: &BridgeError) -> &'static str {
    match err {
        BridgeError::Auth(_) => "Not authorized, send /connect",
        BridgeError::InvalidInput(_) => "This button is no longer valid",
        _ => "Action failed, try again",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_memory_pool;
    use crate::backend::CredentialProvider;
    use crate::oauth::ProviderConfig;
    use crate::services::commands::CallbackKind;
    use crate::sync::{CycleSettings, PollCycle, PollSupervisor};
    use crate::testing::Harness;

    const CHAT: ChatId = 4242;

    fn bot(h: &Harness) -> BotService {
        let collab = h.collaborators();
        let cycle = Arc::new(PollCycle::new(collab.clone(), CycleSettings::default()));
        let supervisor = Arc::new(PollSupervisor::new(cycle, collab.notifier.clone()));
        let registry = Arc::new(SupervisorRegistry::new(
            supervisor,
            collab.sessions.clone(),
            Duration::from_secs(60),
            CancellationToken::new(),
        ));
        let http = reqwest::Client::new();
        let oauth = Arc::new(OAuthManager::new(
            ProviderConfig::google("client-id", None, "http://localhost"),
            http.clone(),
        ));
        BotService::new(
            Arc::new(TelegramClient::new(http, "http://127.0.0.1:9", "123:test")),
            collab,
            oauth,
            registry,
            create_memory_pool().unwrap(),
            30,
        )
    }

    #[tokio::test]
    async fn test_help_and_unknown() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);

        let help = bot.handle_command(CHAT, BotCommand::Start).await.unwrap();
        assert!(help.contains("/connect"));

        let unknown = bot
            .handle_command(CHAT, BotCommand::Unknown("<x>".to_string()))
            .await
            .unwrap();
        assert!(unknown.contains("/&lt;x&gt;"));
    }

    #[tokio::test]
    async fn test_connect_returns_consent_url() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);

        let reply = bot.handle_command(CHAT, BotCommand::Connect).await.unwrap();

        assert!(reply.contains("accounts.google.com"));
        assert!(bot.oauth.has_pending_flow(CHAT));
    }

    #[tokio::test]
    async fn test_code_without_flow_is_auth_error() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);

        let usage = bot
            .handle_command(CHAT, BotCommand::Code(String::new()))
            .await
            .unwrap();
        assert!(usage.starts_with("Usage"));

        let err = bot
            .handle_command(CHAT, BotCommand::Code("4/abc".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Auth(_)));
        assert!(error_reply(&err).contains("/connect"));
    }

    #[tokio::test]
    async fn test_commands_for_unknown_chat() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);

        for command in [
            BotCommand::Status,
            BotCommand::Sync(Some(true)),
            BotCommand::Unread(None),
            BotCommand::Reconnect,
        ] {
            let reply = bot.handle_command(CHAT, command).await.unwrap();
            assert_eq!(reply, NOT_CONNECTED);
        }
    }

    #[tokio::test]
    async fn test_status_and_toggles_for_stored_session() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);
        sessions::upsert_session(&bot.pool, &UserSession::new(CHAT)).unwrap();

        let status = bot.handle_command(CHAT, BotCommand::Status).await.unwrap();
        assert!(status.contains("user@example.com"));
        assert!(status.contains("Polling: stopped"));
        assert!(status.contains("Tracked notifications: 0"));

        let reply = bot
            .handle_command(CHAT, BotCommand::Unread(Some(true)))
            .await
            .unwrap();
        assert!(reply.contains("now on"));
        assert_eq!(
            *h.sessions.preferences.lock().unwrap(),
            vec![(CHAT, "unread_only", true)]
        );
    }

    #[tokio::test]
    async fn test_reconnect_without_credentials() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);
        sessions::upsert_session(&bot.pool, &UserSession::with_flags(CHAT, true, true, false))
            .unwrap();
        h.credentials.clear(CHAT).unwrap();

        let reply = bot.handle_command(CHAT, BotCommand::Reconnect).await.unwrap();

        assert!(reply.contains("/connect"));
        assert!(bot.registry.session(CHAT).await.is_none());
    }

    #[tokio::test]
    async fn test_reconnect_resumes_flagged_session() {
        let h = Harness::connected(CHAT);
        let bot = bot(&h);
        sessions::upsert_session(&bot.pool, &UserSession::with_flags(CHAT, true, true, false))
            .unwrap();

        let reply = bot.handle_command(CHAT, BotCommand::Reconnect).await.unwrap();

        assert_eq!(reply, "🔄 Polling resumed.");
        let live = bot.registry.session(CHAT).await.unwrap();
        assert!(!live.auth_failed());
        assert_eq!(*h.sessions.writes.lock().unwrap(), vec![(CHAT, false)]);
        bot.registry.shutdown().await;
    }

    #[test]
    fn test_callback_error_toasts() {
        assert_eq!(
            callback_error_toast(&BridgeError::Auth("x".to_string())),
            "Not authorized, send /connect"
        );
        assert_eq!(
            callback_error_toast(&BridgeError::MailApi("500".to_string())),
            "Action failed, try again"
        );
        assert_eq!(
            ActionOutcome::Removed.toast(CallbackKind::Delete),
            "🗑 Moved to trash"
        );
    }
}
