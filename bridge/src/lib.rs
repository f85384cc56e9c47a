//! mailgram - Gmail to Telegram notification bridge
//!
//! Polls each connected user's Gmail inbox, forwards new messages to their
//! Telegram chat and removes notifications for mail that disappeared.
//!
//! ## Module Organization
//!
//! - `sync/`: per-user polling supervisor, poll cycle and reconciliation
//! - `backend/`: trait seams the sync core is written against
//! - `adapters/`: Gmail, Telegram and SQLite implementations of those traits
//! - `services/`: bot commands and inline mailbox actions
//! - `state/`: registry of running supervisors
//! - `types/`: data structures and the error type
//! - `config/`: configuration file and environment handling
//! - `oauth/`: Google OAuth2 with PKCE
//! - `encryption`: token encryption at rest

pub mod adapters;
pub mod backend;
pub mod config;
pub mod encryption;
pub mod oauth;
pub mod services;
pub mod state;
pub mod sync;
pub mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use adapters::gmail::GmailStore;
use adapters::sqlite::{
    create_pool, sessions::list_sessions, SqliteCredentialStore, SqliteLedger, SqliteSessionStore,
};
use adapters::telegram::{TelegramClient, TelegramNotifier};
use backend::Collaborators;
use config::AppConfig;
use encryption::TokenCipher;
use oauth::{OAuthManager, ProviderConfig};
use services::BotService;
use state::SupervisorRegistry;
use sync::{PollCycle, PollSupervisor};
use types::error::{BridgeError, Result};

/// Initialize tracing for logging.
///
/// Debug builds log our crate at debug level and everything else at info.
/// `RUST_LOG` overrides both.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            EnvFilter::new("mailgram_lib=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Validate the configuration and open everything `run` would open,
/// without contacting Telegram or Google
pub fn check_config(config: &AppConfig) -> Result<()> {
    config.validate()?;
    create_pool(&config.storage.database)?;
    TokenCipher::from_secret(&config.storage.secret)?;
    info!(database = ?config.storage.database, "Configuration OK");
    Ok(())
}

/// Run the bridge until Ctrl-C
pub async fn run(config: AppConfig) -> Result<()> {
    config.validate()?;
    info!("Starting mailgram ...");

    let pool = create_pool(&config.storage.database)?;
    let cipher = Arc::new(TokenCipher::from_secret(&config.storage.secret)?);

    // getUpdates holds the connection for the whole long-poll window
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.telegram.long_poll_secs + 30))
        .build()
        .map_err(|e| BridgeError::Config(format!("Failed to build HTTP client: {}", e)))?;

    let oauth = Arc::new(OAuthManager::new(
        ProviderConfig::google(
            &config.google.client_id,
            config.google.client_secret.as_deref(),
            &config.google.redirect_uri,
        ),
        http.clone(),
    ));
    let telegram = Arc::new(TelegramClient::new(
        http.clone(),
        &config.telegram.api_base,
        &config.telegram.bot_token,
    ));

    let collab = Collaborators {
        credentials: Arc::new(SqliteCredentialStore::new(pool.clone(), cipher)),
        mail: Arc::new(GmailStore::new(http, &config.google.api_base, oauth.clone())),
        notifier: Arc::new(TelegramNotifier::new(telegram.clone())),
        ledger: Arc::new(SqliteLedger::new(pool.clone())),
        sessions: Arc::new(SqliteSessionStore::new(pool.clone())),
    };

    let cycle = Arc::new(PollCycle::new(
        collab.clone(),
        config.polling.cycle_settings(),
    ));
    let supervisor = Arc::new(PollSupervisor::new(cycle, collab.notifier.clone()));

    let cancel = CancellationToken::new();
    let registry = Arc::new(SupervisorRegistry::new(
        supervisor,
        collab.sessions.clone(),
        config.polling.interval(),
        cancel.clone(),
    ));

    let stored = list_sessions(&pool)?;
    info!(count = stored.len(), "Resuming stored sessions");
    for session in stored {
        registry.start(session).await;
    }

    let bot = BotService::new(
        telegram,
        collab,
        oauth,
        registry.clone(),
        pool,
        config.telegram.long_poll_secs,
    );
    let bot_cancel = cancel.clone();
    let bot_task = tokio::spawn(async move { bot.run(bot_cancel).await });

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => error!("Failed to listen for Ctrl-C, shutting down: {}", e),
    }

    cancel.cancel();
    registry.shutdown().await;
    if let Err(e) = bot_task.await {
        warn!("Bot task ended abnormally: {}", e);
    }

    info!("mailgram stopped");
    Ok(())
}
