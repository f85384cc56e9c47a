//! Gmail REST API adapter
//!
//! [`GmailStore`] turns stored OAuth credentials into an authenticated
//! [`GmailMailbox`], refreshing the access token when it is about to expire.

pub mod api;
pub mod mapping;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backend::{Authenticated, MailStore};
use crate::oauth::OAuthManager;
use crate::types::error::{BridgeError, Result};
use crate::types::Credentials;

pub use api::{GmailError, GmailMailbox, GMAIL_API_BASE};

pub struct GmailStore {
    http: reqwest::Client,
    base_url: String,
    oauth: Arc<OAuthManager>,
}

impl GmailStore {
    pub fn new(http: reqwest::Client, base_url: &str, oauth: Arc<OAuthManager>) -> Self {
        Self {
            http,
            base_url: base_url.to_string(),
            oauth,
        }
    }

    async fn refresh(&self, credentials: &Credentials) -> Result<Credentials> {
        let refresh_token = credentials.refresh_token.as_deref().ok_or_else(|| {
            BridgeError::Auth("access token expired and no refresh token stored".to_string())
        })?;
        let tokens = self.oauth.refresh_tokens(refresh_token).await?;
        debug!("Access token refreshed");
        Ok(tokens.into_credentials(credentials.email.clone()))
    }

    fn mailbox(&self, access_token: &str) -> GmailMailbox {
        GmailMailbox::new(self.http.clone(), &self.base_url, access_token)
    }
}

#[async_trait]
impl MailStore for GmailStore {
    async fn authenticate(&self, credentials: &Credentials) -> Result<Authenticated> {
        let mut refreshed = None;
        if OAuthManager::should_refresh(credentials.expires_at) && credentials.refresh_token.is_some() {
            refreshed = Some(self.refresh(credentials).await?);
        }

        let active = refreshed.as_ref().unwrap_or(credentials);
        let mut mailbox = self.mailbox(&active.access_token);

        // The profile call doubles as token validation
        let profile = match mailbox.profile().await {
            Ok(profile) => profile,
            Err(GmailError::Unauthorized(_)) if refreshed.is_none() && credentials.refresh_token.is_some() => {
                info!("Access token rejected, trying a refresh");
                let fresh = self.refresh(credentials).await?;
                mailbox = self.mailbox(&fresh.access_token);
                let profile = mailbox.profile().await?;
                refreshed = Some(fresh);
                profile
            }
            Err(e) => return Err(e.into()),
        };

        // Remember the address the first time we see it
        if credentials.email.as_deref() != Some(profile.email_address.as_str()) {
            let mut updated = refreshed.unwrap_or_else(|| credentials.clone());
            updated.email = Some(profile.email_address);
            refreshed = Some(updated);
        }

        Ok(Authenticated {
            mailbox: Arc::new(mailbox),
            refreshed,
        })
    }
}
