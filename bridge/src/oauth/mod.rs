//! Google OAuth2 for Gmail access
//!
//! Authorization code flow with PKCE. The consent URL is sent to the chat,
//! the user approves in a browser and pastes the code (or the whole redirect
//! URL) back with `/code`. Pending flows are keyed by the state token and
//! bound to the chat that started them.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    PkceCodeVerifier, RedirectUrl, Scope, TokenUrl,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::types::error::BridgeError;
use crate::types::{ChatId, Credentials};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Read and modify (trash, labels) access; no send or permanent delete
pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";

/// Unused authorization flows are forgotten after this long
const PENDING_FLOW_TTL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth configuration error: {0}")]
    Configuration(String),

    #[error("OAuth request failed: {0}")]
    Request(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Invalid state parameter")]
    InvalidState,

    #[error("No pending OAuth flow found")]
    NoPendingFlow,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),
}

impl From<OAuthError> for BridgeError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::Configuration(msg) => BridgeError::Config(msg),
            OAuthError::Request(msg) => BridgeError::Network(msg),
            other => BridgeError::Auth(other.to_string()),
        }
    }
}

/// OAuth2 tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
}

impl OAuthTokens {
    pub fn into_credentials(self, email: Option<String>) -> Credentials {
        Credentials {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at: self.expires_at,
            email,
        }
    }
}

/// OAuth2 client registration
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    /// Optional for public clients using PKCE
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

impl ProviderConfig {
    pub fn google(client_id: &str, client_secret: Option<&str>, redirect_uri: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.map(str::to_string),
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            redirect_uri: redirect_uri.to_string(),
            scopes: vec![GMAIL_MODIFY_SCOPE.to_string()],
        }
    }
}

struct PendingOAuthFlow {
    chat_id: ChatId,
    pkce_verifier: PkceCodeVerifier,
    started_at: Instant,
}

pub struct OAuthManager {
    config: ProviderConfig,
    http: reqwest::Client,
    /// Pending flows keyed by state parameter
    pending_flows: RwLock<HashMap<String, PendingOAuthFlow>>,
}

impl OAuthManager {
    pub fn new(config: ProviderConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            pending_flows: RwLock::new(HashMap::new()),
        }
    }

    /// Start an authorization flow for a chat and return the consent URL.
    /// Any earlier pending flow of the same chat is replaced.
    pub fn start_auth_flow(&self, chat_id: ChatId) -> Result<String, OAuthError> {
        let config = &self.config;
        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let state = generate_state_token();

        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            config.client_secret.clone().map(ClientSecret::new),
            AuthUrl::new(config.auth_url.clone())
                .map_err(|e| OAuthError::Configuration(e.to_string()))?,
            Some(
                TokenUrl::new(config.token_url.clone())
                    .map_err(|e| OAuthError::Configuration(e.to_string()))?,
            ),
        )
        .set_redirect_uri(
            RedirectUrl::new(config.redirect_uri.clone())
                .map_err(|e| OAuthError::Configuration(e.to_string()))?,
        );

        let mut auth_request = client
            .authorize_url(|| CsrfToken::new(state.clone()))
            .set_pkce_challenge(pkce_challenge);
        for scope in &config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }

        // Google only hands out a refresh token with offline access + consent
        let (auth_url, _) = auth_request
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        let mut pending = self.pending_flows.write().map_err(|_| {
            OAuthError::Configuration("pending flow table poisoned".to_string())
        })?;
        pending.retain(|_, flow| {
            flow.chat_id != chat_id && flow.started_at.elapsed() < PENDING_FLOW_TTL
        });
        pending.insert(
            state,
            PendingOAuthFlow {
                chat_id,
                pkce_verifier,
                started_at: Instant::now(),
            },
        );

        info!(chat_id = %chat_id, "Started OAuth flow");
        Ok(auth_url.to_string())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// Without a state the chat's own pending flow is used. A state that
    /// belongs to another chat is rejected.
    pub async fn complete_auth_flow(
        &self,
        chat_id: ChatId,
        code: &str,
        state: Option<&str>,
    ) -> Result<OAuthTokens, OAuthError> {
        let pending = {
            let mut flows = self.pending_flows.write().map_err(|_| {
                OAuthError::Configuration("pending flow table poisoned".to_string())
            })?;

            let key = match state {
                Some(state) => {
                    let flow = flows.get(state).ok_or(OAuthError::NoPendingFlow)?;
                    if flow.chat_id != chat_id {
                        return Err(OAuthError::InvalidState);
                    }
                    state.to_string()
                }
                None => flows
                    .iter()
                    .find(|(_, flow)| flow.chat_id == chat_id)
                    .map(|(key, _)| key.clone())
                    .ok_or(OAuthError::NoPendingFlow)?,
            };

            let flow = flows.remove(&key).ok_or(OAuthError::NoPendingFlow)?;
            if flow.started_at.elapsed() >= PENDING_FLOW_TTL {
                return Err(OAuthError::NoPendingFlow);
            }
            flow
        };

        info!(chat_id = %chat_id, "Completing OAuth flow");
        self.exchange_code(code, &pending.pkce_verifier).await
    }

    pub fn has_pending_flow(&self, chat_id: ChatId) -> bool {
        self.pending_flows
            .read()
            .map(|flows| flows.values().any(|f| f.chat_id == chat_id))
            .unwrap_or(false)
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &PkceCodeVerifier,
    ) -> Result<OAuthTokens, OAuthError> {
        let config = &self.config;
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", config.redirect_uri.as_str()),
            ("client_id", config.client_id.as_str()),
            ("code_verifier", pkce_verifier.secret().as_str()),
        ];
        if let Some(secret) = &config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!("Exchanging authorization code for tokens");
        let token_response = self
            .post_token_request(&params, OAuthError::TokenExchange)
            .await?;

        Ok(OAuthTokens {
            access_token: token_response.access_token,
            refresh_token: token_response.refresh_token,
            expires_at: expires_at(token_response.expires_in),
        })
    }

    /// Refresh an access token. The old refresh token is kept when the
    /// provider does not rotate it.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<OAuthTokens, OAuthError> {
        let config = &self.config;
        let mut params = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", config.client_id.as_str()),
        ];
        if let Some(secret) = &config.client_secret {
            params.push(("client_secret", secret.as_str()));
        }

        debug!("Refreshing access token");
        let token_response = self
            .post_token_request(&params, OAuthError::RefreshFailed)
            .await?;

        Ok(OAuthTokens {
            access_token: token_response.access_token,
            refresh_token: Some(
                token_response
                    .refresh_token
                    .unwrap_or_else(|| refresh_token.to_string()),
            ),
            expires_at: expires_at(token_response.expires_in),
        })
    }

    /// POST to the token endpoint. Client errors (4xx) mean the grant was
    /// rejected; anything else is a transport problem.
    async fn post_token_request(
        &self,
        params: &[(&str, &str)],
        rejected: fn(String) -> OAuthError,
    ) -> Result<TokenResponse, OAuthError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| OAuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token request failed: {}", error_text);
            if status.is_client_error() {
                return Err(rejected(error_text));
            }
            return Err(OAuthError::Request(format!("{}: {}", status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| OAuthError::Request(format!("invalid token response: {}", e)))
    }

    /// Check if tokens need refresh (within 5 minutes of expiry)
    pub fn should_refresh(expires_at: Option<i64>) -> bool {
        match expires_at {
            Some(expires_at) => expires_at - chrono::Utc::now().timestamp() < 300,
            // No expiry info, assume we should refresh
            None => true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

fn expires_at(expires_in: Option<u64>) -> Option<i64> {
    expires_in.map(|secs| chrono::Utc::now().timestamp() + secs as i64)
}

/// Split what a user pasted after `/code` into code and optional state.
///
/// Accepts a bare code or the full redirect URL the browser ended up on.
pub fn parse_authorization_input(input: &str) -> Option<(String, Option<String>)> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(url) = url::Url::parse(input) {
        let mut code = None;
        let mut state = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "code" => code = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                _ => {}
            }
        }
        return code.map(|code| (code, state));
    }

    Some((input.to_string(), None))
}

/// Generate a cryptographically secure state token
fn generate_state_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    URL_SAFE_NO_PAD.encode(bytes)
}
