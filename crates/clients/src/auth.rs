//! Authentication providers for the HTTP transport.
//!
//! Two variants exist: [`BearerAuthProvider`] acquires OAuth tokens via the
//! client-credentials flow and caches them with a proactive refresh window,
//! and [`BasicAuthProvider`] wraps a static personal access token encoded
//! once at construction (empty username, token as password).

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Deserialize;

use tb_domain::error::{Error, Result};

/// Proactive refresh window: refresh when fewer than 5 minutes remain.
const REFRESH_WINDOW_SECS: i64 = 300;

/// Default `expires_in` when the token response omits it.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// Produces the authentication headers for each outbound request.
///
/// Implementations must be cheap to call repeatedly; the transport asks for
/// headers on every attempt so a refreshed token is picked up mid-retry.
#[async_trait::async_trait]
pub trait AuthProvider: Send + Sync {
    async fn auth_headers(&self) -> Result<Vec<(&'static str, String)>>;

    /// Drop any cached credential so the next request re-acquires it.
    fn invalidate(&self) {}
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Basic (PAT) provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Static basic-auth provider: username empty, password = token.
pub struct BasicAuthProvider {
    encoded: String,
}

impl BasicAuthProvider {
    pub fn new(token: &str) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!(":{token}"));
        Self { encoded }
    }
}

#[async_trait::async_trait]
impl AuthProvider for BasicAuthProvider {
    async fn auth_headers(&self) -> Result<Vec<(&'static str, String)>> {
        Ok(vec![("Authorization", format!("Basic {}", self.encoded))])
    }
}

// Manual Debug impl to avoid leaking the credential.
impl std::fmt::Debug for BasicAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BasicAuthProvider")
            .field("encoded", &"[REDACTED]")
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bearer (client credentials) provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A cached access token with its expiry instant.
#[derive(Clone)]
struct TokenHolder {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl TokenHolder {
    /// Whether the token is still usable at `now`, leaving the refresh window.
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(REFRESH_WINDOW_SECS) < self.expires_at
    }
}

/// Wire form of the token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth client-credentials provider with token caching.
///
/// Token regeneration is a pure function of (credentials, now): the holder
/// is replaced whenever fewer than [`REFRESH_WINDOW_SECS`] seconds remain.
pub struct BearerAuthProvider {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: Mutex<Option<TokenHolder>>,
}

impl BearerAuthProvider {
    /// Build a provider for the Microsoft identity platform.
    pub fn new(tenant_id: &str, client_id: &str, client_secret: &str, scope: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Connection(e.to_string()))?;

        Ok(Self {
            http,
            token_url: format!(
                "https://login.microsoftonline.com/{tenant_id}/oauth2/v2.0/token"
            ),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: scope.to_string(),
            cached: Mutex::new(None),
        })
    }

    /// Acquire a fresh token from the identity endpoint.
    async fn acquire(&self) -> Result<TokenHolder> {
        tracing::info!(url = %self.token_url, "acquiring access token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ];

        let resp = self
            .http
            .post(&self.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Timeout(format!("token endpoint: {e}"))
                } else {
                    Error::Connection(format!("token endpoint: {e}"))
                }
            })?;

        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(Error::Auth(format!(
                "token acquisition failed ({status}): {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Auth(format!("malformed token response: {e}")))?;

        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let holder = TokenHolder {
            access_token: token.access_token,
            expires_at: Utc::now() + Duration::seconds(expires_in as i64),
        };

        tracing::info!(expires_in, "access token acquired");
        Ok(holder)
    }
}

#[async_trait::async_trait]
impl AuthProvider for BearerAuthProvider {
    async fn auth_headers(&self) -> Result<Vec<(&'static str, String)>> {
        let now = Utc::now();

        if let Some(holder) = self.cached.lock().as_ref() {
            if holder.is_usable(now) {
                return Ok(vec![(
                    "Authorization",
                    format!("Bearer {}", holder.access_token),
                )]);
            }
        }

        let holder = self.acquire().await?;
        let header = format!("Bearer {}", holder.access_token);
        *self.cached.lock() = Some(holder);
        Ok(vec![("Authorization", header)])
    }

    fn invalidate(&self) {
        *self.cached.lock() = None;
        tracing::debug!("cached access token invalidated");
    }
}

// Manual Debug impl to avoid leaking credentials.
impl std::fmt::Debug for BearerAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerAuthProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("cached", &self.cached.lock().is_some())
            .finish()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
