//! Service-account session for the Sheets API.
//!
//! A signed JWT assertion is exchanged at the OAuth token endpoint for a
//! bearer token. The token is cached until shortly before it expires and can
//! be dropped explicitly when the API rejects it.

use crate::error::LedgerError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::debug;

/// OAuth scope for reading and writing spreadsheets.
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Service-account credential pair.
#[derive(Clone)]
pub struct ServiceAccount {
    client_email: String,
    private_key: String,
}

impl ServiceAccount {
    /// Literal `\n` escapes in `private_key` become newlines.
    pub fn new(client_email: &str, private_key: &str) -> Self {
        Self {
            client_email: client_email.to_string(),
            private_key: private_key.replace("\\n", "\n"),
        }
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct AccessToken {
    value: String,
    refresh_at: Instant,
}

/// Lazily acquired bearer token for one service account.
pub struct SheetsSession {
    http: Client,
    account: ServiceAccount,
    token_uri: String,
    token: Mutex<Option<AccessToken>>,
}

impl SheetsSession {
    pub fn new(http: Client, account: ServiceAccount, token_uri: impl Into<String>) -> Self {
        Self {
            http,
            account,
            token_uri: token_uri.into(),
            token: Mutex::new(None),
        }
    }

    /// Returns a valid bearer token, fetching a new one if needed.
    pub async fn bearer(&self) -> Result<String, LedgerError> {
        let mut token = self.token.lock().await;

        if let Some(current) = token.as_ref() {
            if Instant::now() < current.refresh_at {
                return Ok(current.value.clone());
            }
        }

        let fresh = self.fetch().await?;
        let value = fresh.value.clone();
        *token = Some(fresh);
        Ok(value)
    }

    /// Drops the cached token so the next call authenticates again.
    pub async fn invalidate(&self) {
        self.token.lock().await.take();
    }

    fn assertion(&self) -> Result<String, LedgerError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let claims = Claims {
            iss: &self.account.client_email,
            scope: SHEETS_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let key = EncodingKey::from_rsa_pem(self.account.private_key.as_bytes())
            .map_err(LedgerError::Key)?;

        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(LedgerError::Sign)
    }

    async fn fetch(&self) -> Result<AccessToken, LedgerError> {
        let assertion = self.assertion()?;

        let response = self
            .http
            .post(self.token_uri.as_str())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Auth { status, body });
        }

        let token: TokenResponse = response.json().await?;
        debug!(
            client_email = %self.account.client_email,
            expires_in = token.expires_in,
            "acquired sheets access token"
        );

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(AccessToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}
