//! Google OAuth 2.0 token management for the Gmail API.
//!
//! Credentials come from an authorized-user token file (`token.json`) with the
//! client id/secret optionally taken from the OAuth client secrets file.
//! Refreshed access tokens are written back to the token file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const EXPIRY_BUFFER_SECS: i64 = 60;

/// Google OAuth credentials and token management.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    inner: Arc<RwLock<GoogleAuthInner>>,
    http: reqwest::blocking::Client,
}

#[derive(Debug)]
struct GoogleAuthInner {
    client_id: Option<String>,
    client_secret: Option<String>,
    refresh_token: Option<String>,
    token_uri: String,
    scopes: Vec<String>,
    access_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
    token_path: Option<PathBuf>,
}

/// Configuration for Google OAuth.
#[derive(Debug, Clone, Default)]
pub struct GoogleAuthConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Token endpoint; defaults to Google's.
    pub token_uri: Option<String>,
    pub scopes: Vec<String>,
    /// Cached access token and its expiry, if any.
    pub access_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
    /// Where refreshed tokens are persisted.
    pub token_path: Option<PathBuf>,
    pub timeout: Option<Duration>,
}

impl GoogleAuthConfig {
    /// Load from a token file, filling client id/secret from the credentials file.
    pub fn from_files(token_path: &Path, credentials_path: &Path) -> Result<Self, GoogleAuthError> {
        let raw = fs::read_to_string(token_path).map_err(|err| {
            GoogleAuthError::MissingCredentials(format!(
                "cannot read token file {}: {}",
                token_path.display(),
                err
            ))
        })?;
        let token: AuthorizedUserToken =
            serde_json::from_str(&raw).map_err(|e| GoogleAuthError::JsonError(e.to_string()))?;

        let client = match (&token.client_id, &token.client_secret) {
            (Some(_), Some(_)) => None,
            _ => Some(load_client_secrets(credentials_path)?),
        };

        let expiry = token.expiry.as_deref().and_then(parse_expiry);
        let (client_id, client_secret, client_token_uri) = match client {
            Some(client) => (
                token.client_id.or(Some(client.client_id)),
                token.client_secret.or(Some(client.client_secret)),
                client.token_uri,
            ),
            None => (token.client_id, token.client_secret, None),
        };

        Ok(Self {
            client_id,
            client_secret,
            refresh_token: token.refresh_token,
            token_uri: token.token_uri.or(client_token_uri),
            scopes: token.scopes,
            access_token: token.token,
            expiry,
            token_path: Some(token_path.to_path_buf()),
            timeout: None,
        })
    }

    /// Check if the configuration is valid (has required credentials).
    pub fn is_valid(&self) -> bool {
        self.access_token.is_some()
            || (self.client_id.is_some()
                && self.client_secret.is_some()
                && self.refresh_token.is_some())
    }
}

/// Error types for Google authentication.
#[derive(Debug, thiserror::Error)]
pub enum GoogleAuthError {
    #[error("missing credentials: {0}")]
    MissingCredentials(String),
    #[error("token refresh failed: {0}")]
    TokenRefreshFailed(String),
    #[error("http error: {0}")]
    HttpError(String),
    #[error("json error: {0}")]
    JsonError(String),
}

impl GoogleAuth {
    pub fn new(config: GoogleAuthConfig) -> Result<Self, GoogleAuthError> {
        if !config.is_valid() {
            return Err(GoogleAuthError::MissingCredentials(
                "token file must hold an access token or (client_id + client_secret + refresh_token)"
                    .to_string(),
            ));
        }

        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| GoogleAuthError::HttpError(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(RwLock::new(GoogleAuthInner {
                client_id: config.client_id,
                client_secret: config.client_secret,
                refresh_token: config.refresh_token,
                token_uri: config
                    .token_uri
                    .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                scopes: config.scopes,
                access_token: config.access_token,
                token_expires_at: config.expiry,
                token_path: config.token_path,
            })),
            http,
        })
    }

    /// Get a valid access token, refreshing if necessary.
    pub fn get_access_token(&self) -> Result<String, GoogleAuthError> {
        {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(token) = &inner.access_token {
                // No expiry recorded means the token is used until the API rejects it.
                let fresh = match inner.token_expires_at {
                    Some(expires_at) => {
                        expires_at > Utc::now() + chrono::Duration::seconds(EXPIRY_BUFFER_SECS)
                    }
                    None => inner.refresh_token.is_none(),
                };
                if fresh {
                    return Ok(token.clone());
                }
            }
        }

        self.refresh_access_token()
    }

    /// Force refresh the access token.
    pub fn refresh_access_token(&self) -> Result<String, GoogleAuthError> {
        let (client_id, client_secret, refresh_token, token_uri) = {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            match (&inner.client_id, &inner.client_secret, &inner.refresh_token) {
                (Some(client_id), Some(client_secret), Some(refresh_token)) => (
                    client_id.clone(),
                    client_secret.clone(),
                    refresh_token.clone(),
                    inner.token_uri.clone(),
                ),
                _ => {
                    return Err(GoogleAuthError::MissingCredentials(
                        "access token expired and no refresh credentials are available"
                            .to_string(),
                    ))
                }
            }
        };

        self.refresh_via_oauth(&token_uri, &client_id, &client_secret, &refresh_token)
    }

    fn refresh_via_oauth(
        &self,
        token_uri: &str,
        client_id: &str,
        client_secret: &str,
        refresh_token: &str,
    ) -> Result<String, GoogleAuthError> {
        debug!("Refreshing Google OAuth token");

        let response = self
            .http
            .post(token_uri)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .map_err(|e| GoogleAuthError::HttpError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            error!("OAuth token refresh failed: {} - {}", status, body);
            return Err(GoogleAuthError::TokenRefreshFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .map_err(|e| GoogleAuthError::JsonError(e.to_string()))?;

        let expires_at = Utc::now() + chrono::Duration::seconds(token_response.expires_in);
        let access_token = token_response.access_token.clone();

        {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.access_token = Some(token_response.access_token);
            inner.token_expires_at = Some(expires_at);
            if let Some(rotated) = token_response.refresh_token {
                inner.refresh_token = Some(rotated);
            }
            if let Some(path) = inner.token_path.clone() {
                if let Err(err) = persist_token(&path, &inner) {
                    warn!("failed to persist refreshed token to {}: {}", path.display(), err);
                }
            }
        }

        debug!("Google OAuth token refreshed successfully");
        Ok(access_token)
    }
}

/// On-disk layout of an authorized-user token file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AuthorizedUserToken {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expiry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Debug, Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn load_client_secrets(path: &Path) -> Result<ClientSecrets, GoogleAuthError> {
    let raw = fs::read_to_string(path).map_err(|err| {
        GoogleAuthError::MissingCredentials(format!(
            "cannot read credentials file {}: {}",
            path.display(),
            err
        ))
    })?;
    let file: ClientSecretsFile =
        serde_json::from_str(&raw).map_err(|e| GoogleAuthError::JsonError(e.to_string()))?;
    file.installed.or(file.web).ok_or_else(|| {
        GoogleAuthError::MissingCredentials(format!(
            "{} has neither an `installed` nor a `web` client",
            path.display()
        ))
    })
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|value| value.and_utc())
        })
        .ok()
}

fn persist_token(path: &Path, inner: &GoogleAuthInner) -> Result<(), std::io::Error> {
    let token = AuthorizedUserToken {
        token: inner.access_token.clone(),
        refresh_token: inner.refresh_token.clone(),
        token_uri: Some(inner.token_uri.clone()),
        client_id: inner.client_id.clone(),
        client_secret: inner.client_secret.clone(),
        scopes: inner.scopes.clone(),
        expiry: inner
            .token_expires_at
            .map(|value| value.to_rfc3339_opts(SecondsFormat::Micros, true)),
    };
    let payload = serde_json::to_vec_pretty(&token)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)
}
