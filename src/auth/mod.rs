pub mod flow;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{self, AuthConfig};

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("cannot read client secrets {}: {source}", .path.display())]
    Secrets { path: PathBuf, source: io::Error },
    #[error("invalid client secrets: {0}")]
    InvalidSecrets(String),
    #[error("cannot listen for the OAuth callback on port {port}: {source}")]
    Bind { port: u16, source: io::Error },
    #[error("OAuth callback failed: {0}")]
    Callback(#[from] io::Error),
    #[error("authorization was denied: {0}")]
    Denied(String),
    #[error("OAuth callback carried an unexpected state parameter")]
    StateMismatch,
    #[error("invalid authorization URI: {0}")]
    InvalidUri(String),
    #[error("token request failed: {0}")]
    Token(String),
    #[error("cannot write token cache {}: {source}", .path.display())]
    TokenCache { path: PathBuf, source: io::Error },
}

fn default_auth_uri() -> String {
    config::DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    config::DEFAULT_TOKEN_URI.to_string()
}

/// OAuth client credentials from a Google `client_secrets.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationSecret {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ApplicationSecret>,
    web: Option<ApplicationSecret>,
}

/// Parse the contents of a client secrets file (`installed` or `web` section).
pub fn parse_application_secret(json: &str) -> Result<ApplicationSecret, AuthError> {
    let file: ClientSecretsFile =
        serde_json::from_str(json).map_err(|e| AuthError::InvalidSecrets(e.to_string()))?;
    file.installed
        .or(file.web)
        .ok_or_else(|| AuthError::InvalidSecrets("no \"installed\" or \"web\" section".into()))
}

pub fn read_application_secret(path: &Path) -> Result<ApplicationSecret, AuthError> {
    let json = fs::read_to_string(path).map_err(|source| AuthError::Secrets {
        path: path.to_path_buf(),
        source,
    })?;
    parse_application_secret(&json)
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Access token plus what is needed to renew it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

impl StoredToken {
    /// Whether the token is still usable at `now`, leaving a safety margin.
    /// A token without a known expiry is treated as stale.
    pub fn is_fresh(&self, now: u64) -> bool {
        self.expires_at
            .is_some_and(|at| now + config::TOKEN_EXPIRY_SKEW_SECS < at)
    }
}

/// Read a cached token. A missing or unreadable cache yields `None`.
pub fn load_token(path: &Path) -> Option<StoredToken> {
    let json = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&json) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("ignoring corrupt token cache {}: {e}", path.display());
            None
        }
    }
}

pub fn save_token(path: &Path, token: &StoredToken) -> Result<(), AuthError> {
    let write = || -> io::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_vec_pretty(token)?)
    };
    write().map_err(|source| AuthError::TokenCache {
        path: path.to_path_buf(),
        source,
    })
}

/// Obtain an access token for `scopes`.
///
/// With a token cache configured, a fresh cached token is reused and a stale
/// one is refreshed; the consent flow runs only when neither works.
pub fn authenticate(cfg: &AuthConfig, scopes: &[&str]) -> Result<StoredToken, AuthError> {
    let secret = read_application_secret(&cfg.client_secrets)?;

    if let Some(cache) = &cfg.token_cache {
        if let Some(token) = load_token(cache) {
            if token.is_fresh(unix_now()) {
                info!("using cached access token from {}", cache.display());
                return Ok(token);
            }
            if let Some(refresh_token) = &token.refresh_token {
                match flow::refresh(&secret, refresh_token) {
                    Ok(token) => {
                        info!("access token refreshed");
                        save_token(cache, &token)?;
                        return Ok(token);
                    }
                    Err(e) => warn!("token refresh failed, running the consent flow: {e}"),
                }
            }
        }
    }

    let token = flow::run_installed_flow(&secret, scopes, cfg)?;
    if let Some(cache) = &cfg.token_cache {
        save_token(cache, &token)?;
    }
    Ok(token)
}
