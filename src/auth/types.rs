// Authentication types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque bearer token
/// The client never looks inside; expiry is enforced by the backend
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value, for building headers and request bodies
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Short prefix that is safe to write to logs
    pub fn preview(&self) -> String {
        let prefix: String = self.0.chars().take(8).collect();
        format!("{}...", prefix)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

/// How the refresh secret reaches the token-exchange endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// HTTP-only cookie carried by the client's cookie jar (default)
    Cookie,

    /// Refresh token held in the credential store, sent in the request body
    Token,
}

/// Snapshot of the credential store
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub credential: Option<Credential>,
    pub is_logged_in: bool,

    /// Secondary secret used by token-mode refresh
    pub refresh_secret: Option<Credential>,

    /// Bumped on every credential set/clear
    pub generation: u64,

    pub updated_at: Option<DateTime<Utc>>,

    /// Only known when the backend reports `expires_in`
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token data from a successful refresh
#[derive(Debug, Clone)]
pub struct TokenData {
    pub access_token: Credential,
    pub refresh_token: Option<Credential>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token-mode refresh request body
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh endpoint response
#[derive(Deserialize)]
pub struct RefreshResponse {
    #[serde(alias = "accessToken")]
    pub access_token: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh_token: Option<String>,
    #[serde(default, alias = "expiresIn")]
    pub expires_in: Option<u64>,
}

/// Password login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Password login response
#[derive(Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
