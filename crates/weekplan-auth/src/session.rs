//! In-memory session state for authenticated calendar sources.
//!
//! Tokens live for the process lifetime only; the sync engine owns no
//! persisted state, so a restart requires signing in again.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::google::GoogleTokenResponse;

/// Token set for OAuth2 authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// Access token for API requests
    pub access_token: String,

    /// Optional refresh token for token renewal
    pub refresh_token: Option<String>,

    /// Token expiration timestamp (Unix timestamp)
    pub expires_at: i64,

    /// Scopes granted to this token
    pub scopes: Vec<String>,
}

impl TokenSet {
    /// Build a token set from a token endpoint response.
    pub fn from_response(response: &GoogleTokenResponse) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            access_token: response.access_token.clone(),
            refresh_token: response.refresh_token.clone(),
            expires_at: now + response.expires_in as i64,
            scopes: response
                .scope
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Check if the token needs refresh (within 5 minutes of expiry)
    pub fn needs_refresh(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at - 300 // 5 minute buffer
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        let now = chrono::Utc::now().timestamp();
        now >= self.expires_at
    }
}

/// Shared, in-memory store for the current OAuth session.
#[derive(Default)]
pub struct SessionStore {
    inner: RwLock<Option<TokenSet>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current session.
    pub fn set(&self, tokens: TokenSet) {
        tracing::info!("Session established (expires at {})", tokens.expires_at);
        *self.inner.write() = Some(tokens);
    }

    /// Drop the current session (sign-out).
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    /// Whether a non-expired session exists.
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .map(|t| !t.is_expired())
            .unwrap_or(false)
    }

    /// Current access token, or None when signed out or expired.
    pub fn access_token(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .filter(|t| !t.is_expired())
            .map(|t| t.access_token.clone())
    }

    /// Current refresh token, if the provider issued one.
    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .as_ref()
            .and_then(|t| t.refresh_token.clone())
    }
}
