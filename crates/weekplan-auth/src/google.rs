//! Google OAuth2 provider for Calendar access.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// Scope for read-only Calendar access
const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar.readonly";
const USERINFO_SCOPE: &str = "https://www.googleapis.com/auth/userinfo.email";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
    pub token_type: String,
    pub scope: String,
}

pub struct GoogleOAuth2Provider {
    pub client_id: String,
    pub client_secret: String,
    token_url: String,
}

impl GoogleOAuth2Provider {
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url: GOOGLE_TOKEN_URL.to_string(),
        }
    }

    #[cfg(test)]
    pub fn new_with_token_url(client_id: String, client_secret: String, token_url: String) -> Self {
        Self {
            client_id,
            client_secret,
            token_url,
        }
    }

    /// Generate authorization URL for OAuth flow.
    /// Returns (url, state) where state should be verified on callback.
    pub fn authorization_url(&self, port: u16) -> (String, String) {
        let state = uuid::Uuid::new_v4().to_string();
        let redirect_uri = format!("http://localhost:{}/callback", port);
        let scopes = format!("{} {}", CALENDAR_SCOPE, USERINFO_SCOPE);

        let url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}&access_type=offline&prompt=consent",
            GOOGLE_AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(&state),
        );

        (url, state)
    }

    /// Exchange authorization code for tokens.
    #[tracing::instrument(skip(self, code), level = "info")]
    pub async fn exchange_code(&self, code: &str, port: u16) -> Result<GoogleTokenResponse> {
        let redirect_uri = format!("http://localhost:{}/callback", port);
        let client = reqwest::Client::new();

        let response = client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
                ("redirect_uri", &redirect_uri),
            ])
            .send()
            .await
            .context("Failed to send token request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Token exchange failed: {}", error_text);
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .context("Failed to parse token response")
    }

    /// Refresh an expired access token.
    #[tracing::instrument(skip(self, refresh_token), level = "info")]
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<GoogleTokenResponse> {
        let client = reqwest::Client::new();

        let response = client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .context("Failed to send refresh request")?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Token refresh failed: {}", error_text);
        }

        response
            .json::<GoogleTokenResponse>()
            .await
            .context("Failed to parse refresh response")
    }
}
