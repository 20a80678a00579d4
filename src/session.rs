// Session helpers: login, OAuth callback, status probe, logout

use reqwest::Url;

use crate::auth::{Credential, LoginRequest, LoginResponse};
use crate::error::{ClientError, Result};
use crate::http_client::{AuthClient, RequestOptions};

impl AuthClient {
    /// Log in with username and password
    ///
    /// The login endpoint answers `{success, token, message}`. In cookie mode
    /// the backend also sets the refresh cookie, which the client's jar keeps.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credential> {
        let url = self.resolve(&self.login_path)?;
        tracing::info!(url = %url, username = %username, "Logging in...");

        let response = self
            .client()
            .post(url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "Login rejected");
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let data: LoginResponse = response.json().await?;
        if !data.success {
            return Err(ClientError::AuthError(
                data.message.unwrap_or_else(|| "login failed".to_string()),
            ));
        }

        let token = data
            .token
            .map(Credential::new)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ClientError::AuthError("login response has no token".to_string()))?;

        self.store().set(token.clone());
        if let Some(refresh_token) = data
            .refresh_token
            .map(Credential::new)
            .filter(|t| !t.is_empty())
        {
            self.store().set_refresh_secret(Some(refresh_token));
        }

        tracing::info!(token = %token.preview(), "Login successful");
        Ok(token)
    }

    /// URL that starts the OAuth login flow in a browser
    pub fn oauth_login_url(&self) -> Result<Url> {
        self.resolve(&self.oauth_path)
    }

    /// Store the access token carried by an OAuth callback URL
    ///
    /// The refresh secret travels separately as an HTTP-only cookie.
    pub fn complete_oauth_callback(&self, callback_url: &str) -> Result<Credential> {
        let url = Url::parse(callback_url)
            .map_err(|e| ClientError::InvalidTarget(format!("{}: {}", callback_url, e)))?;

        let token = url
            .query_pairs()
            .find(|(key, _)| key == "access_token")
            .map(|(_, value)| Credential::new(value.into_owned()))
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                tracing::warn!("OAuth callback has no access_token");
                ClientError::AuthError("callback has no access_token".to_string())
            })?;

        self.store().set(token.clone());
        tracing::info!(token = %token.preview(), "OAuth login completed");
        Ok(token)
    }

    /// Probe the profile endpoint and record whether the session is accepted
    pub async fn check_login_status(&self) -> bool {
        let logged_in = match self.request(&self.profile_path, RequestOptions::get()).await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "Login status probe failed");
                false
            }
        };

        self.store().set_logged_in(logged_in);
        logged_in
    }

    /// Force a refresh cycle, joining one that is already running
    pub async fn refresh_credential(&self) -> Result<Credential> {
        Ok(self.coordinator().refresh().await?)
    }

    /// Forget the credential and refresh secret
    pub fn logout(&self) {
        tracing::info!("Logging out");
        self.store().clear();
    }
}
