// Token refresh network call

use chrono::{Duration, Utc};
use reqwest::{Client, Url};

use super::types::{Credential, RefreshMode, RefreshRequest, RefreshResponse, TokenData};
use crate::error::RefreshError;

/// Exchange the refresh secret for a new access credential
///
/// Issues exactly one `POST` to the token-exchange endpoint. In cookie mode
/// the secret travels in the client's cookie jar; in token mode it is sent as
/// `{"refresh_token": ...}`.
pub async fn exchange(
    client: &Client,
    endpoint: &Url,
    mode: RefreshMode,
    secret: Option<&Credential>,
) -> Result<TokenData, RefreshError> {
    tracing::info!(endpoint = %endpoint, mode = ?mode, "Refreshing access token...");

    let builder = client.post(endpoint.clone());
    let builder = match mode {
        RefreshMode::Cookie => builder.header("Content-Type", "application/json"),
        RefreshMode::Token => {
            let secret = secret.ok_or(RefreshError::MissingSecret)?;
            builder.json(&RefreshRequest {
                refresh_token: secret.expose(),
            })
        }
    };

    let response = builder
        .send()
        .await
        .map_err(|e| RefreshError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), body = %body, "Token refresh rejected");
        return Err(RefreshError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let data: RefreshResponse = response
        .json()
        .await
        .map_err(|e| RefreshError::Malformed(e.to_string()))?;

    if data.access_token.is_empty() {
        return Err(RefreshError::Malformed(
            "response does not contain access_token".to_string(),
        ));
    }

    // Shave a minute off the reported lifetime
    let expires_at = data
        .expires_in
        .map(|secs| Utc::now() + Duration::seconds(secs.saturating_sub(60) as i64));

    let token = TokenData {
        access_token: Credential::new(data.access_token),
        refresh_token: data
            .refresh_token
            .filter(|t| !t.is_empty())
            .map(Credential::new),
        expires_at,
    };

    tracing::info!(
        token = %token.access_token.preview(),
        rotated_refresh_token = token.refresh_token.is_some(),
        "Access token refreshed"
    );

    Ok(token)
}
