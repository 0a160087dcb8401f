// Token endpoint exchanges

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

use super::types::{OAuthErrorBody, TokenGrant};

/// Google OAuth token endpoint
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Failure of a token endpoint exchange
#[derive(Error, Debug)]
pub enum GrantError {
    /// Provider answered with an OAuth error (e.g. `invalid_grant`)
    #[error("{status} {error}{}", .description.as_ref().map(|d| format!(": {}", d)).unwrap_or_default())]
    Rejected {
        status: u16,
        error: String,
        description: Option<String>,
    },

    /// Network failure or HTTP error without an OAuth body
    #[error("request failed: {0}")]
    Transport(String),

    /// Response could not be understood
    #[error("malformed response: {0}")]
    Malformed(String),

    /// Exchange exceeded its time bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl GrantError {
    /// True when the refresh token itself is no longer accepted
    pub fn is_invalid_grant(&self) -> bool {
        matches!(self, GrantError::Rejected { error, .. } if error == "invalid_grant")
    }
}

/// Remote authorization endpoint
pub trait TokenEndpoint: Send + Sync {
    /// Exchange a refresh token for a new access token
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, GrantError>>;

    /// Exchange a one-time authorization code for the first token grant
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<TokenGrant, GrantError>>;
}

/// Google OAuth 2.0 token endpoint client
pub struct GoogleTokenEndpoint {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl GoogleTokenEndpoint {
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: String,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create token endpoint HTTP client")?;

        Ok(Self {
            client,
            token_url,
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    async fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenGrant, GrantError> {
        let grant_type = form
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("unknown");

        let client_prefix: String = self.client_id.chars().take(8).collect();
        tracing::debug!(
            url = %self.token_url,
            grant_type = grant_type,
            client_id = %client_prefix,
            "Sending token endpoint request"
        );

        let response = self
            .client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| GrantError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                "Token endpoint request failed: status={}, body={}",
                status,
                error_text
            );

            return Err(match serde_json::from_str::<OAuthErrorBody>(&error_text) {
                Ok(body) => GrantError::Rejected {
                    status: status.as_u16(),
                    error: body.error,
                    description: body.error_description,
                },
                Err(_) => GrantError::Transport(format!("{} - {}", status, error_text)),
            });
        }

        let grant: TokenGrant = response
            .json()
            .await
            .map_err(|e| GrantError::Malformed(e.to_string()))?;

        if grant.access_token.is_empty() {
            return Err(GrantError::Malformed(
                "response does not contain access_token".to_string(),
            ));
        }

        tracing::info!(
            grant_type = grant_type,
            expires_in = grant.expires_in,
            "Token endpoint issued a new access token"
        );

        Ok(grant)
    }
}

impl TokenEndpoint for GoogleTokenEndpoint {
    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, GrantError>> {
        Box::pin(async move {
            let form = [
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ];
            self.post_form(&form).await
        })
    }

    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
        redirect_uri: &'a str,
    ) -> BoxFuture<'a, Result<TokenGrant, GrantError>> {
        Box::pin(async move {
            let form = [
                ("grant_type", "authorization_code"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ];
            self.post_form(&form).await
        })
    }
}
