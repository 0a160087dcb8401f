// Out-of-band authorization
// Produces the first token grant when no persisted record exists

use dialoguer::Input;
use futures::future::BoxFuture;
use reqwest::Url;

use crate::error::AuthError;

use super::refresh::TokenEndpoint;
use super::types::TokenGrant;

/// Google OAuth consent endpoint
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

/// Loopback redirect; the user copies the code from the address bar
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost";

/// Scopes needed by the Drive and Sheets tools
pub const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/drive.readonly",
    "https://www.googleapis.com/auth/spreadsheets",
];

/// Source of a first credential when the store is empty
///
/// The returned grant must carry a refresh token.
pub trait Authorizer: Send + Sync {
    fn authorize<'a>(
        &'a self,
        endpoint: &'a dyn TokenEndpoint,
    ) -> BoxFuture<'a, Result<TokenGrant, AuthError>>;
}

/// Seeds credentials from a configured refresh token
pub struct RefreshTokenAuthorizer {
    refresh_token: String,
}

impl RefreshTokenAuthorizer {
    pub fn new(refresh_token: String) -> Self {
        Self { refresh_token }
    }
}

impl Authorizer for RefreshTokenAuthorizer {
    fn authorize<'a>(
        &'a self,
        endpoint: &'a dyn TokenEndpoint,
    ) -> BoxFuture<'a, Result<TokenGrant, AuthError>> {
        Box::pin(async move {
            tracing::info!("Bootstrapping credentials from configured refresh token");
            let mut grant = endpoint
                .refresh(&self.refresh_token)
                .await
                .map_err(|e| AuthError::NoCredentials(format!("bootstrap refresh token rejected: {}", e)))?;

            if grant.refresh_token.as_deref().map_or(true, str::is_empty) {
                grant.refresh_token = Some(self.refresh_token.clone());
            }
            Ok(grant)
        })
    }
}

/// Console flow: print the consent URL, read back the authorization code
pub struct InteractiveAuthorizer {
    auth_url: String,
    client_id: String,
    redirect_uri: String,
}

impl InteractiveAuthorizer {
    pub fn new(auth_url: String, client_id: String, redirect_uri: String) -> Self {
        Self {
            auth_url,
            client_id,
            redirect_uri,
        }
    }

    /// Consent URL requesting offline access
    pub fn authorization_url(&self) -> Result<Url, AuthError> {
        let scope = SCOPES.join(" ");
        Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", scope.as_str()),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| AuthError::NoCredentials(format!("invalid authorization URL: {}", e)))
    }

    fn prompt_for_code(&self) -> Result<String, AuthError> {
        let url = self.authorization_url()?;

        eprintln!();
        eprintln!("Open this URL in a browser and grant access:");
        eprintln!();
        eprintln!("  {}", url);
        eprintln!();
        eprintln!("After approving, copy the `code` parameter (or the whole URL) from the address bar.");
        eprintln!();

        let input: String = Input::new()
            .with_prompt("Authorization code")
            .interact_text()
            .map_err(|e| AuthError::NoCredentials(format!("failed to read authorization code: {}", e)))?;

        extract_code(&input)
            .ok_or_else(|| AuthError::NoCredentials("no authorization code entered".to_string()))
    }
}

impl Authorizer for InteractiveAuthorizer {
    fn authorize<'a>(
        &'a self,
        endpoint: &'a dyn TokenEndpoint,
    ) -> BoxFuture<'a, Result<TokenGrant, AuthError>> {
        Box::pin(async move {
            let code = tokio::task::block_in_place(|| self.prompt_for_code())?;

            let grant = endpoint
                .exchange_code(&code, &self.redirect_uri)
                .await
                .map_err(|e| AuthError::NoCredentials(format!("authorization code exchange failed: {}", e)))?;

            if grant.refresh_token.as_deref().map_or(true, str::is_empty) {
                return Err(AuthError::NoCredentials(
                    "provider did not issue a refresh token; revoke the app's access and retry"
                        .to_string(),
                ));
            }
            Ok(grant)
        })
    }
}

/// Accept either a bare code or a redirected URL carrying `?code=`
fn extract_code(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(url) = Url::parse(input) {
        return url
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());
    }

    Some(input.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh::GrantError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticEndpoint {
        refresh_token: Option<String>,
        calls: AtomicUsize,
    }

    impl TokenEndpoint for StaticEndpoint {
        fn refresh<'a>(&'a self, _refresh_token: &'a str) -> BoxFuture<'a, Result<TokenGrant, GrantError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let grant = TokenGrant {
                access_token: "fresh".to_string(),
                refresh_token: self.refresh_token.clone(),
                expires_in: 3600,
                token_type: "Bearer".to_string(),
            };
            Box::pin(async move { Ok(grant) })
        }

        fn exchange_code<'a>(
            &'a self,
            _code: &'a str,
            _redirect_uri: &'a str,
        ) -> BoxFuture<'a, Result<TokenGrant, GrantError>> {
            Box::pin(async { Err(GrantError::Malformed("unused".to_string())) })
        }
    }

    #[test]
    fn test_extract_code() {
        assert_eq!(extract_code("  4/0Abc  "), Some("4/0Abc".to_string()));
        assert_eq!(
            extract_code("http://localhost/?code=4%2F0Abc&scope=x"),
            Some("4/0Abc".to_string())
        );
        assert_eq!(extract_code("http://localhost/?error=access_denied"), None);
        assert_eq!(extract_code("   "), None);
    }

    #[test]
    fn test_authorization_url() {
        let authorizer = InteractiveAuthorizer::new(
            GOOGLE_AUTH_URL.to_string(),
            "my-client".to_string(),
            DEFAULT_REDIRECT_URI.to_string(),
        );
        let url = authorizer.authorization_url().unwrap();
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();

        assert_eq!(pairs["client_id"], "my-client");
        assert_eq!(pairs["access_type"], "offline");
        assert_eq!(pairs["response_type"], "code");
        assert!(pairs["scope"].contains("spreadsheets"));
    }

    #[tokio::test]
    async fn test_refresh_token_bootstrap_keeps_seed() {
        let endpoint = StaticEndpoint {
            refresh_token: None,
            calls: AtomicUsize::new(0),
        };
        let grant = RefreshTokenAuthorizer::new("seed".to_string())
            .authorize(&endpoint)
            .await
            .unwrap();

        assert_eq!(grant.refresh_token.as_deref(), Some("seed"));
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_token_bootstrap_takes_rotated_token() {
        let endpoint = StaticEndpoint {
            refresh_token: Some("rotated".to_string()),
            calls: AtomicUsize::new(0),
        };
        let grant = RefreshTokenAuthorizer::new("seed".to_string())
            .authorize(&endpoint)
            .await
            .unwrap();

        assert_eq!(grant.refresh_token.as_deref(), Some("rotated"));
    }
}
