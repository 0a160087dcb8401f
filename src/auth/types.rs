// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Current on-disk record format
pub const RECORD_VERSION: u32 = 1;

/// Token lifetime assumed when the provider omits `expires_in`
pub const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Lifecycle state of the process-wide credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No bundle loaded yet
    Uninitialized,

    /// Out-of-band authorization in progress
    Authorizing,

    /// Bundle present and outside the safety margin
    Valid,

    /// Refresh exchange in flight
    Refreshing,

    /// Last refresh was rejected or timed out
    Failed,
}

/// Access token, refresh token and expiry that together authorize remote calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl CredentialBundle {
    /// Build the first bundle from an authorization grant
    pub fn from_grant(grant: TokenGrant, refresh_token: String, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: grant.expires_at(now),
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.unwrap_or(refresh_token),
            token_type: grant.token_type,
        }
    }

    /// Bundle that only carries a refresh token; always due for refresh
    pub fn from_refresh_token(refresh_token: String) -> Self {
        Self {
            access_token: String::new(),
            refresh_token,
            expires_at: DateTime::<Utc>::UNIX_EPOCH,
            token_type: "Bearer".to_string(),
        }
    }

    /// Replace the access token and expiry, keeping the refresh token unless
    /// the provider rotated it
    pub fn refreshed(&self, grant: TokenGrant, now: DateTime<Utc>) -> Self {
        Self {
            expires_at: grant.expires_at(now),
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| self.refresh_token.clone()),
            token_type: grant.token_type,
        }
    }

    /// True when the access token is usable for longer than `margin`
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        !self.access_token.is_empty() && self.expires_at > now + margin
    }

    /// True when the access token is past its expiry
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.access_token.is_empty() || self.expires_at <= now
    }

    pub fn credential(&self) -> Credential {
        Credential {
            access_token: self.access_token.clone(),
            token_type: self.token_type.clone(),
            expires_at: self.expires_at,
        }
    }
}

/// Authorization handle handed to API callers
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Value for the `Authorization` header
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Short token prefix that is safe to log
    pub fn redacted(&self) -> String {
        let prefix: String = self.access_token.chars().take(8).collect();
        format!("{}...", prefix)
    }
}

/// At-rest form of a credential bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCredentialRecord {
    pub version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub credentials: CredentialBundle,
    pub saved_at: DateTime<Utc>,
}

impl PersistedCredentialRecord {
    pub fn new(client_id: Option<String>, credentials: CredentialBundle, now: DateTime<Utc>) -> Self {
        Self {
            version: RECORD_VERSION,
            client_id,
            credentials,
            saved_at: now,
        }
    }

    /// Shape check applied on load; a record that fails it is treated as corrupt
    pub fn validate(&self) -> Result<(), String> {
        if self.version != RECORD_VERSION {
            return Err(format!("unsupported record version {}", self.version));
        }
        if self.credentials.refresh_token.trim().is_empty() {
            return Err("record has an empty refresh_token".to_string());
        }
        if self.credentials.token_type.trim().is_empty() {
            return Err("record has an empty token_type".to_string());
        }
        Ok(())
    }
}

/// Successful response of the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: u64,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

impl TokenGrant {
    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + Duration::seconds(self.expires_in.min(i64::MAX as u64) as i64)
    }
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth error body (`{"error": "invalid_grant", "error_description": ...}`)
#[derive(Debug, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}
