use chrono::{DateTime, Duration, Utc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::AuthError;

use super::authorize::Authorizer;
use super::clock::{Clock, SystemClock};
use super::refresh::{GrantError, TokenEndpoint};
use super::scheduler::RefreshSchedule;
use super::store::CredentialStore;
use super::types::{
    AuthState, Credential, CredentialBundle, PersistedCredentialRecord, TokenGrant,
};

/// Shortest delay between two scheduler wake-ups
const MIN_REFRESH_DELAY: std::time::Duration = std::time::Duration::from_secs(1);

/// Refresh timing knobs
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Lead time before expiry at which a token is due for refresh
    pub margin: Duration,

    /// Upper bound on one refresh exchange
    pub timeout: std::time::Duration,

    /// Delay before the scheduler retries a failed proactive refresh
    pub retry_interval: std::time::Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            margin: Duration::minutes(5),
            timeout: std::time::Duration::from_secs(30),
            retry_interval: std::time::Duration::from_secs(60),
        }
    }
}

struct Inner {
    bundle: Option<CredentialBundle>,
    state: AuthState,
    /// Store has been read at least once
    loaded: bool,
    /// In-memory bundle is newer than the persisted record
    unsaved: bool,
}

/// Authentication manager
/// Owns the credential state machine: loads, authorizes, refreshes and
/// persists the single process-wide credential
pub struct AuthManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    authorizer: Option<Arc<dyn Authorizer>>,
    clock: Arc<dyn Clock>,
    settings: RefreshSettings,
    client_id: Option<String>,

    inner: RwLock<Inner>,

    /// Serializes every refresh and authorization attempt
    refresh_lock: Mutex<()>,

    /// Background refresh task, if installed
    schedule: std::sync::Mutex<Option<RefreshSchedule>>,
}

impl AuthManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        settings: RefreshSettings,
    ) -> Self {
        Self {
            store,
            endpoint,
            authorizer: None,
            clock: Arc::new(SystemClock),
            settings,
            client_id: None,
            inner: RwLock::new(Inner {
                bundle: None,
                state: AuthState::Uninitialized,
                loaded: false,
                unsaved: false,
            }),
            refresh_lock: Mutex::new(()),
            schedule: std::sync::Mutex::new(None),
        }
    }

    /// Flow used when the store holds no record
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = Some(authorizer);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Client identity recorded next to persisted credentials
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Get a credential whose access token is outside the safety margin,
    /// refreshing or authorizing if necessary
    ///
    /// Concurrent callers share one refresh exchange.
    pub async fn get_valid_credentials(&self) -> Result<Credential, AuthError> {
        {
            let inner = self.inner.read().await;
            if inner.loaded && !inner.unsaved {
                if let Some(bundle) = inner.bundle.as_ref() {
                    if bundle.is_fresh(self.clock.now(), self.settings.margin) {
                        return Ok(bundle.credential());
                    }
                }
            }
        }

        let _guard = self.refresh_lock.lock().await;
        self.resolve_locked().await.map(|bundle| bundle.credential())
    }

    /// Startup gate for the server: a usable credential or an error explaining how to get one
    pub async fn check_startup_credentials(
        &self,
        credentials_path: &Path,
    ) -> anyhow::Result<Credential> {
        match self.get_valid_credentials().await {
            Ok(credential) => {
                tracing::info!(
                    "✅ Authentication successful (token: {}, expires: {})",
                    credential.redacted(),
                    credential.expires_at
                );
                Ok(credential)
            }
            Err(e) => {
                tracing::error!("❌ Authentication failed: {}", e);
                tracing::error!("");
                tracing::error!("🔧 Troubleshooting steps:");
                tracing::error!("   1. Run `gdrive-mcp auth` to authorize this client");
                tracing::error!("   2. Or set GDRIVE_REFRESH_TOKEN to an existing refresh token");
                tracing::error!(
                    "   3. Check the credential file at {}",
                    credentials_path.display()
                );
                Err(anyhow::Error::new(e).context("Startup failed: no usable Google credentials"))
            }
        }
    }

    /// Read the persisted record without authorizing or refreshing
    pub fn load_credentials_quietly(&self) -> Option<CredentialBundle> {
        self.store.load().map(|record| record.credentials)
    }

    /// Mark `rejected` as unusable after the remote API refused it, so the
    /// next `get_valid_credentials` refreshes
    pub async fn invalidate(&self, rejected: &Credential) {
        let now = self.clock.now();
        let mut inner = self.inner.write().await;
        if let Some(bundle) = inner.bundle.as_mut() {
            if bundle.access_token == rejected.access_token && bundle.expires_at > now {
                tracing::warn!("Access token rejected by remote API, forcing refresh");
                bundle.expires_at = now;
            }
        }
    }

    /// Current lifecycle state
    pub async fn state(&self) -> AuthState {
        self.inner.read().await.state
    }

    /// Install the background refresh task; no-op if already installed
    pub fn setup_token_refresh(self: &Arc<Self>) {
        let mut slot = self
            .schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if slot.is_some() {
            tracing::debug!("Token refresh scheduler already running");
            return;
        }

        *slot = Some(RefreshSchedule::spawn(Arc::downgrade(self)));
        tracing::info!("Token refresh scheduler started");
    }

    /// When the scheduler will next try a refresh
    pub fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        self.schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .and_then(RefreshSchedule::next_refresh_at)
    }

    /// Cancel the background refresh task and wait for it to stop
    pub async fn shutdown(&self) {
        let schedule = self
            .schedule
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if let Some(mut schedule) = schedule {
            schedule.cancel().await;
            tracing::info!("Token refresh scheduler stopped");
        }
    }

    /// Scheduler entry point: refresh if due, return the resulting expiry
    pub(super) async fn refresh_proactively(&self) -> Result<DateTime<Utc>, AuthError> {
        let _guard = self.refresh_lock.lock().await;
        self.resolve_locked().await.map(|bundle| bundle.expires_at)
    }

    /// Time until the current bundle enters the safety margin
    pub(super) async fn next_refresh_delay(&self) -> std::time::Duration {
        let inner = self.inner.read().await;
        match inner.bundle.as_ref() {
            None => self.settings.retry_interval,
            Some(bundle) => (bundle.expires_at - self.settings.margin - self.clock.now())
                .to_std()
                .unwrap_or(std::time::Duration::ZERO)
                .max(MIN_REFRESH_DELAY),
        }
    }

    pub(super) fn retry_interval(&self) -> std::time::Duration {
        self.settings.retry_interval
    }

    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Must be called with `refresh_lock` held
    async fn resolve_locked(&self) -> Result<CredentialBundle, AuthError> {
        self.reconcile_with_store().await;
        self.persist_pending().await;

        let current = self.inner.read().await.bundle.clone();
        match current {
            None => self.authorize_locked().await,
            Some(bundle) if bundle.is_fresh(self.clock.now(), self.settings.margin) => {
                self.set_state(AuthState::Valid).await;
                Ok(bundle)
            }
            Some(bundle) => self.refresh_locked(bundle).await,
        }
    }

    /// Adopt the persisted record when memory is empty or behind it
    async fn reconcile_with_store(&self) {
        let stored = self.store.load().map(|record| record.credentials);
        let mut inner = self.inner.write().await;
        inner.loaded = true;

        let Some(stored) = stored else {
            return;
        };

        let adopt = match inner.bundle.as_ref() {
            None => true,
            Some(current) => {
                !inner.unsaved
                    && stored.access_token != current.access_token
                    && stored.expires_at > current.expires_at
            }
        };

        if adopt {
            tracing::debug!(
                "Loaded credentials from store (expires: {})",
                stored.expires_at.to_rfc3339()
            );
            inner.bundle = Some(stored);
        }
    }

    /// Retry a save that failed on an earlier access
    async fn persist_pending(&self) {
        let pending = {
            let inner = self.inner.read().await;
            if inner.unsaved {
                inner.bundle.clone()
            } else {
                None
            }
        };

        if let Some(bundle) = pending {
            tracing::debug!("Retrying deferred credential save");
            self.persist(&bundle).await;
        }
    }

    async fn authorize_locked(&self) -> Result<CredentialBundle, AuthError> {
        let Some(authorizer) = self.authorizer.as_ref() else {
            self.set_state(AuthState::Uninitialized).await;
            return Err(AuthError::NoCredentials(
                "no stored credentials and no authorization flow available; run `gdrive-mcp auth`"
                    .to_string(),
            ));
        };

        self.set_state(AuthState::Authorizing).await;
        tracing::info!("No stored credentials, starting authorization");

        let grant = match authorizer.authorize(self.endpoint.as_ref()).await {
            Ok(grant) => grant,
            Err(e) => {
                self.set_state(AuthState::Uninitialized).await;
                tracing::error!("Authorization failed: {}", e);
                return Err(match e {
                    AuthError::NoCredentials(_) => e,
                    other => AuthError::NoCredentials(other.to_string()),
                });
            }
        };

        let Some(refresh_token) = grant.refresh_token.clone().filter(|t| !t.is_empty()) else {
            self.set_state(AuthState::Uninitialized).await;
            return Err(AuthError::NoCredentials(
                "authorization did not yield a refresh token".to_string(),
            ));
        };

        if let Err(reason) = self.check_lifetime(&grant) {
            self.set_state(AuthState::Uninitialized).await;
            tracing::error!("Authorization failed: {}", reason);
            return Err(AuthError::NoCredentials(reason));
        }

        let bundle = CredentialBundle::from_grant(grant, refresh_token, self.clock.now());
        self.install(bundle.clone()).await;
        self.persist(&bundle).await;

        tracing::info!(
            "✅ Authorization complete, token expires: {}",
            bundle.expires_at.to_rfc3339()
        );
        Ok(bundle)
    }

    async fn refresh_locked(&self, current: CredentialBundle) -> Result<CredentialBundle, AuthError> {
        self.set_state(AuthState::Refreshing).await;
        tracing::debug!(
            "Refreshing access token (expires: {})",
            current.expires_at.to_rfc3339()
        );

        let result = tokio::time::timeout(
            self.settings.timeout,
            self.endpoint.refresh(&current.refresh_token),
        )
        .await
        .unwrap_or(Err(GrantError::Timeout(self.settings.timeout)));

        let grant = match result {
            Ok(grant) => grant,
            Err(e) => {
                self.set_state(AuthState::Failed).await;
                tracing::error!("Token refresh failed: {}", e);
                if e.is_invalid_grant() {
                    tracing::error!(
                        "Refresh token was rejected; run `gdrive-mcp auth` to authorize again"
                    );
                }
                return Err(AuthError::RefreshFailed(e.to_string()));
            }
        };

        if let Err(reason) = self.check_lifetime(&grant) {
            self.set_state(AuthState::Failed).await;
            tracing::error!("Token refresh failed: {}", reason);
            return Err(AuthError::RefreshFailed(reason));
        }

        let refreshed = current.refreshed(grant, self.clock.now());
        self.install(refreshed.clone()).await;
        self.persist(&refreshed).await;

        tracing::info!(
            "Access token refreshed, expires: {}",
            refreshed.expires_at.to_rfc3339()
        );
        Ok(refreshed)
    }

    /// A grant must outlive the safety margin, otherwise it is due again immediately
    fn check_lifetime(&self, grant: &TokenGrant) -> Result<(), String> {
        let lifetime = Duration::seconds(grant.expires_in.min(i64::MAX as u64) as i64);
        if lifetime <= self.settings.margin {
            return Err(format!(
                "issued token lives {}s, not longer than the {}s refresh margin",
                lifetime.num_seconds(),
                self.settings.margin.num_seconds()
            ));
        }
        Ok(())
    }

    async fn install(&self, bundle: CredentialBundle) {
        let mut inner = self.inner.write().await;
        inner.bundle = Some(bundle);
        inner.state = AuthState::Valid;
        inner.loaded = true;
    }

    /// Write the bundle through; on failure keep it in memory and retry later
    async fn persist(&self, bundle: &CredentialBundle) {
        let record =
            PersistedCredentialRecord::new(self.client_id.clone(), bundle.clone(), self.clock.now());
        let result = self.store.save(&record);

        let mut inner = self.inner.write().await;
        match result {
            Ok(()) => inner.unsaved = false,
            Err(e) => {
                tracing::warn!("{}; in-memory credentials stay in use until the next retry", e);
                inner.unsaved = true;
            }
        }
    }

    async fn set_state(&self, state: AuthState) {
        self.inner.write().await.state = state;
    }
}
