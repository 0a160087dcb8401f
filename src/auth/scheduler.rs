// Background token refresh
// Wakes shortly before expiry and refreshes through the manager's critical section

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::manager::AuthManager;

/// How long `cancel` waits for the task before aborting it
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Handle to the running refresh task
pub(crate) struct RefreshSchedule {
    handle: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    next_refresh_at: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl RefreshSchedule {
    /// Spawn the refresh loop; it holds only a weak reference to the manager
    pub(crate) fn spawn(manager: Weak<AuthManager>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let next_refresh_at = Arc::new(Mutex::new(None));

        let handle = tokio::spawn(run(manager, shutdown_rx, next_refresh_at.clone()));

        Self {
            handle: Some(handle),
            shutdown,
            next_refresh_at,
        }
    }

    pub(crate) fn next_refresh_at(&self) -> Option<DateTime<Utc>> {
        *self
            .next_refresh_at
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal the task and wait for it, aborting if it does not stop in time
    pub(crate) async fn cancel(&mut self) {
        let _ = self.shutdown.send(true);

        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
                tracing::warn!("Token refresh task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Drop for RefreshSchedule {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    weak: Weak<AuthManager>,
    mut shutdown: watch::Receiver<bool>,
    next_refresh_at: Arc<Mutex<Option<DateTime<Utc>>>>,
) {
    let mut delay = match weak.upgrade() {
        Some(manager) => manager.next_refresh_delay().await,
        None => return,
    };

    loop {
        {
            let Some(manager) = weak.upgrade() else {
                break;
            };
            let at = manager.now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            *next_refresh_at
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(at);
            tracing::debug!(
                delay_secs = delay.as_secs(),
                next_refresh_at = %at.to_rfc3339(),
                "Next proactive token refresh scheduled"
            );
        }

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => break,
        }

        let Some(manager) = weak.upgrade() else {
            break;
        };

        delay = match manager.refresh_proactively().await {
            Ok(expires_at) => {
                tracing::debug!(
                    "Proactive refresh check complete, token expires: {}",
                    expires_at.to_rfc3339()
                );
                manager.next_refresh_delay().await
            }
            Err(e) => {
                let retry = manager.retry_interval();
                tracing::warn!(
                    error = %e,
                    retry_in_secs = retry.as_secs(),
                    "Proactive token refresh failed, will retry"
                );
                retry
            }
        };
    }

    tracing::debug!("Token refresh task exiting");
}
