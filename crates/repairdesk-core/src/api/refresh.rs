//! Access-token refresh.
//!
//! `TokenRefresher` exchanges the refresh token for a new access token.
//! Concurrent callers share a single in-flight request, so a burst of
//! expired requests produces one call to the refresh endpoint.
//!
//! `BackgroundRefresh` optionally calls it on a timer to keep the session
//! alive; its failures are logged and never end the session. It stops by
//! itself once the session it was started for is gone.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::config::MAX_REFRESH_INTERVAL;
use crate::models::login::{RefreshRequest, RefreshResponse};

/// Why no new access token could be obtained
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RefreshFailure {
    #[error("no refresh token available")]
    MissingRefreshToken,

    #[error("refresh token rejected with status {status}")]
    Rejected { status: StatusCode },

    #[error("refresh request failed: {0}")]
    Network(String),

    #[error("invalid refresh response: {0}")]
    InvalidResponse(String),

    #[error("session changed while refreshing")]
    SessionChanged,
}

type RefreshResult = Result<String, RefreshFailure>;
type RefreshFuture = Shared<BoxFuture<'static, RefreshResult>>;

/// Single-flight client for the token refresh endpoint.
pub struct TokenRefresher {
    client: Client,
    url: String,
    session: Arc<SessionStore>,
    // In-flight refresh and the session epoch it was started for
    in_flight: Mutex<Option<(u64, RefreshFuture)>>,
}

impl TokenRefresher {
    pub fn new(client: Client, url: String, session: Arc<SessionStore>) -> Self {
        Self {
            client,
            url,
            session,
            in_flight: Mutex::new(None),
        }
    }

    /// Refresh the access token of the current session.
    ///
    /// On success the new token is already stored in the session. This
    /// never clears the session; the caller decides what a failure means.
    pub async fn refresh(&self) -> RefreshResult {
        let epoch = self.session.epoch();
        self.refresh_for(epoch).await
    }

    /// Refresh on behalf of a request made under session `epoch`.
    pub(crate) async fn refresh_for(&self, epoch: u64) -> RefreshResult {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            let joined = slot
                .as_ref()
                .filter(|(started_for, _)| *started_for == epoch)
                .map(|(_, future)| future.clone());

            match joined {
                Some(future) => {
                    debug!(epoch, "Joining in-flight token refresh");
                    future
                }
                None => {
                    let credentials = self.session.credentials();
                    if credentials.epoch != epoch {
                        return Err(RefreshFailure::SessionChanged);
                    }
                    let Some(refresh_token) = credentials.refresh_token else {
                        warn!("No refresh token available");
                        return Err(RefreshFailure::MissingRefreshToken);
                    };

                    let future = Self::request_new_token(
                        self.client.clone(),
                        self.url.clone(),
                        Arc::clone(&self.session),
                        refresh_token,
                        epoch,
                    )
                    .boxed()
                    .shared();
                    *slot = Some((epoch, future.clone()));
                    future
                }
            }
        };

        let result = future.clone().await;

        let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if slot
            .as_ref()
            .is_some_and(|(_, current)| current.ptr_eq(&future))
        {
            *slot = None;
        }

        result
    }

    async fn request_new_token(
        client: Client,
        url: String,
        session: Arc<SessionStore>,
        refresh_token: String,
        epoch: u64,
    ) -> RefreshResult {
        debug!(url = %url, "Requesting new access token");

        let response = client
            .post(&url)
            .json(&RefreshRequest {
                refresh: &refresh_token,
            })
            .send()
            .await
            .map_err(|e| RefreshFailure::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, "Token refresh rejected");
            return Err(RefreshFailure::Rejected { status });
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshFailure::InvalidResponse(e.to_string()))?;

        if !session.replace_access_token(&body.access, epoch) {
            return Err(RefreshFailure::SessionChanged);
        }

        info!("Access token refreshed");
        Ok(body.access)
    }
}

/// Periodic proactive refresh for the session that was current when it was
/// spawned. Ends when that session is replaced or cleared, and is aborted
/// when stopped or dropped.
pub struct BackgroundRefresh {
    handle: JoinHandle<()>,
    last_success: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl BackgroundRefresh {
    /// Spawn onto the current tokio runtime. The first refresh happens one
    /// `every` after spawning; `every` is clamped to at most a week.
    pub fn spawn(refresher: Arc<TokenRefresher>, every: Duration) -> Self {
        let every = every.clamp(Duration::from_millis(1), MAX_REFRESH_INTERVAL);
        let last_success = Arc::new(Mutex::new(None));
        let status = Arc::clone(&last_success);

        let mut changes = refresher.session.subscribe();
        let epoch = *changes.borrow_and_update();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = changes.changed() => {
                        info!(epoch, "Session changed, stopping background token refresh");
                        break;
                    }
                }

                match refresher.refresh_for(epoch).await {
                    Ok(_) => {
                        *status.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
                        debug!("Proactive token refresh succeeded");
                    }
                    Err(e @ (RefreshFailure::MissingRefreshToken | RefreshFailure::SessionChanged)) => {
                        warn!(error = %e, "Stopping background token refresh");
                        break;
                    }
                    Err(e) => warn!(error = %e, "Proactive token refresh failed"),
                }
            }
        });

        info!(interval_secs = every.as_secs(), "Background token refresh started");
        Self {
            handle,
            last_success,
        }
    }

    /// When the last proactive refresh succeeded
    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        debug!("Stopping background token refresh");
    }
}

impl Drop for BackgroundRefresh {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
