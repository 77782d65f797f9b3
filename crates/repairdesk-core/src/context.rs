//! The authentication context handed to everything that needs the session.
//!
//! `AuthContext` owns the session store, the API gateway built on it and
//! the optional background refresh task. There is no global session: pass
//! the context (or its `client()`) to whatever needs it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::api::{ApiClient, BackgroundRefresh};
use crate::auth::{KeyValueStore, Session, SessionStore};
use crate::config::Config;

pub struct AuthContext {
    session: Arc<SessionStore>,
    client: ApiClient,
    refresh_interval: Option<Duration>,
    background: Mutex<Option<BackgroundRefresh>>,
}

impl AuthContext {
    /// Load the persisted session from `storage` and build the gateway
    pub fn new(config: &Config, storage: Box<dyn KeyValueStore>) -> Result<Self> {
        let session = SessionStore::load(storage).shared();
        let client = ApiClient::new(config, Arc::clone(&session))
            .context("Failed to build HTTP client")?;

        Ok(Self {
            session,
            client,
            refresh_interval: config.refresh_interval(),
            background: Mutex::new(None),
        })
    }

    /// Build from config with the configured storage backend
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(config, config.open_storage()?)
    }

    pub fn current_user(&self) -> Session {
        self.session.current()
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// The gateway all API calls must go through
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Authenticate, persist the session and start the proactive refresher
    /// if one is configured. Must be called inside a tokio runtime.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        let response = self
            .client
            .authenticate(username, password)
            .await
            .context("Login failed")?;
        let session = self.session.login(response)?;

        if let Some(every) = self.refresh_interval {
            self.keep_alive(every);
        }
        Ok(session)
    }

    /// Stop the background refresher and clear the session. Idempotent.
    pub fn logout(&self) -> Result<()> {
        if let Some(background) = self.lock_background().take() {
            background.stop();
        }
        self.session.logout()
    }

    /// (Re)start the periodic refresh task. Must be called inside a tokio
    /// runtime.
    pub fn keep_alive(&self, every: Duration) {
        let background = BackgroundRefresh::spawn(Arc::clone(self.client.refresher()), every);
        if self.lock_background().replace(background).is_some() {
            debug!("Replaced running background refresh");
        }
    }

    pub fn is_refreshing_in_background(&self) -> bool {
        self.lock_background()
            .as_ref()
            .is_some_and(BackgroundRefresh::is_running)
    }

    /// Last successful proactive refresh, if any
    pub fn last_background_refresh(&self) -> Option<DateTime<Utc>> {
        self.lock_background()
            .as_ref()
            .and_then(BackgroundRefresh::last_success)
    }

    fn lock_background(&self) -> std::sync::MutexGuard<'_, Option<BackgroundRefresh>> {
        self.background.lock().unwrap_or_else(|e| {
            warn!("Background refresh lock was poisoned");
            e.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;
    use crate::models::LoginResponse;

    fn context(refresh_interval_minutes: Option<u64>) -> AuthContext {
        let config = Config {
            base_url: "http://127.0.0.1:9/api/".to_string(),
            refresh_interval_minutes,
            ..Default::default()
        };
        AuthContext::new(&config, Box::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_logout_stops_background_refresh() {
        let ctx = context(Some(60));
        ctx.session()
            .login(LoginResponse {
                access: "A".to_string(),
                refresh: Some("B".to_string()),
                ..Default::default()
            })
            .unwrap();

        ctx.keep_alive(Duration::from_secs(3600));
        assert!(ctx.is_refreshing_in_background());
        assert_eq!(ctx.last_background_refresh(), None);

        ctx.logout().unwrap();
        assert!(!ctx.is_refreshing_in_background());
        assert!(ctx.current_user().is_empty());

        // Second logout is a no-op
        ctx.logout().unwrap();
        assert!(ctx.current_user().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reactive_refresh_stops_background_refresh() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/devices/"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(serde_json::json!({ "detail": "Token expired" })),
            )
            .mount(&server)
            .await;

        let config = Config {
            base_url: format!("{}/api/", server.uri()),
            refresh_interval_minutes: None,
            ..Default::default()
        };
        let ctx = AuthContext::new(&config, Box::new(MemoryStore::new())).unwrap();
        // No refresh token, so the expired access token cannot be renewed
        ctx.session()
            .login(LoginResponse {
                access: "A".to_string(),
                ..Default::default()
            })
            .unwrap();
        ctx.keep_alive(Duration::from_secs(3600));
        assert!(ctx.is_refreshing_in_background());

        let err = ctx
            .client()
            .get::<serde_json::Value>("devices/")
            .await
            .unwrap_err();
        assert!(err.requires_login());
        assert!(ctx.current_user().is_empty());

        tokio::time::timeout(Duration::from_secs(2), async {
            while ctx.is_refreshing_in_background() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("background refresh should stop once the session is gone");
    }

    #[test]
    fn test_new_context_is_logged_out() {
        let ctx = context(None);
        assert!(!ctx.current_user().is_authenticated());
        assert!(!ctx.is_refreshing_in_background());
    }
}
