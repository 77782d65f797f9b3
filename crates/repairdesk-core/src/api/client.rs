//! API client for the support back-office REST API.
//!
//! Every request made through `ApiClient` carries the session's bearer
//! token. A request rejected with the expiry signal (401 with
//! `{"detail": "Token expired"}`) is retried once after a token refresh;
//! every other failure is returned to the caller untouched.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info, warn};

use crate::auth::SessionStore;
use crate::config::Config;
use crate::models::login::ErrorDetail;
use crate::models::{Employee, LoginRequest, LoginResponse, ProfileUpdate};

use super::refresh::{RefreshFailure, TokenRefresher};
use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

const LOGIN_PATH: &str = "login/";
const REFRESH_PATH: &str = "login/refresh/";
const EMPLOYEES_PATH: &str = "employees/";

/// `detail` value the backend uses to flag an expired access token
const TOKEN_EXPIRED_DETAIL: &str = "Token expired";

/// API client with session-aware authentication.
/// Clone is cheap - reqwest::Client and the session are shared.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionStore>,
    refresher: Arc<TokenRefresher>,
}

impl ApiClient {
    /// Create a client bound to `session`
    pub fn new(config: &Config, session: Arc<SessionStore>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let refresher = Arc::new(TokenRefresher::new(
            client.clone(),
            config.endpoint(REFRESH_PATH),
            Arc::clone(&session),
        ));

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            session,
            refresher,
        })
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.refresher
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Exchange username and password for a login payload.
    ///
    /// Sent without credentials; a 401 here is a bad password, never a
    /// refresh trigger.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<LoginResponse, ApiError> {
        let url = self.url(LOGIN_PATH);
        let response = self
            .client
            .post(&url)
            .json(&LoginRequest { username, password })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse_json(response, &url).await
    }

    fn auth_headers(token: Option<&str>) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        if let Some(token) = token {
            let mut value = header::HeaderValue::from_str(&format!("Bearer {}", token))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn is_expiry_signal(status: StatusCode, body: &str) -> bool {
        status == StatusCode::UNAUTHORIZED
            && serde_json::from_str::<ErrorDetail>(body)
                .ok()
                .and_then(|e| e.detail)
                .is_some_and(|detail| detail == TOKEN_EXPIRED_DETAIL)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: Response) -> Result<Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse response from {}: {}", url, e)))
    }

    /// Send an authenticated request and return the successful response as is.
    ///
    /// The request is sent at most twice: once with the current token and,
    /// if that token turns out to be expired, once more after a refresh.
    /// When the refresh fails the session is ended and
    /// `ApiError::SessionExpired` is returned.
    pub async fn send<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.url(path);
        let credentials = self.session.credentials();
        let epoch = credentials.epoch;
        let mut token = credentials.access_token;
        let mut retried = false;

        loop {
            let mut request = self
                .client
                .request(method.clone(), &url)
                .headers(Self::auth_headers(token.as_deref())?);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            let text = response.text().await.unwrap_or_default();
            if retried || !Self::is_expiry_signal(status, &text) {
                debug!(%method, url = %url, %status, retried, "Request failed");
                return Err(ApiError::from_status(status, &text));
            }
            retried = true;

            if self.session.epoch() != epoch {
                // Another login or logout happened; never retry with its token
                debug!(%method, url = %url, "Session changed during request, not refreshing");
                return Err(ApiError::from_status(status, &text));
            }

            info!(%method, url = %url, "Access token expired, refreshing");
            match self.refresher.refresh_for(epoch).await {
                Ok(new_token) => token = Some(new_token),
                Err(RefreshFailure::SessionChanged) if self.session.is_authenticated() => {
                    // Someone logged in meanwhile; their session is not expired
                    debug!(%method, url = %url, "New session started during refresh");
                    return Err(ApiError::from_status(status, &text));
                }
                Err(failure) => {
                    warn!(error = %failure, "Token refresh failed, ending session");
                    self.session.end_if_epoch(epoch);
                    return Err(ApiError::SessionExpired(failure));
                }
            }
        }
    }

    async fn send_json<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let response = self.send(method, path, body).await?;
        Self::parse_json(response, &self.url(path)).await
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send_json(Method::GET, path, None::<&()>).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(Method::POST, path, Some(body)).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        self.send_json(Method::PUT, path, Some(body)).await
    }

    /// DELETE a resource; any response body is discarded
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.send(Method::DELETE, path, None::<&()>).await?;
        Ok(())
    }

    // ===== Employees =====

    pub async fn fetch_employees(&self) -> Result<Vec<Employee>, ApiError> {
        self.get(EMPLOYEES_PATH).await
    }

    /// Fetch one employee; with the session's `user_id` this is the profile
    pub async fn fetch_employee(&self, user_id: &str) -> Result<Employee, ApiError> {
        self.get(&format!("{}{}/", EMPLOYEES_PATH, user_id)).await
    }

    pub async fn update_employee(
        &self,
        user_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Employee, ApiError> {
        self.put(&format!("{}{}/", EMPLOYEES_PATH, user_id), update).await
    }
}
