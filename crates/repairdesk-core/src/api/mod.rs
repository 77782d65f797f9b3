//! REST API client module for the support back office.
//!
//! This module provides the `ApiClient` gateway that every feature uses to
//! talk to the backend, and the token refresh machinery behind it.
//!
//! The API uses JWT bearer tokens obtained from `login/` and renewed
//! through `login/refresh/`.

pub mod client;
pub mod error;
pub mod refresh;

pub use client::ApiClient;
pub use error::ApiError;
pub use refresh::{BackgroundRefresh, RefreshFailure, TokenRefresher};
