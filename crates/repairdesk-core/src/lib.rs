//! Core library for repairdesk, the support back-office client.
//!
//! The interesting part is the session lifecycle:
//! - `auth`: the persisted session, its storage backends and route guards
//! - `api`: the authenticated request gateway with refresh-and-retry
//! - `context`: `AuthContext`, which ties both together for consumers

pub mod api;
pub mod auth;
pub mod config;
pub mod context;
pub mod models;

pub use api::{ApiClient, ApiError, RefreshFailure};
pub use auth::{Access, RouteGuard, Session, SessionStore};
pub use config::Config;
pub use context::AuthContext;
