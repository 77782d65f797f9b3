//! Authentication module for managing the logged-in session.
//!
//! This module provides:
//! - `SessionStore`: the single source of truth for who is logged in
//! - `KeyValueStore`: durable storage behind it (file, keychain or memory)
//! - `RouteGuard`: login/role gating for views
//!
//! The session survives restarts; it ends on logout or when a token
//! refresh fails.

pub mod credentials;
pub mod guard;
pub mod session;
pub mod storage;

pub use credentials::KeyringStore;
pub use guard::{Access, RouteGuard};
pub use session::{Session, SessionStore, SESSION_KEYS};
pub use storage::{FileStore, KeyValueStore, MemoryStore};
