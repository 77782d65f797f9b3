use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::storage::KeyValueStore;
use crate::models::LoginResponse;

// Storage keys
pub const KEY_TOKEN: &str = "token";
pub const KEY_REFRESH: &str = "refresh";
pub const KEY_USER_ID: &str = "user_id";
pub const KEY_USERNAME: &str = "username";
pub const KEY_FIRST_NAME: &str = "first_name";
pub const KEY_LAST_NAME: &str = "last_name";
pub const KEY_EMAIL: &str = "email";
pub const KEY_PHONE_NUMBER: &str = "phone_number";
pub const KEY_IS_STAFF: &str = "is_staff";

/// Every key the session owns in storage
pub const SESSION_KEYS: [&str; 9] = [
    KEY_TOKEN,
    KEY_REFRESH,
    KEY_USER_ID,
    KEY_USERNAME,
    KEY_FIRST_NAME,
    KEY_LAST_NAME,
    KEY_EMAIL,
    KEY_PHONE_NUMBER,
    KEY_IS_STAFF,
];

/// The currently authenticated identity.
///
/// A session loaded from storage may be partial; anything without an access
/// token counts as logged out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Session {
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub is_staff: bool,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn is_empty(&self) -> bool {
        *self == Session::default()
    }

    /// Name for headers and greetings: full name, then username
    pub fn display_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if full.is_empty() {
            self.username.clone()
        } else {
            Some(full)
        }
    }

    fn from_login(response: LoginResponse) -> Self {
        Self {
            access_token: Some(response.access),
            refresh_token: response.refresh,
            user_id: response.user_id,
            username: response.username,
            first_name: response.first_name,
            last_name: response.last_name,
            email: response.email,
            phone_number: response.phone_number,
            is_staff: response.is_staff,
        }
    }

    /// Key/value pairs to persist; `None` means the key must be absent
    fn entries(&self) -> [(&'static str, Option<String>); 9] {
        [
            (KEY_TOKEN, self.access_token.clone()),
            (KEY_REFRESH, self.refresh_token.clone()),
            (KEY_USER_ID, self.user_id.clone()),
            (KEY_USERNAME, self.username.clone()),
            (KEY_FIRST_NAME, self.first_name.clone()),
            (KEY_LAST_NAME, self.last_name.clone()),
            (KEY_EMAIL, self.email.clone()),
            (KEY_PHONE_NUMBER, self.phone_number.clone()),
            (KEY_IS_STAFF, Some(staff_to_storage(self.is_staff).to_string())),
        ]
    }
}

/// The only place `is_staff` is turned into a string
fn staff_to_storage(is_staff: bool) -> &'static str {
    if is_staff {
        "true"
    } else {
        "false"
    }
}

/// The only place `is_staff` is read back from a string
fn staff_from_storage(value: Option<&str>) -> bool {
    value == Some("true")
}

pub(crate) struct Credentials {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub epoch: u64,
}

struct SessionState {
    session: Session,
    // Bumped by every login/logout so stale refreshes can be detected
    epoch: u64,
}

/// Single source of truth for who is logged in.
///
/// Mutations update memory first, then storage. Shared between the
/// gateway and the refresher through an `Arc`.
pub struct SessionStore {
    storage: Box<dyn KeyValueStore>,
    state: RwLock<SessionState>,
    // Publishes the epoch after every login/logout
    changes: watch::Sender<u64>,
}

impl SessionStore {
    /// Load the session from storage. Never fails: unreadable keys are
    /// logged and treated as absent.
    pub fn load(storage: Box<dyn KeyValueStore>) -> Self {
        let read = |key: &str| match storage.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, error = %e, "Failed to read session key");
                None
            }
        };

        let session = Session {
            access_token: read(KEY_TOKEN),
            refresh_token: read(KEY_REFRESH),
            user_id: read(KEY_USER_ID),
            username: read(KEY_USERNAME),
            first_name: read(KEY_FIRST_NAME),
            last_name: read(KEY_LAST_NAME),
            email: read(KEY_EMAIL),
            phone_number: read(KEY_PHONE_NUMBER),
            is_staff: staff_from_storage(read(KEY_IS_STAFF).as_deref()),
        };
        debug!(
            authenticated = session.is_authenticated(),
            has_refresh = session.refresh_token.is_some(),
            "Session loaded"
        );

        Self {
            storage,
            state: RwLock::new(SessionState { session, epoch: 0 }),
            changes: watch::Sender::new(0),
        }
    }

    /// Wrap into the shared handle used by the gateway
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Replace the session with the login payload. Keys for fields the
    /// payload leaves out are removed, so nothing from a previous user
    /// survives.
    pub fn login(&self, response: LoginResponse) -> Result<Session> {
        let session = Session::from_login(response);
        {
            let mut state = self.write();
            state.session = session.clone();
            self.bump_epoch(&mut state);
            self.persist(&session)?;
        }
        info!(user_id = ?session.user_id, is_staff = session.is_staff, "Logged in");
        Ok(session)
    }

    /// Clear the session and every key it owns. Idempotent.
    pub fn logout(&self) -> Result<()> {
        let mut state = self.write();
        let was_authenticated = state.session.is_authenticated();
        state.session = Session::default();
        self.bump_epoch(&mut state);
        self.remove_all()?;
        if was_authenticated {
            info!("Logged out");
        }
        Ok(())
    }

    /// Snapshot of the in-memory session
    pub fn current(&self) -> Session {
        self.read().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().session.is_authenticated()
    }

    pub fn access_token(&self) -> Option<String> {
        self.read().session.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.read().session.refresh_token.clone()
    }

    /// Current session generation
    pub fn epoch(&self) -> u64 {
        self.read().epoch
    }

    /// Watch the epoch; the receiver wakes on every login, logout and
    /// session end
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Tokens and the epoch they belong to, read under one lock
    pub(crate) fn credentials(&self) -> Credentials {
        let state = self.read();
        Credentials {
            access_token: state.session.access_token.clone(),
            refresh_token: state.session.refresh_token.clone(),
            epoch: state.epoch,
        }
    }

    /// Store a refreshed access token, unless the session was replaced or
    /// cleared since `epoch`. Returns whether the token was written.
    pub(crate) fn replace_access_token(&self, token: &str, epoch: u64) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || !state.session.is_authenticated() {
            debug!(epoch, current = state.epoch, "Discarding refreshed token for stale session");
            return false;
        }
        state.session.access_token = Some(token.to_string());
        if let Err(e) = self.storage.set(KEY_TOKEN, token) {
            warn!(error = %e, "Failed to persist refreshed token");
        }
        true
    }

    /// Clear the session after an unrecoverable auth failure, unless it has
    /// already been replaced since `epoch`. Returns whether it was cleared.
    pub(crate) fn end_if_epoch(&self, epoch: u64) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        state.session = Session::default();
        self.bump_epoch(&mut state);
        if let Err(e) = self.remove_all() {
            warn!(error = %e, "Failed to clear stored session");
        }
        info!("Session ended after failed token refresh");
        true
    }

    fn bump_epoch(&self, state: &mut SessionState) {
        state.epoch += 1;
        self.changes.send_replace(state.epoch);
    }

    fn persist(&self, session: &Session) -> Result<()> {
        for (key, value) in session.entries() {
            match value {
                Some(value) => self
                    .storage
                    .set(key, &value)
                    .with_context(|| format!("Failed to persist session key {key}"))?,
                None => self
                    .storage
                    .remove(key)
                    .with_context(|| format!("Failed to remove session key {key}"))?,
            }
        }
        Ok(())
    }

    fn remove_all(&self) -> Result<()> {
        // Try every key even if one fails, report the first failure
        let mut first_error = None;
        for key in SESSION_KEYS {
            if let Err(e) = self.storage.remove(key) {
                warn!(key, error = %e, "Failed to remove session key");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.context("Failed to clear stored session")),
            None => Ok(()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStore;

    fn full_login() -> LoginResponse {
        LoginResponse {
            access: "A".to_string(),
            refresh: Some("B".to_string()),
            user_id: Some("1".to_string()),
            is_staff: true,
            username: Some("mrojas".to_string()),
            first_name: Some("Marta".to_string()),
            last_name: Some("Rojas".to_string()),
            email: Some("marta@example.com".to_string()),
            phone_number: Some("5551234567".to_string()),
        }
    }

    /// Storage handle shared with the store so tests can inspect it
    struct Shared(Arc<MemoryStore>);

    impl KeyValueStore for Shared {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<()> {
            self.0.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<()> {
            self.0.remove(key)
        }
    }

    fn store() -> (SessionStore, Arc<MemoryStore>) {
        let memory = Arc::new(MemoryStore::new());
        let store = SessionStore::load(Box::new(Shared(Arc::clone(&memory))));
        (store, memory)
    }

    #[test]
    fn test_load_empty_storage() {
        let (store, _) = store();
        let session = store.current();
        assert!(session.is_empty());
        assert!(!session.is_authenticated());
        assert!(!session.is_staff);
    }

    #[test]
    fn test_login_persists_every_field() {
        let (store, memory) = store();
        let session = store.login(full_login()).unwrap();

        assert!(session.is_authenticated());
        assert_eq!(store.current(), session);
        assert_eq!(memory.get(KEY_TOKEN).unwrap().as_deref(), Some("A"));
        assert_eq!(memory.get(KEY_REFRESH).unwrap().as_deref(), Some("B"));
        assert_eq!(memory.get(KEY_USER_ID).unwrap().as_deref(), Some("1"));
        assert_eq!(memory.get(KEY_IS_STAFF).unwrap().as_deref(), Some("true"));
        assert_eq!(memory.len(), SESSION_KEYS.len());
    }

    #[test]
    fn test_logout_clears_all_keys() {
        let (store, memory) = store();
        store.login(full_login()).unwrap();
        store.logout().unwrap();

        assert!(store.current().is_empty());
        for key in SESSION_KEYS {
            assert_eq!(memory.get(key).unwrap(), None, "{key} should be removed");
        }
    }

    #[test]
    fn test_logout_is_idempotent() {
        let (store, _) = store();
        store.logout().unwrap();
        let first = store.current();
        store.logout().unwrap();
        assert_eq!(first, store.current());
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_is_staff_false_is_boolean() {
        let (store, memory) = store();
        let response = LoginResponse {
            is_staff: false,
            ..full_login()
        };
        store.login(response).unwrap();
        assert!(!store.current().is_staff);
        assert_eq!(memory.get(KEY_IS_STAFF).unwrap().as_deref(), Some("false"));

        // Reload from storage: "false" must not read as true
        let reloaded = SessionStore::load(Box::new(Shared(Arc::clone(&memory))));
        assert!(!reloaded.current().is_staff);
    }

    #[test]
    fn test_is_staff_reads_only_exact_true() {
        let memory = Arc::new(MemoryStore::new());
        memory.set(KEY_TOKEN, "A").unwrap();
        memory.set(KEY_IS_STAFF, "True").unwrap();
        let store = SessionStore::load(Box::new(Shared(Arc::clone(&memory))));
        assert!(!store.current().is_staff);

        memory.set(KEY_IS_STAFF, "true").unwrap();
        let store = SessionStore::load(Box::new(Shared(Arc::clone(&memory))));
        assert!(store.current().is_staff);
    }

    #[test]
    fn test_login_overwrites_without_merge() {
        let (store, memory) = store();
        store.login(full_login()).unwrap();

        let second = LoginResponse {
            access: "C".to_string(),
            user_id: Some("2".to_string()),
            ..Default::default()
        };
        let session = store.login(second).unwrap();

        assert_eq!(session.access_token.as_deref(), Some("C"));
        assert_eq!(session.refresh_token, None);
        assert_eq!(session.first_name, None);
        assert_eq!(memory.get(KEY_REFRESH).unwrap(), None);
        assert_eq!(memory.get(KEY_FIRST_NAME).unwrap(), None);
        assert_eq!(memory.get(KEY_USER_ID).unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_partial_storage_is_unauthenticated() {
        let memory = Arc::new(MemoryStore::new());
        memory.set(KEY_USER_ID, "5").unwrap();
        memory.set(KEY_USERNAME, "ghost").unwrap();
        let store = SessionStore::load(Box::new(Shared(memory)));

        let session = store.current();
        assert!(!session.is_authenticated());
        assert_eq!(session.user_id.as_deref(), Some("5"));
    }

    #[test]
    fn test_replace_access_token_respects_epoch() {
        let (store, memory) = store();
        store.login(full_login()).unwrap();
        let epoch = store.epoch();

        assert!(store.replace_access_token("NEW", epoch));
        assert_eq!(store.access_token().as_deref(), Some("NEW"));
        assert_eq!(memory.get(KEY_TOKEN).unwrap().as_deref(), Some("NEW"));

        store.logout().unwrap();
        assert!(!store.replace_access_token("LATE", epoch));
        assert_eq!(store.access_token(), None);
        assert_eq!(memory.get(KEY_TOKEN).unwrap(), None);
    }

    #[test]
    fn test_end_if_epoch_skips_new_session() {
        let (store, _) = store();
        store.login(full_login()).unwrap();
        let stale = store.epoch();
        store.login(full_login()).unwrap();

        assert!(!store.end_if_epoch(stale));
        assert!(store.is_authenticated());

        assert!(store.end_if_epoch(store.epoch()));
        assert!(store.current().is_empty());
    }

    #[test]
    fn test_serialized_session_omits_tokens() {
        let store = SessionStore::load(Box::new(MemoryStore::new()));
        let session = store.login(full_login()).unwrap();

        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["username"], "mrojas");
        assert_eq!(value["is_staff"], true);
        assert!(value.get("access_token").is_none());
        assert!(value.get("refresh_token").is_none());
        assert!(!value.to_string().contains("\"A\""));
    }

    #[test]
    fn test_subscribers_see_every_epoch_change() {
        let store = SessionStore::load(Box::new(MemoryStore::new()));
        let mut changes = store.subscribe();
        assert_eq!(*changes.borrow_and_update(), 0);

        store.login(full_login()).unwrap();
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), store.epoch());

        let epoch = store.epoch();
        assert!(store.end_if_epoch(epoch));
        assert_eq!(*changes.borrow_and_update(), epoch + 1);

        store.logout().unwrap();
        assert_eq!(*changes.borrow_and_update(), store.epoch());
    }

    #[test]
    fn test_display_name() {
        let (store, _) = store();
        assert_eq!(store.current().display_name(), None);

        let session = store.login(full_login()).unwrap();
        assert_eq!(session.display_name().as_deref(), Some("Marta Rojas"));

        let session = store
            .login(LoginResponse {
                access: "A".to_string(),
                username: Some("tech2".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(session.display_name().as_deref(), Some("tech2"));
    }
}
