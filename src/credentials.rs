//! Read-only access to the host's credential store.
//!
//! The session never writes credentials back; it only reads the auth token
//! and user id at handshake and send time.

use std::collections::HashMap;
use std::sync::RwLock;

pub const TOKEN_KEY: &str = "token";
pub const USER_ID_KEY: &str = "userId";

/// Synchronous key-value lookup supplied by the host application.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Token and user id read together for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
}

impl Credentials {
    /// Read credentials from `store`. Returns `None` when no non-empty token
    /// is present; a missing user id reads as an empty string.
    #[must_use]
    pub fn load(store: &dyn CredentialStore) -> Option<Self> {
        let token = store.get(TOKEN_KEY).filter(|t| !t.trim().is_empty())?;
        let user_id = store.get(USER_ID_KEY).unwrap_or_default();
        Some(Self { token, user_id })
    }
}

/// In-memory credential store, used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_login(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        let store = Self::new();
        store.set(TOKEN_KEY, token);
        store.set(USER_ID_KEY, user_id);
        store
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_owned(), value.into());
        }
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().ok()?.get(key).cloned()
    }
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;
