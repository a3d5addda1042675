//! Credentials and account identity for the current device.
//!
//! SYSTEM CONTEXT
//! ==============
//! Sign-in is simulated: a bearer token string is kept in the local store.
//! Without a token the client runs in guest mode and never calls the remote
//! profile endpoint.

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{LocalStore, StoreError, TOKEN_KEY, save_json};

/// How remote calls are authorized.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Bearer(String),
    Guest,
}

impl Credentials {
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Bearer(token) => Some(token.as_str()),
            Self::Guest => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer(_) => f.write_str("Bearer(<redacted>)"),
            Self::Guest => f.write_str("Guest"),
        }
    }
}

/// Read the stored token. Missing, blank, or unreadable tokens mean guest mode.
///
/// Values written by this crate are JSON strings; a bare token left by an
/// older client is accepted as-is.
pub fn load_credentials(store: &dyn LocalStore) -> Credentials {
    let raw = match store.get(TOKEN_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return Credentials::Guest,
        Err(error) => {
            warn!(%error, "failed to read stored token; continuing as guest");
            return Credentials::Guest;
        }
    };

    let token = serde_json::from_str::<String>(&raw).unwrap_or(raw);
    let token = token.trim();
    if token.is_empty() {
        Credentials::Guest
    } else {
        Credentials::Bearer(token.to_owned())
    }
}

/// Persist `token` for later remote calls.
///
/// # Errors
///
/// Returns [`StoreError`] if the local store rejects the write.
pub fn store_token(store: &dyn LocalStore, token: &str) -> Result<(), StoreError> {
    save_json(store, TOKEN_KEY, token.trim())
}

/// Forget the stored token, returning the device to guest mode.
///
/// # Errors
///
/// Returns [`StoreError`] if the local store rejects the removal.
pub fn clear_token(store: &dyn LocalStore) -> Result<(), StoreError> {
    store.remove(TOKEN_KEY)
}

/// Identity shown alongside the profile record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default = "default_plan")]
    pub plan: String,
}

impl Account {
    /// Account used when no token is stored.
    #[must_use]
    pub fn guest() -> Self {
        Self {
            id: 0,
            email: "guest@example.com".to_owned(),
            full_name: Some("Guest User".to_owned()),
            plan: default_plan(),
        }
    }

    /// Account used when a token exists but the remote cannot provide one.
    #[must_use]
    pub fn demo() -> Self {
        Self {
            id: 1,
            email: "demo@example.com".to_owned(),
            full_name: Some("Demo User".to_owned()),
            plan: default_plan(),
        }
    }
}

fn default_plan() -> String {
    "free".to_owned()
}
