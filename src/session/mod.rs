//! Server-side sessions
//!
//! A session is an opaque, unguessable identifier (held by the browser in a
//! cookie) mapped to a small bag of named string values. The bag lives in a
//! shared out-of-process store with its own expiry; the cookie only ever
//! carries the identifier.
//!
//! Writes are last-write-wins at the granularity of a full [`SessionStore::save`];
//! there are no per-key merge semantics.

pub mod cookie;
pub mod memory;
pub mod redis;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known session value keys
pub mod keys {
    /// User-supplied display name captured at `/login`
    pub const USER: &str = "user";
    /// One-time PKCE verifier bound to the pending login attempt
    pub const VERIFIER: &str = "verifier";
    /// CSRF state bound to the pending login attempt
    pub const STATE: &str = "state";
    /// Bearer credential for the resource server
    pub const ACCESS_TOKEN: &str = "access_token";
    /// Signed identity token
    pub const ID_TOKEN: &str = "id_token";
    /// Refresh credential
    pub const REFRESH_TOKEN: &str = "refresh_token";
}

/// The value bag stored under one session id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    values: BTreeMap<String, String>,
}

impl Session {
    /// Create an empty session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a value. Overwrites any previous value under the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove and return a value. Used to consume one-time values such as
    /// the PKCE verifier.
    pub fn take(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Remove all values.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Whether the session holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Generate a fresh, unguessable session identifier.
///
/// 32 random bytes, base64url-encoded — the same entropy class as the PKCE
/// verifier, since possession of the id is possession of the session.
#[must_use]
pub fn generate_session_id() -> String {
    let id_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(id_bytes)
}

/// Errors from a session store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not reach the backing store
    #[error("session store connection failed: {0}")]
    Connection(String),

    /// A store command failed
    #[error("session store command failed: {0}")]
    Command(String),

    /// The stored value could not be (de)serialized
    #[error("session serialization failed: {0}")]
    Serialization(String),

    /// The operation did not complete within the configured timeout
    #[error("session store operation timed out")]
    Timeout,
}

/// Keyed, expiring session storage.
///
/// `load` on an unknown or expired id returns `Ok(None)`, never stale data.
/// `save` must be durable before the response carrying the session cookie is
/// sent to the caller.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the session stored under `id`, if any.
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError>;

    /// Persist the full session under `id` with the given time-to-live.
    async fn save(&self, id: &str, session: &Session, ttl: Duration) -> Result<(), StoreError>;

    /// Remove the session stored under `id`. Removing an unknown id is not
    /// an error.
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_set_get_take() {
        let mut session = Session::new();
        assert!(session.is_empty());

        session.set(keys::VERIFIER, "v1");
        assert_eq!(session.get(keys::VERIFIER), Some("v1"));

        // take consumes the value
        assert_eq!(session.take(keys::VERIFIER), Some("v1".to_string()));
        assert_eq!(session.get(keys::VERIFIER), None);
    }

    #[test]
    fn session_clear_removes_everything() {
        let mut session = Session::new();
        session.set(keys::ACCESS_TOKEN, "at");
        session.set(keys::REFRESH_TOKEN, "rt");
        session.clear();
        assert!(session.is_empty());
    }

    #[test]
    fn session_round_trips_through_json() {
        let mut session = Session::new();
        session.set(keys::USER, "alice");
        session.set(keys::VERIFIER, "v");

        let json = serde_json::to_string(&session).unwrap();
        let back: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn session_ids_are_unique_and_url_safe() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert!(a.len() >= 43);
        assert!(!a.contains('+'));
        assert!(!a.contains('/'));
        assert!(!a.contains('='));
    }
}
