//! In-memory session store
//!
//! Process-local substitute for the Redis store, used by tests and local
//! development. Expiry is checked on read; there is no background sweeper.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{Session, SessionStore, StoreError};

#[derive(Clone)]
struct Entry {
    session: Session,
    expires_at: Instant,
}

/// Session store held entirely in process memory.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let mut entries = self.entries.write();
        match entries.get(id) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.session.clone())),
            Some(_) => {
                // Expired: drop it so it can never be served stale.
                entries.remove(id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        self.entries.write().insert(
            id.to_string(),
            Entry {
                session: session.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.entries.write().remove(id);
        Ok(())
    }
}
