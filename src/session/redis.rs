//! Redis-backed session store
//!
//! Sessions are stored as JSON strings under `session:<id>` with a key TTL
//! equal to the session max-age, so expiry is enforced by the store itself.
//! Every operation runs under a per-operation timeout; a slow or partitioned
//! store surfaces as [`StoreError::Timeout`] instead of hanging the request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use super::{Session, SessionStore, StoreError};

const KEY_PREFIX: &str = "session:";

/// Session store backed by a Redis (or Valkey) server.
#[derive(Clone)]
pub struct RedisSessionStore {
    manager: redis::aio::ConnectionManager,
    op_timeout: Duration,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore")
            .field("op_timeout", &self.op_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Connect to the store at `url` (e.g. `redis://localhost:6379`).
    ///
    /// The connection manager multiplexes commands over a bounded set of
    /// connections and reconnects on failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the initial connection fails.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            manager,
            op_timeout,
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = Result<T, redis::RedisError>> + Send,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| StoreError::Command(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, id: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.manager.clone();
        let key = format!("{KEY_PREFIX}{id}");

        let raw: Option<String> = self
            .with_timeout(async move { redis::cmd("GET").arg(key).query_async(&mut conn).await })
            .await?;

        match raw {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    async fn save(&self, id: &str, session: &Session, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let key = format!("{KEY_PREFIX}{id}");
        let json =
            serde_json::to_string(session).map_err(|e| StoreError::Serialization(e.to_string()))?;

        // EX takes integer seconds; clamp to at least 1.
        let ttl_seconds = ttl.as_secs().max(1);

        let _: String = self
            .with_timeout(async move {
                redis::cmd("SET")
                    .arg(key)
                    .arg(json)
                    .arg("EX")
                    .arg(ttl_seconds)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let key = format!("{KEY_PREFIX}{id}");

        let _: u64 = self
            .with_timeout(async move { redis::cmd("DEL").arg(key).query_async(&mut conn).await })
            .await?;

        Ok(())
    }
}
