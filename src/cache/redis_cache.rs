//! Redis-backed cache.

use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::auth::AuthError;
use crate::cache::EphemeralCache;
use crate::types::{BoxFuture, CacheKey};

/// Reconnect attempts after the first failed connect.
const CONNECT_RETRIES: usize = 2;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Cache over a shared Redis connection.
///
/// The connection is established on first use. Concurrent first users wait
/// on the same attempt; later calls reuse the live handle, and the
/// `ConnectionManager` reconnects on its own after a drop.
pub struct RedisCache {
    client: redis::Client,
    manager: OnceCell<ConnectionManager>,
}

impl RedisCache {
    /// Parse `url` without connecting.
    pub fn open(url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| anyhow::anyhow!("Invalid redis url `{}`: {}", url, e))?;

        Ok(Self {
            client,
            manager: OnceCell::new(),
        })
    }

    /// Shared connection handle, connecting if this is the first call.
    pub async fn connect(&self) -> Result<ConnectionManager, AuthError> {
        self.manager
            .get_or_try_init(|| async {
                let config = ConnectionManagerConfig::new()
                    .set_number_of_retries(CONNECT_RETRIES)
                    .set_connection_timeout(CONNECT_TIMEOUT)
                    .set_response_timeout(RESPONSE_TIMEOUT);
                let manager = self.client.get_connection_manager_with_config(config).await?;
                info!("Connected to redis");
                Ok::<_, redis::RedisError>(manager)
            })
            .await
            .cloned()
            .map_err(|e| AuthError::CacheUnavailable(e.to_string()))
    }

    #[cfg(test)]
    fn is_connected(&self) -> bool {
        self.manager.initialized()
    }

    async fn fetch(&self, key: &CacheKey) -> Result<Option<String>, AuthError> {
        let mut conn = self.connect().await?;
        let value: Option<String> = conn
            .get(key.as_str())
            .await
            .map_err(|e| AuthError::CacheUnavailable(e.to_string()))?;

        debug!(key = %key, hit = value.is_some(), "redis GET");
        Ok(value)
    }

    async fn store(
        &self,
        key: &CacheKey,
        value: String,
        ttl_seconds: u64,
    ) -> Result<(), AuthError> {
        let mut conn = self.connect().await?;
        conn.set_ex::<_, _, ()>(key.as_str(), value, ttl_seconds)
            .await
            .map_err(|e| AuthError::CacheUnavailable(e.to_string()))?;

        debug!(key = %key, ttl_secs = ttl_seconds, "redis SET EX");
        Ok(())
    }
}

impl EphemeralCache for RedisCache {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<String>, AuthError>> {
        Box::pin(self.fetch(key))
    }

    fn set<'a>(
        &'a self,
        key: &'a CacheKey,
        value: String,
        ttl_seconds: u64,
    ) -> BoxFuture<'a, Result<(), AuthError>> {
        Box::pin(self.store(key, value, ttl_seconds))
    }
}
