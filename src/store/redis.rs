//! Redis-backed store on a bb8 connection pool.

use async_trait::async_trait;
use bb8::Pool;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::info;

use super::{KeyValueStore, StoreError};

const SCAN_BATCH: usize = 100;

/// Connection-pool settings for [`RedisStore`].
#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub url: String,
    pub pool_size: u32,
    pub min_idle: u32,
    pub connection_timeout_secs: u64,
    pub command_timeout_ms: u64,
}

impl StoreConfig {
    #[must_use]
    pub fn new(url: String) -> Self {
        Self {
            url,
            pool_size: 10,
            min_idle: 1,
            connection_timeout_secs: 5,
            command_timeout_ms: 500,
        }
    }

    fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Pooled Redis client with a per-command timeout.
pub struct RedisStore {
    pool: Pool<RedisConnectionManager>,
    command_timeout: Duration,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a `PING`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid or the initial ping fails.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let manager = RedisConnectionManager::new(config.url.as_str())?;

        let pool = Pool::builder()
            .max_size(config.pool_size)
            .min_idle(Some(config.min_idle))
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;

        let store = Self {
            pool,
            command_timeout: config.command_timeout(),
        };
        store.ping().await?;

        info!(
            pool_size = config.pool_size,
            min_idle = config.min_idle,
            command_timeout_ms = config.command_timeout_ms,
            "redis store connected"
        );

        Ok(store)
    }

    async fn conn(
        &self,
    ) -> Result<bb8::PooledConnection<'_, RedisConnectionManager>, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }

    /// Run a store operation under the configured command timeout.
    async fn with_timeout<F, T>(&self, op: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, StoreError>>,
    {
        tokio::time::timeout(self.command_timeout, op)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout.as_millis()))?
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let _: String = conn.ping().await?;
            Ok(())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.get::<_, Option<String>>(key).await?)
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.set::<_, _, ()>(key, value).await?;
            Ok(())
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.del::<_, ()>(key).await?;
            Ok(())
        })
        .await
    }

    async fn ttl_seconds(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let ttl: i64 = conn.ttl(key).await?;
            // -2 means missing key, -1 means no expiry.
            Ok(u64::try_from(ttl).ok())
        })
        .await
    }

    async fn incr_ex(&self, key: &str, window_seconds: u64) -> Result<i64, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let value: i64 = conn.incr(key, 1i64).await?;
            if value == 1 {
                conn.expire::<_, ()>(key, window_seconds as i64).await?;
            }
            Ok(value)
        })
        .await
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.sadd::<_, _, ()>(key, member).await?;
            Ok(())
        })
        .await
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.srem::<_, _, ()>(key, member).await?;
            Ok(())
        })
        .await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.smembers::<_, Vec<String>>(key).await?)
        })
        .await
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.scard::<_, u64>(key).await?)
        })
        .await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.hget::<_, _, Option<String>>(key, field).await?)
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.hset::<_, _, _, ()>(key, field, value).await?;
            Ok(())
        })
        .await
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let entries: std::collections::HashMap<String, String> = conn.hgetall(key).await?;
            Ok(entries.into_iter().collect())
        })
        .await
    }

    async fn hincr(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.hincr::<_, _, _, i64>(key, field, delta).await?)
        })
        .await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            conn.lpush::<_, _, ()>(key, value).await?;
            Ok(())
        })
        .await
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            Ok(conn.lrange::<_, Vec<String>>(key, start, stop).await?)
        })
        .await
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.with_timeout(async {
            let mut conn = self.conn().await?;
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut *conn)
                    .await?;
                keys.extend(batch);
                cursor = next;
                if cursor == 0 {
                    break;
                }
            }
            Ok(keys)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::StoreConfig;
    use std::time::Duration;

    #[test]
    fn store_config_defaults() {
        let config = StoreConfig::new("redis://127.0.0.1:6379/0".to_string());
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.min_idle, 1);
        assert_eq!(config.connection_timeout(), Duration::from_secs(5));
        assert_eq!(config.command_timeout(), Duration::from_millis(500));
    }
}
