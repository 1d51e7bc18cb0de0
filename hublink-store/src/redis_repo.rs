use async_trait::async_trait;
use redis::RedisResult;
use tracing::debug;

use hublink_core::locks::{RateLimiter, ShipmentLocks};
use hublink_core::{CoreError, CoreResult};

#[derive(Clone)]
pub struct RedisClient {
    client: redis::Client,
}

impl RedisClient {
    pub async fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }

    pub async fn acquire_lock(&self, key: &str, owner: &str, ttl_seconds: u64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        // SET NX: only set if key does not exist
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(owner)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    pub async fn release_lock(&self, key: &str, owner: &str) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // Only the owner may delete; an expired lock may already belong to someone else.
        let script = redis::Script::new(
            r#"
            if redis.call("GET", KEYS[1]) == ARGV[1] then
                return redis.call("DEL", KEYS[1])
            else
                return 0
            end
        "#,
        );

        let deleted: i64 = script.key(key).arg(owner).invoke_async(&mut conn).await?;
        Ok(deleted == 1)
    }

    pub async fn check_rate_limit(&self, key: &str, limit: i64, window_seconds: i64) -> RedisResult<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let (count,): (i64,) = redis::pipe()
            .atomic()
            .incr(key, 1)
            .expire(key, window_seconds)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count <= limit)
    }
}

#[async_trait]
impl ShipmentLocks for RedisClient {
    async fn try_acquire(&self, key: &str, owner: &str, ttl_seconds: u64) -> CoreResult<bool> {
        self.acquire_lock(key, owner, ttl_seconds)
            .await
            .map_err(|e| CoreError::StorageError(format!("lock {}: {}", key, e)))
    }

    async fn release(&self, key: &str, owner: &str) -> CoreResult<()> {
        let released = self
            .release_lock(key, owner)
            .await
            .map_err(|e| CoreError::StorageError(format!("unlock {}: {}", key, e)))?;
        if !released {
            debug!(key, "Lock already expired or taken over");
        }
        Ok(())
    }
}

#[async_trait]
impl RateLimiter for RedisClient {
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> CoreResult<bool> {
        self.check_rate_limit(key, limit, window_seconds)
            .await
            .map_err(|e| CoreError::StorageError(format!("rate limit {}: {}", key, e)))
    }
}
