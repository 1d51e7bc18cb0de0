use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::CoreResult;

/// Serializes work on one shipment across webhook handlers and sync ticks.
#[async_trait]
pub trait ShipmentLocks: Send + Sync {
    /// Set-if-absent with expiry. `owner` is needed to release.
    async fn try_acquire(&self, key: &str, owner: &str, ttl_seconds: u64) -> CoreResult<bool>;

    /// Only releases when still held by `owner`.
    async fn release(&self, key: &str, owner: &str) -> CoreResult<()>;
}

/// Fixed-window request counter keyed by caller.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Counts one hit; false once `limit` is passed inside the window.
    async fn allow(&self, key: &str, limit: i64, window_seconds: i64) -> CoreResult<bool>;
}

pub fn shipment_key(tracking_id: &str) -> String {
    format!("shipment-lock:{}", tracking_id)
}

/// Polls until acquired or `wait` elapses. Returns the owner token on success.
pub async fn acquire(
    locks: &dyn ShipmentLocks,
    key: &str,
    ttl_seconds: u64,
    wait: Duration,
) -> CoreResult<Option<String>> {
    let owner = Uuid::new_v4().to_string();
    let deadline = Instant::now() + wait;

    loop {
        if locks.try_acquire(key, &owner, ttl_seconds).await? {
            return Ok(Some(owner));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Held(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl ShipmentLocks for Held {
        async fn try_acquire(&self, key: &str, owner: &str, _ttl_seconds: u64) -> CoreResult<bool> {
            let mut held = self.0.lock().await;
            if held.contains_key(key) {
                return Ok(false);
            }
            held.insert(key.to_string(), owner.to_string());
            Ok(true)
        }

        async fn release(&self, key: &str, owner: &str) -> CoreResult<()> {
            let mut held = self.0.lock().await;
            if held.get(key).map(String::as_str) == Some(owner) {
                held.remove(key);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_acquire_times_out_while_held() {
        let locks = Held::default();
        let key = shipment_key("GIG-1");

        let owner = acquire(&locks, &key, 30, Duration::from_millis(10)).await.unwrap();
        assert!(owner.is_some());
        assert!(acquire(&locks, &key, 30, Duration::from_millis(60)).await.unwrap().is_none());

        // A stranger's release is a no-op.
        locks.release(&key, "someone-else").await.unwrap();
        assert!(acquire(&locks, &key, 30, Duration::ZERO).await.unwrap().is_none());

        locks.release(&key, &owner.unwrap()).await.unwrap();
        assert!(acquire(&locks, &key, 30, Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(Held::default());
        let key = shipment_key("GIG-2");
        let owner = acquire(locks.as_ref(), &key, 30, Duration::ZERO).await.unwrap().unwrap();

        let releaser = {
            let locks = locks.clone();
            let key = key.clone();
            tokio::spawn(async move {
                sleep(Duration::from_millis(50)).await;
                locks.release(&key, &owner).await.unwrap();
            })
        };

        let waited = acquire(locks.as_ref(), &key, 30, Duration::from_secs(2)).await.unwrap();
        assert!(waited.is_some());
        releaser.await.unwrap();
    }
}
