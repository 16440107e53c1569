use anyhow::Result;
use moka::{future::Cache, Expiry};
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

const MEMORY_CAPACITY: u64 = 10_000;

#[derive(Clone, Debug)]
struct Timed<V> {
    value: V,
    ttl: Duration,
}

type Members = Arc<HashSet<String>>;

/// Each local entry expires after its own TTL.
struct EntryTtl;

impl<V> Expiry<String, Timed<V>> for EntryTtl {
    fn expire_after_create(&self, _key: &String, entry: &Timed<V>, _created_at: Instant) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &Timed<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// Two-tier key/value cache: an in-process tier in front of redis.
///
/// Redis failures are logged and the local tier answers instead, so callers
/// never see a cache error.
pub struct CacheService {
    redis: Option<redis::aio::ConnectionManager>,
    values: Cache<String, Timed<Arc<String>>>,
    // Sets live apart from values and are never size-evicted, only expired
    sets: Cache<String, Timed<Members>>,
}

impl CacheService {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let redis = match redis::Client::open(redis_url) {
            Ok(client) => {
                match client.get_connection_manager().await {
                    Ok(conn) => {
                        tracing::info!("Redis connected successfully");
                        Some(conn)
                    }
                    Err(e) => {
                        tracing::warn!("Redis connection failed: {}, using memory cache only", e);
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Redis client creation failed: {}, using memory cache only", e);
                None
            }
        };

        Ok(Self::local(redis, MEMORY_CAPACITY))
    }

    /// Local tier only; used when no redis is configured and in tests.
    pub fn memory_only() -> Self {
        Self::local(None, MEMORY_CAPACITY)
    }

    fn local(redis: Option<redis::aio::ConnectionManager>, value_capacity: u64) -> Self {
        Self {
            redis,
            values: Cache::builder()
                .max_capacity(value_capacity)
                .expire_after(EntryTtl)
                .build(),
            sets: Cache::builder().expire_after(EntryTtl).build(),
        }
    }

    pub fn has_redis(&self) -> bool {
        self.redis.is_some()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        // Try memory cache first
        if let Some(Timed { value: cached, .. }) = self.values.get(key).await {
            match serde_json::from_str(&cached) {
                Ok(value) => {
                    tracing::debug!("Memory cache hit for key: {}", key);
                    return Some(value);
                }
                Err(e) => tracing::warn!("Discarding undecodable cache entry {}: {}", key, e),
            }
        }

        if let Some(mut redis) = self.redis.clone() {
            match redis.get::<_, Option<String>>(key).await {
                Ok(Some(cached)) => match serde_json::from_str(&cached) {
                    Ok(value) => {
                        tracing::debug!("Redis cache hit for key: {}", key);
                        return Some(value);
                    }
                    Err(e) => tracing::warn!("Discarding undecodable cache entry {}: {}", key, e),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!("Redis get error: {}", e),
            }
        }

        tracing::debug!("Cache miss for key: {}", key);
        None
    }

    /// Stores `value` for `ttl_secs`. Returns false only if it could not be serialized.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) -> bool {
        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Cache serialization failed for {}: {}", key, e);
                return false;
            }
        };

        self.values
            .insert(
                key.to_string(),
                Timed {
                    value: Arc::new(serialized.clone()),
                    ttl: Duration::from_secs(ttl_secs),
                },
            )
            .await;

        if let Some(mut redis) = self.redis.clone() {
            if let Err(e) = redis.set_ex::<_, _, ()>(key, serialized, ttl_secs).await {
                tracing::warn!("Redis set error: {}", e);
            } else {
                tracing::debug!("Cached key: {} with TTL: {}s", key, ttl_secs);
            }
        }

        true
    }

    pub async fn sismember(&self, key: &str, member: &str) -> bool {
        if let Some(Timed { value: members, .. }) = self.sets.get(key).await {
            if members.contains(member) {
                return true;
            }
        }

        if let Some(mut redis) = self.redis.clone() {
            match redis.sismember::<_, _, bool>(key, member).await {
                Ok(found) => return found,
                Err(e) => tracing::warn!("Redis sismember error: {}", e),
            }
        }

        false
    }

    /// Atomically creates the set `key` holding `member` unless it already exists.
    ///
    /// Returns true if this call created it. Concurrent callers racing on the
    /// same key see exactly one `true`. The TTL is set only on creation.
    pub async fn insert_if_absent(&self, key: &str, member: &str, ttl_secs: u64) -> bool {
        let entry = self
            .sets
            .entry(key.to_string())
            .or_insert_with(async {
                Timed {
                    value: Arc::new(HashSet::from([member.to_string()])),
                    ttl: Duration::from_secs(ttl_secs),
                }
            })
            .await;

        if !entry.is_fresh() {
            return false;
        }

        let Some(mut redis) = self.redis.clone() else {
            return true;
        };

        let result: redis::RedisResult<(i64, i64)> = redis::pipe()
            .atomic()
            .cmd("SADD")
            .arg(key)
            .arg(member)
            .cmd("EXPIRE")
            .arg(key)
            .arg(ttl_secs)
            .arg("NX")
            .query_async(&mut redis)
            .await;

        match result {
            // Another replica may have recorded it first
            Ok((added, _)) => added == 1,
            Err(e) => {
                tracing::warn!("Redis insert_if_absent error: {}, relying on memory tier", e);
                true
            }
        }
    }

    pub async fn ping(&self) -> bool {
        if let Some(mut redis) = self.redis.clone() {
            match redis::cmd("PING").query_async::<_, String>(&mut redis).await {
                Ok(_) => true,
                Err(_) => false,
            }
        } else {
            false
        }
    }

    /// Flushes pending local maintenance. Call after in-flight requests have drained.
    pub async fn close(&self) {
        self.values.run_pending_tasks().await;
        self.sets.run_pending_tasks().await;
        tracing::info!("Cache closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriceQuote;

    fn quote(price: f64) -> PriceQuote {
        PriceQuote {
            price,
            market_cap: 0.0,
            volume: 0.0,
            price_change_24h: 0.0,
        }
    }

    #[tokio::test]
    async fn get_returns_what_set_stored() {
        let cache = CacheService::memory_only();
        assert!(cache.get::<PriceQuote>("price:1:0xabc").await.is_none());

        assert!(cache.set("price:1:0xabc", &quote(1.5), 60).await);
        assert_eq!(cache.get::<PriceQuote>("price:1:0xabc").await, Some(quote(1.5)));
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = CacheService::memory_only();
        cache.set("short", &quote(1.0), 1).await;
        cache.set("long", &quote(2.0), 60).await;

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(cache.get::<PriceQuote>("short").await.is_none());
        assert_eq!(cache.get::<PriceQuote>("long").await, Some(quote(2.0)));
    }

    #[tokio::test]
    async fn set_membership() {
        let cache = CacheService::memory_only();
        assert!(!cache.sismember("used_tx:0x01", "0x01").await);

        cache.insert_if_absent("used_tx:0x01", "0x01", 300).await;
        assert!(cache.sismember("used_tx:0x01", "0x01").await);
        assert!(!cache.sismember("used_tx:0x01", "0x02").await);
        assert!(cache.get::<String>("used_tx:0x01").await.is_none());
    }

    #[tokio::test]
    async fn set_members_expire_after_their_ttl() {
        let cache = CacheService::memory_only();
        cache.insert_if_absent("used_tx:0x02", "0x02", 1).await;

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(!cache.sismember("used_tx:0x02", "0x02").await);
        assert!(cache.insert_if_absent("used_tx:0x02", "0x02", 300).await);
    }

    #[tokio::test]
    async fn value_churn_never_evicts_set_members() {
        let cache = CacheService::local(None, 4);
        assert!(cache.insert_if_absent("used_tx:0xcc", "0xcc", 300).await);

        for i in 0..256 {
            cache.set(&format!("price:1:{i}"), &quote(i as f64), 60).await;
        }
        cache.close().await;

        assert!(cache.values.entry_count() <= 4);
        assert!(cache.sismember("used_tx:0xcc", "0xcc").await);
        assert!(!cache.insert_if_absent("used_tx:0xcc", "0xcc", 300).await);
    }

    #[tokio::test]
    async fn insert_if_absent_only_succeeds_once() {
        let cache = CacheService::memory_only();
        assert!(cache.insert_if_absent("used_tx:0xaa", "0xaa", 300).await);
        assert!(!cache.insert_if_absent("used_tx:0xaa", "0xaa", 300).await);
        assert!(cache.sismember("used_tx:0xaa", "0xaa").await);
    }

    #[tokio::test]
    async fn concurrent_insert_if_absent_has_one_winner() {
        let cache = Arc::new(CacheService::memory_only());
        let attempts = (0..16).map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.insert_if_absent("used_tx:0xbb", "0xbb", 300).await })
        });

        let results = futures::future::join_all(attempts).await;
        let winners = results.into_iter().filter(|r| matches!(r, Ok(true))).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn ping_without_redis() {
        let cache = CacheService::memory_only();
        assert!(!cache.ping().await);
        assert!(!cache.has_redis());
        cache.close().await;
    }
}
