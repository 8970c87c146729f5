use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::catalog::ScrapedProduct;

pub const DEFAULT_TTL_SECS: u64 = 86_400;

/// TTL key-value cache for scrape results, keyed by the scraped URL.
///
/// An explicit instance owned by the pipeline rather than process-global
/// state. The in-memory map is the default backend; Redis takes over when
/// `REDIS_URL` is set. Every failure path demotes to a cache miss, so the
/// cache can never fail a request.
#[derive(Clone)]
pub struct ScrapeCache {
    ttl: Duration,
    redis: Option<redis::Client>,
    entries: Arc<Mutex<HashMap<String, CacheEntry>>>,
}

struct CacheEntry {
    expires_at: Instant,
    payload: String,
}

impl ScrapeCache {
    pub fn from_env() -> Self {
        let ttl = std::env::var("SCRAPE_CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(DEFAULT_TTL_SECS);
        let redis = std::env::var("REDIS_URL")
            .ok()
            .and_then(|url| redis::Client::open(url).ok());
        Self::new(Duration::from_secs(ttl), redis)
    }

    pub fn in_memory(ttl: Duration) -> Self {
        Self::new(ttl, None)
    }

    fn new(ttl: Duration, redis: Option<redis::Client>) -> Self {
        Self {
            ttl,
            redis,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Option<ScrapedProduct> {
        if let Some(client) = &self.redis {
            return redis_get(client, key).await;
        }
        let mut guard = self.entries.lock().await;
        match guard.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => {
                serde_json::from_str(&entry.payload).ok()
            }
            Some(_) => {
                guard.remove(key);
                debug!(target = "iris.cache", key = key, "scrape_cache_expired");
                None
            }
            None => None,
        }
    }

    pub async fn set(&self, key: &str, value: &ScrapedProduct, ttl: Duration) {
        let Ok(payload) = serde_json::to_string(value) else {
            return;
        };
        if let Some(client) = &self.redis {
            redis_set(client, key, payload, ttl).await;
            return;
        }
        let mut guard = self.entries.lock().await;
        guard.insert(
            key.to_string(),
            CacheEntry {
                expires_at: Instant::now() + ttl,
                payload,
            },
        );
    }
}

async fn redis_get(client: &redis::Client, key: &str) -> Option<ScrapedProduct> {
    let mut conn = match client.get_multiplexed_async_connection().await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(target = "iris.cache", error = %err, "redis_unavailable");
            return None;
        }
    };
    let raw: Option<String> = conn.get(key).await.ok();
    raw.and_then(|v| serde_json::from_str(&v).ok())
}

async fn redis_set(client: &redis::Client, key: &str, payload: String, ttl: Duration) {
    if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
        let _: Result<(), _> = conn.set_ex(key, payload, ttl.as_secs()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_product(title: &str) -> ScrapedProduct {
        ScrapedProduct {
            title: Some(title.to_string()),
            ..ScrapedProduct::default()
        }
    }

    #[tokio::test]
    async fn stores_and_returns_entries() {
        let cache = ScrapeCache::in_memory(Duration::from_secs(60));
        let product = sample_product("Lamp");

        cache.set("https://shop.test/lamp", &product, cache.ttl()).await;
        let hit = cache.get("https://shop.test/lamp").await;

        assert_eq!(hit, Some(product));
        assert_eq!(cache.get("https://shop.test/other").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ScrapeCache::in_memory(Duration::from_secs(3600));
        let product = sample_product("Desk");

        cache.set("https://shop.test/desk", &product, cache.ttl()).await;
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.get("https://shop.test/desk").await.is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("https://shop.test/desk").await, None);
    }

    #[tokio::test]
    async fn set_overwrites_previous_entry() {
        let cache = ScrapeCache::in_memory(Duration::from_secs(60));

        cache
            .set("https://shop.test/x", &sample_product("Old"), cache.ttl())
            .await;
        cache
            .set("https://shop.test/x", &sample_product("New"), cache.ttl())
            .await;

        let hit = cache.get("https://shop.test/x").await;
        assert_eq!(hit.unwrap().title.as_deref(), Some("New"));
    }
}
