use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::CacheConfig;

/// Short-lived response cache keyed by `resource:tenant:filters`.
///
/// The in-process map is the default. When a Redis URL is configured the
/// same operations go to Redis instead so several instances share one view.
#[derive(Clone)]
pub struct Cache {
    backend: Backend,
    default_ttl: u64,
}

#[derive(Clone)]
enum Backend {
    Memory(Arc<RwLock<HashMap<String, Entry>>>),
    Redis {
        conn: ConnectionManager,
        prefix: String,
    },
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

impl Cache {
    pub async fn new(config: &CacheConfig) -> Result<Self, redis::RedisError> {
        let Some(url) = config.redis_url.as_deref() else {
            return Ok(Self::in_memory(config.ttl_secs));
        };
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            backend: Backend::Redis {
                conn,
                prefix: config.key_prefix.clone(),
            },
            default_ttl: config.ttl_secs,
        })
    }

    pub fn in_memory(default_ttl: u64) -> Self {
        Self {
            backend: Backend::Memory(Arc::new(RwLock::new(HashMap::new()))),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> u64 {
        self.default_ttl
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis { .. } => "redis",
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        match &self.backend {
            Backend::Memory(map) => {
                let now = Instant::now();
                {
                    let guard = map.read().await;
                    match guard.get(key) {
                        Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                        None => return None,
                        Some(_) => {}
                    }
                }
                // Expired: drop it so the map does not wait for the purge task.
                let mut guard = map.write().await;
                if guard.get(key).is_some_and(|e| !e.is_live(now)) {
                    guard.remove(key);
                }
                None
            }
            Backend::Redis { conn, prefix } => {
                let mut conn = conn.clone();
                conn.get::<_, Option<String>>(format!("{prefix}{key}"))
                    .await
                    .ok()
                    .flatten()
            }
        }
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .await
            .and_then(|s| serde_json::from_str(&s).ok())
    }

    /// Stores `value` for `ttl_secs`; zero keeps it until deleted.
    pub async fn set(&self, key: &str, value: &str, ttl_secs: u64) {
        match &self.backend {
            Backend::Memory(map) => {
                let expires_at =
                    (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
                map.write().await.insert(
                    key.to_string(),
                    Entry {
                        value: value.to_string(),
                        expires_at,
                    },
                );
            }
            Backend::Redis { conn, prefix } => {
                let mut conn = conn.clone();
                let k = format!("{prefix}{key}");
                let result: Result<(), _> = if ttl_secs > 0 {
                    conn.set_ex(&k, value, ttl_secs).await
                } else {
                    conn.set(&k, value).await
                };
                if let Err(e) = result {
                    tracing::warn!(key, error = %e, "cache write failed");
                }
            }
        }
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_secs: u64) {
        if let Ok(json) = serde_json::to_string(value) {
            self.set(key, &json, ttl_secs).await;
        }
    }

    pub async fn del(&self, key: &str) {
        match &self.backend {
            Backend::Memory(map) => {
                map.write().await.remove(key);
            }
            Backend::Redis { conn, prefix } => {
                let mut conn = conn.clone();
                let _: Result<(), _> = conn.del(format!("{prefix}{key}")).await;
            }
        }
    }

    /// Removes every key that starts with `prefix`. Returns how many went.
    pub async fn invalidate_pattern(&self, prefix: &str) -> usize {
        match &self.backend {
            Backend::Memory(map) => {
                let mut guard = map.write().await;
                let before = guard.len();
                guard.retain(|k, _| !k.starts_with(prefix));
                before - guard.len()
            }
            Backend::Redis { conn, prefix: ns } => {
                let mut conn = conn.clone();
                let pattern = format!("{ns}{prefix}*");
                match scan_and_delete(&mut conn, &pattern).await {
                    Ok(n) => n,
                    Err(e) => {
                        tracing::warn!(pattern, error = %e, "cache invalidation failed");
                        0
                    }
                }
            }
        }
    }

    /// Drops expired entries from the in-process map. No-op for Redis,
    /// which expires keys itself.
    pub async fn purge_expired(&self) -> usize {
        let Backend::Memory(map) = &self.backend else {
            return 0;
        };
        let now = Instant::now();
        let mut guard = map.write().await;
        let before = guard.len();
        guard.retain(|_, entry| entry.is_live(now));
        before - guard.len()
    }

    pub async fn health_check(&self) -> bool {
        match &self.backend {
            Backend::Memory(_) => true,
            Backend::Redis { conn, .. } => {
                let mut conn = conn.clone();
                redis::cmd("PING")
                    .query_async::<_, String>(&mut conn)
                    .await
                    .is_ok()
            }
        }
    }
}

async fn scan_and_delete(
    conn: &mut ConnectionManager,
    pattern: &str,
) -> Result<usize, redis::RedisError> {
    let mut cursor: u64 = 0;
    let mut removed = 0;
    loop {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(200)
            .query_async(conn)
            .await?;
        if !keys.is_empty() {
            let n: usize = conn.del(&keys).await?;
            removed += n;
        }
        if next == 0 {
            return Ok(removed);
        }
        cursor = next;
    }
}

/// Prefix shared by every cached entry of one resource within one tenant.
pub fn tenant_prefix(resource: &str, tenant_id: Uuid) -> String {
    format!("{resource}:{tenant_id}:")
}

/// Full key for a filtered list; the filters are folded in as JSON.
pub fn key<F: Serialize>(resource: &str, tenant_id: Uuid, filters: &F) -> String {
    let filters = serde_json::to_string(filters).unwrap_or_default();
    format!("{}{filters}", tenant_prefix(resource, tenant_id))
}

pub fn dashboard_key(tenant_id: Uuid) -> String {
    format!("dashboard:{tenant_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn value_survives_until_ttl_then_misses() {
        let cache = Cache::in_memory(30);
        cache.set("players:t:{}", "[1,2,3]", 30).await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(cache.get("players:t:{}").await.as_deref(), Some("[1,2,3]"));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("players:t:{}").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_ttl_never_expires() {
        let cache = Cache::in_memory(30);
        cache.set("k", "v", 0).await;
        tokio::time::advance(Duration::from_secs(86_400)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn json_round_trip() {
        let cache = Cache::in_memory(30);
        let value = json!({"total": 4, "items": ["a", "b"]});
        cache.set_json("dashboard:x", &value, 30).await;
        let back: serde_json::Value = cache.get_json("dashboard:x").await.unwrap();
        assert_eq!(back, value);
    }

    #[tokio::test]
    async fn invalidate_pattern_only_touches_matching_prefix() {
        let cache = Cache::in_memory(30);
        let tenant = Uuid::new_v4();
        let other = Uuid::new_v4();
        cache.set(&key("players", tenant, &json!({"page": 1})), "a", 30).await;
        cache.set(&key("players", tenant, &json!({"page": 2})), "b", 30).await;
        cache.set(&key("players", other, &json!({"page": 1})), "c", 30).await;
        cache.set(&key("requests", tenant, &json!({})), "d", 30).await;

        let removed = cache
            .invalidate_pattern(&tenant_prefix("players", tenant))
            .await;
        assert_eq!(removed, 2);
        assert!(cache.get(&key("players", other, &json!({"page": 1}))).await.is_some());
        assert!(cache.get(&key("requests", tenant, &json!({}))).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn purge_drops_only_expired_entries() {
        let cache = Cache::in_memory(30);
        cache.set("short", "1", 5).await;
        cache.set("long", "2", 60).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.get("long").await.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn del_removes_entry() {
        let cache = Cache::in_memory(30);
        cache.set("k", "v", 30).await;
        cache.del("k").await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.health_check().await);
    }
}
