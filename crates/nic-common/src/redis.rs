/// Redis access with graceful degradation.
///
/// Nothing here returns an error. A failed command logs a warning and reports a miss (or
/// `false`), and the shared connection is dropped so the next call reconnects. The search
/// service is fully functional without Redis.
use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const SCAN_BATCH: usize = 200;

/// Cheap to clone; clones share one multiplexed connection.
#[derive(Clone, Default)]
pub struct RedisCache {
    inner: Option<Arc<Shared>>,
}

struct Shared {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisCache {
    /// Build a cache for `url`. A missing or malformed URL yields a disabled cache.
    pub fn new(url: Option<&str>) -> Self {
        let inner = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "invalid redis url, cache disabled"))
                .ok()
                .map(|client| {
                    Arc::new(Shared {
                        client,
                        conn: Mutex::new(None),
                    })
                })
        });
        Self { inner }
    }

    /// A cache that never talks to Redis.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// PING the server.
    pub async fn is_available(&self) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        self.check(pong, "PING", "").is_some()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        let value = conn.get::<_, Option<String>>(key).await;
        self.check(value, "GET", key)?
    }

    /// GET and decode a JSON value. Undecodable entries count as misses.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw)
            .inspect_err(|e| warn!(error = %e, key, "cached value is not valid JSON"))
            .ok()
    }

    /// SET without expiry.
    pub async fn set(&self, key: &str, value: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let result = conn.set::<_, _, ()>(key, value).await;
        self.check(result, "SET", key).is_some()
    }

    /// SET with a TTL in seconds.
    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_secs: u64) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        let result = conn.set_ex::<_, _, ()>(key, value, ttl_secs).await;
        self.check(result, "SETEX", key).is_some()
    }

    /// Encode `value` as JSON and store it, with a TTL when given.
    pub async fn set_json<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_secs: Option<u64>,
    ) -> bool {
        if self.inner.is_none() {
            return false;
        }
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, key, "failed to encode cache value");
                return false;
            }
        };
        match ttl_secs {
            Some(ttl) => self.set_with_ttl(key, &json, ttl).await,
            None => self.set(key, &json).await,
        }
    }

    /// Delete every key starting with `prefix`, walking the keyspace with SCAN
    /// (KEYS would block the server). Returns how many keys were removed.
    pub async fn delete_by_prefix(&self, prefix: &str) -> Option<usize> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let page: redis::RedisResult<(u64, Vec<String>)> = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await;
            let (next, keys) = self.check(page, "SCAN", &pattern)?;

            if !keys.is_empty() {
                let deleted = conn.del::<_, usize>(&keys).await;
                removed += self.check(deleted, "DEL", &pattern)?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        debug!(prefix, removed, "deleted keys by prefix");
        Some(removed)
    }

    /// Shared connection, established on first use.
    async fn connection(&self) -> Option<MultiplexedConnection> {
        let shared = self.inner.as_ref()?;
        let mut slot = shared.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Some(conn.clone());
        }
        let conn = shared
            .client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()?;
        *slot = Some(conn.clone());
        Some(conn)
    }

    /// Log a failed command and forget the connection so the next call reconnects.
    fn check<T>(&self, result: redis::RedisResult<T>, command: &str, key: &str) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(error = %e, command, key, "redis command failed");
                if let Some(shared) = &self.inner {
                    if let Ok(mut slot) = shared.conn.try_lock() {
                        *slot = None;
                    }
                }
                None
            }
        }
    }
}
