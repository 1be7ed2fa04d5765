/// Caching layers for the NIC search service.
///
/// Redis operations degrade gracefully: if Redis is unavailable, callers fall through to
/// compute from source.
///
/// Key schema (namespaced to avoid collisions):
/// - `nic:v1:emb:{model}:{sha256(text)}`: JSON array of f32 (no TTL, cleared on request)
/// - `nic:v1:search:{language}:{sha256(language|mode|count|query)}`: JSON Vec<SearchResult>
///   (TTL: 3600s, invalidated on rebuild)
/// - `nic:v1:fingerprint:{language}`: catalog fingerprint of the indexed table (no TTL)
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use nic_common::embedding::TextEmbedder;
use nic_common::error::CommonError;
use nic_common::redis::RedisCache;

use crate::language::Language;
use crate::model::SearchResult;
use crate::search::SearchMode;

const KEY_PREFIX: &str = "nic:v1:";
const SEARCH_TTL_SECS: u64 = 3600;

/// Query embedding cache: an in-process LRU in front of Redis.
pub struct EmbeddingCache {
    lru: Mutex<LruCache<String, Vec<f32>>>,
    redis: RedisCache,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EmbeddingCacheStats {
    pub cache_size: usize,
    pub hits: u64,
    pub misses: u64,
    /// Fraction of requests served from cache, in [0, 1].
    pub hit_rate: f64,
    pub total_requests: u64,
}

impl EmbeddingCache {
    pub fn new(capacity: NonZeroUsize, redis: RedisCache) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(capacity)),
            redis,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached embedding for `text`, computing and storing it on a miss.
    pub async fn get_or_embed(
        &self,
        embedder: &dyn TextEmbedder,
        text: &str,
    ) -> Result<Vec<f32>, CommonError> {
        let key = embedding_key(embedder.model_name(), text);

        let local = self.lru.lock().await.get(&key).cloned();
        if let Some(hit) = local {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }

        if let Some(hit) = self.get_remote(&key, embedder.dimensions()).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.lru.lock().await.put(key, hit.clone());
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let embedding = embedder.embed_query(text).await?;
        self.redis.set_json(&key, &embedding, None).await;
        self.lru.lock().await.put(key, embedding.clone());
        Ok(embedding)
    }

    async fn get_remote(&self, key: &str, dimensions: usize) -> Option<Vec<f32>> {
        let embedding: Vec<f32> = self.redis.get_json(key).await?;
        if embedding.len() != dimensions {
            warn!(
                key,
                len = embedding.len(),
                dimensions,
                "ignoring cached embedding of wrong size"
            );
            return None;
        }
        Some(embedding)
    }

    pub async fn stats(&self) -> EmbeddingCacheStats {
        let cache_size = self.lru.lock().await.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_requests = hits + misses;
        let hit_rate = if total_requests == 0 {
            0.0
        } else {
            hits as f64 / total_requests as f64
        };
        EmbeddingCacheStats {
            cache_size,
            hits,
            misses,
            hit_rate,
            total_requests,
        }
    }

    /// Drop every cached embedding, local and in Redis, and reset the counters.
    pub async fn clear(&self) {
        self.lru.lock().await.clear();
        let removed = self
            .redis
            .delete_by_prefix(&format!("{KEY_PREFIX}emb:"))
            .await;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        debug!(redis_keys = ?removed, "embedding cache cleared");
    }
}

/// Redis-backed cache for search responses and index fingerprints.
pub struct SearchCache {
    redis: RedisCache,
}

impl SearchCache {
    pub fn new(redis: RedisCache) -> Self {
        Self { redis }
    }

    // --- Search results ---

    pub async fn get_search_results(
        &self,
        language: Language,
        mode: SearchMode,
        count: usize,
        query: &str,
    ) -> Option<Vec<SearchResult>> {
        self.redis
            .get_json(&search_key(language, mode, count, query))
            .await
    }

    pub async fn set_search_results(
        &self,
        language: Language,
        mode: SearchMode,
        count: usize,
        query: &str,
        results: &[SearchResult],
    ) {
        let key = search_key(language, mode, count, query);
        self.redis
            .set_json(&key, results, Some(SEARCH_TTL_SECS))
            .await;
    }

    /// Delete cached responses for one language. Uses SCAN-based prefix deletion.
    pub async fn invalidate_search_results(&self, language: Language) {
        if let Some(removed) = self
            .redis
            .delete_by_prefix(&format!("{KEY_PREFIX}search:{language}:"))
            .await
        {
            debug!(language = %language, removed, "search cache invalidated");
        }
    }

    // --- Catalog fingerprint ---

    pub async fn get_fingerprint(&self, language: Language) -> Option<String> {
        self.redis
            .get(&format!("{KEY_PREFIX}fingerprint:{language}"))
            .await
    }

    pub async fn set_fingerprint(&self, language: Language, fingerprint: &str) {
        self.redis
            .set(&format!("{KEY_PREFIX}fingerprint:{language}"), fingerprint)
            .await;
    }
}

fn embedding_key(model: &str, text: &str) -> String {
    let hash = Sha256::digest(text.as_bytes());
    format!("{KEY_PREFIX}emb:{model}:{hash:x}")
}

/// Compute a deterministic cache key for a search request using SHA-256.
fn search_key(language: Language, mode: SearchMode, count: usize, query: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(language.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(mode.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(count.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(query.as_bytes());
    let hash = hasher.finalize();
    format!("{KEY_PREFIX}search:{language}:{:x}", hash)
}
