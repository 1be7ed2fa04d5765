/// Search engine for NIC codes.
///
/// Embeds a query with the language's model (through the embedding cache), performs a
/// cosine vector search in that language's LanceDB table, and joins the hits with the
/// in-memory catalog. Responses are cached in Redis when available.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use nic_common::embedding::TextEmbedder;
use nic_common::vectordb::{VectorDb, VectorHit, VectorRow};

use crate::cache::{EmbeddingCache, SearchCache};
use crate::error::AppError;
use crate::language::Language;
use crate::model::{round2, CatalogRecord, SearchMetrics, SearchResult};

const INDEX_TYPE: &str = "lancedb-flat-cosine";

/// How aggressively to over-fetch and filter index hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchMode {
    #[default]
    Standard,
    Strict,
    Relaxed,
}

impl SearchMode {
    pub const NAMES: [&'static str; 3] = ["standard", "strict", "relaxed"];

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "standard" => Some(Self::Standard),
            "strict" => Some(Self::Strict),
            "relaxed" => Some(Self::Relaxed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Strict => "strict",
            Self::Relaxed => "relaxed",
        }
    }

    /// Hits fetched from the index per requested result.
    pub fn fetch_multiplier(self) -> usize {
        match self {
            Self::Standard => 2,
            Self::Strict => 3,
            Self::Relaxed => 4,
        }
    }

    /// Minimum similarity a hit needs to be kept.
    pub fn threshold(self) -> f32 {
        match self {
            Self::Standard => 0.5,
            Self::Strict => 0.7,
            Self::Relaxed => 0.3,
        }
    }
}

/// A validated search request.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub language: Language,
    pub mode: SearchMode,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub metrics: SearchMetrics,
}

/// Snapshot reported by `/get-index-stats`.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub language: Language,
    pub vector_count: usize,
    pub index_type: &'static str,
    pub dimension: usize,
    pub index_file_exists: bool,
    pub id_map_size: usize,
    pub embedding_model: String,
    pub embedding_cache_size: usize,
    /// Percentage with two decimals, e.g. "12.50%".
    pub embedding_cache_hit_rate: String,
    pub embedding_requests: u64,
}

/// Per-language index: the embedder and, once built, the catalog keyed by id.
struct LanguageIndex {
    embedder: Arc<dyn TextEmbedder>,
    records: RwLock<Option<HashMap<String, CatalogRecord>>>,
}

pub struct SearchEngine {
    vectordb: Arc<VectorDb>,
    indexes: HashMap<Language, LanguageIndex>,
    embedding_cache: Arc<EmbeddingCache>,
    cache: Arc<SearchCache>,
}

impl SearchEngine {
    pub fn new(
        vectordb: Arc<VectorDb>,
        embedders: HashMap<Language, Arc<dyn TextEmbedder>>,
        embedding_cache: Arc<EmbeddingCache>,
        cache: Arc<SearchCache>,
    ) -> Self {
        let indexes = embedders
            .into_iter()
            .map(|(language, embedder)| {
                (
                    language,
                    LanguageIndex {
                        embedder,
                        records: RwLock::new(None),
                    },
                )
            })
            .collect();
        Self {
            vectordb,
            indexes,
            embedding_cache,
            cache,
        }
    }

    pub fn embedder(&self, language: Language) -> Option<Arc<dyn TextEmbedder>> {
        self.indexes.get(&language).map(|i| Arc::clone(&i.embedder))
    }

    pub fn embedding_cache(&self) -> &EmbeddingCache {
        &self.embedding_cache
    }

    pub async fn is_ready(&self, language: Language) -> bool {
        match self.indexes.get(&language) {
            Some(index) => index.records.read().await.is_some(),
            None => false,
        }
    }

    /// Search one language's index.
    pub async fn search(&self, request: &SearchQuery) -> Result<SearchOutcome, AppError> {
        let started = Instant::now();
        let index = self
            .indexes
            .get(&request.language)
            .ok_or(AppError::IndexNotReady)?;
        if index.records.read().await.is_none() {
            return Err(AppError::IndexNotReady);
        }

        if let Some(results) = self
            .cache
            .get_search_results(request.language, request.mode, request.count, &request.query)
            .await
        {
            debug!(query = %request.query, language = %request.language, "search cache hit");
            let metrics = SearchMetrics {
                total_time_ms: elapsed_ms(started),
                embedding_time_ms: 0.0,
                index_time_ms: 0.0,
                results_count: results.len(),
            };
            return Ok(SearchOutcome { results, metrics });
        }

        let embedding_started = Instant::now();
        let query_embedding = self
            .embedding_cache
            .get_or_embed(index.embedder.as_ref(), &request.query)
            .await?;
        let embedding_time_ms = elapsed_ms(embedding_started);

        let guard = index.records.read().await;
        let records = guard.as_ref().ok_or(AppError::IndexNotReady)?;

        let index_started = Instant::now();
        let limit = request.count * request.mode.fetch_multiplier();
        let hits = self
            .vectordb
            .search(&request.language.table_name(), &query_embedding, limit)
            .await?;
        let index_time_ms = elapsed_ms(index_started);

        let results = rank_hits(&hits, records, request.mode, request.count);

        // Written under the read lock so a rebuild's invalidation always lands after it.
        self.cache
            .set_search_results(
                request.language,
                request.mode,
                request.count,
                &request.query,
                &results,
            )
            .await;
        drop(guard);

        let metrics = SearchMetrics {
            total_time_ms: elapsed_ms(started),
            embedding_time_ms,
            index_time_ms,
            results_count: hits.len(),
        };
        info!(
            query = %request.query,
            language = %request.language,
            mode = request.mode.as_str(),
            hits = hits.len(),
            results = results.len(),
            total_ms = metrics.total_time_ms,
            "search complete"
        );
        Ok(SearchOutcome { results, metrics })
    }

    /// Replace a language's vectors and catalog.
    ///
    /// Holds the write lock only for the table swap, so searches see either the old or the
    /// new index, never a half-written one. If the write fails after the old table is gone,
    /// the language goes offline until the next successful rebuild.
    pub async fn install(
        &self,
        language: Language,
        rows: &[VectorRow],
        records: Vec<CatalogRecord>,
    ) -> Result<(), AppError> {
        let index = self.indexes.get(&language).ok_or(AppError::IndexNotReady)?;
        let dimension = index.embedder.dimensions();
        let table = language.table_name();
        let map = into_record_map(records);

        let mut guard = index.records.write().await;
        match self
            .vectordb
            .create_or_replace_table(&table, rows, dimension)
            .await
        {
            Ok(()) => {
                *guard = Some(map);
                Ok(())
            }
            Err(e) => {
                if !self.vectordb.table_exists(&table).await.unwrap_or(false) {
                    warn!(language = %language, error = %e, "index table lost, language offline");
                    *guard = None;
                }
                Err(e.into())
            }
        }
    }

    /// Attach a catalog to an already-built table without touching LanceDB.
    pub async fn load_records(
        &self,
        language: Language,
        records: Vec<CatalogRecord>,
    ) -> Result<(), AppError> {
        let index = self.indexes.get(&language).ok_or(AppError::IndexNotReady)?;
        *index.records.write().await = Some(into_record_map(records));
        Ok(())
    }

    pub async fn table_exists(&self, language: Language) -> Result<bool, AppError> {
        Ok(self.vectordb.table_exists(&language.table_name()).await?)
    }

    pub async fn index_stats(&self, language: Language) -> Result<IndexStats, AppError> {
        let index = self.indexes.get(&language).ok_or(AppError::IndexNotReady)?;
        let guard = index.records.read().await;
        let records = guard.as_ref().ok_or(AppError::IndexNotReady)?;

        let table = language.table_name();
        let index_file_exists = self.vectordb.table_exists(&table).await?;
        let table_stats = self.vectordb.table_stats(&table).await?;
        let cache_stats = self.embedding_cache.stats().await;

        Ok(IndexStats {
            language,
            vector_count: table_stats.row_count,
            index_type: INDEX_TYPE,
            dimension: table_stats.dimension,
            index_file_exists,
            id_map_size: records.len(),
            embedding_model: index.embedder.model_name().to_string(),
            embedding_cache_size: cache_stats.cache_size,
            embedding_cache_hit_rate: format!("{:.2}%", cache_stats.hit_rate * 100.0),
            embedding_requests: cache_stats.total_requests,
        })
    }
}

fn into_record_map(records: Vec<CatalogRecord>) -> HashMap<String, CatalogRecord> {
    records.into_iter().map(|r| (r.id.clone(), r)).collect()
}

fn elapsed_ms(since: Instant) -> f64 {
    round2(since.elapsed().as_secs_f64() * 1000.0)
}

/// Turn raw index hits into display results.
///
/// Hits under the mode's threshold, unknown ids and records without a usable
/// Sub-Class or Class are dropped. The rest are ordered by similarity (stable for ties)
/// and truncated to `count`.
fn rank_hits(
    hits: &[VectorHit],
    records: &HashMap<String, CatalogRecord>,
    mode: SearchMode,
    count: usize,
) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = hits
        .iter()
        .filter(|hit| hit.similarity() >= mode.threshold())
        .filter_map(|hit| {
            let record = records.get(&hit.id)?;
            let tier = record.tier()?;
            Some(SearchResult::from_record(record, hit.similarity(), tier))
        })
        .collect();

    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    results.truncate(count);
    for (position, result) in results.iter_mut().enumerate() {
        result.rank = position + 1;
    }
    results
}
