/// Index maintenance for the NIC catalogs.
///
/// At startup each configured language is re-indexed only when its LanceDB table is
/// missing or the catalog fingerprint changed. `/rebuild-index` forces a re-index of one
/// or all languages; only one rebuild runs at a time.
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::info;

use nic_common::error::CommonError;
use nic_common::vectordb::VectorRow;

use crate::cache::SearchCache;
use crate::catalog::{self, compose_embedding_text};
use crate::error::AppError;
use crate::language::Language;
use crate::model::CatalogRecord;
use crate::search::SearchEngine;

/// Result of a rebuild request.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub languages: Vec<(Language, usize)>,
    pub elapsed_secs: f64,
}

pub struct IndexService {
    catalogs: Vec<(Language, PathBuf)>,
    engine: Arc<SearchEngine>,
    cache: Arc<SearchCache>,
    rebuild_lock: Mutex<()>,
}

impl IndexService {
    pub fn new(
        catalogs: Vec<(Language, PathBuf)>,
        engine: Arc<SearchEngine>,
        cache: Arc<SearchCache>,
    ) -> Self {
        Self {
            catalogs,
            engine,
            cache,
            rebuild_lock: Mutex::new(()),
        }
    }

    pub fn languages(&self) -> Vec<Language> {
        self.catalogs.iter().map(|(l, _)| *l).collect()
    }

    fn catalog_path(&self, language: Language) -> Result<&PathBuf, AppError> {
        self.catalogs
            .iter()
            .find(|(l, _)| *l == language)
            .map(|(_, p)| p)
            .ok_or(AppError::IndexNotReady)
    }

    /// Check if a re-index is needed for `language` given the current catalog fingerprint.
    ///
    /// Without Redis there is no stored fingerprint, so only a missing table triggers one.
    pub async fn needs_update(
        &self,
        language: Language,
        fingerprint: &str,
    ) -> Result<bool, AppError> {
        if !self.engine.table_exists(language).await? {
            info!(language = %language, "LanceDB table missing, re-index needed");
            return Ok(true);
        }
        match self.cache.get_fingerprint(language).await {
            Some(stored) if stored != fingerprint => {
                info!(language = %language, "catalog changed, re-index needed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Bring one language online at startup, indexing only when needed.
    ///
    /// Returns the number of catalog records now searchable.
    pub async fn prepare(&self, language: Language) -> Result<usize, AppError> {
        let (records, bytes) = catalog::load_catalog(self.catalog_path(language)?)?;
        let fingerprint = self.fingerprint(language, &bytes)?;

        if self.needs_update(language, &fingerprint).await? {
            return self.reindex(language, records, &fingerprint).await;
        }

        let count = records.len();
        self.engine.load_records(language, records).await?;
        info!(language = %language, records = count, "index up to date, catalog loaded");
        Ok(count)
    }

    /// Re-index the given language, or every configured language when `None`.
    pub async fn rebuild(&self, language: Option<Language>) -> Result<RebuildReport, AppError> {
        let _guard = self
            .rebuild_lock
            .try_lock()
            .map_err(|_| AppError::RebuildInProgress)?;
        let started = Instant::now();

        let targets = match language {
            Some(language) => {
                self.catalog_path(language)?;
                vec![language]
            }
            None => self.languages(),
        };

        let mut languages = Vec::with_capacity(targets.len());
        for language in targets {
            let (records, bytes) = catalog::load_catalog(self.catalog_path(language)?)?;
            let fingerprint = self.fingerprint(language, &bytes)?;
            let count = self.reindex(language, records, &fingerprint).await?;
            languages.push((language, count));
        }

        Ok(RebuildReport {
            languages,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    /// Perform a full re-index: embed, store in LanceDB, swap the catalog, reset caches.
    async fn reindex(
        &self,
        language: Language,
        records: Vec<CatalogRecord>,
        fingerprint: &str,
    ) -> Result<usize, AppError> {
        let path = self.catalog_path(language)?;
        if records.is_empty() {
            return Err(AppError::EmptyCatalog(path.display().to_string()));
        }
        let embedder = self.engine.embedder(language).ok_or(AppError::IndexNotReady)?;
        let dimension = embedder.dimensions();
        info!(language = %language, records = records.len(), "starting full re-index");

        // 1. Reuse shipped embeddings when they match the model's dimension
        let texts: Vec<String> = records.iter().map(compose_embedding_text).collect();
        let missing: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.embedding.as_ref().map(Vec::len) != Some(dimension))
            .map(|(i, _)| i)
            .collect();

        // 2. Embed the rest (batched)
        let missing_texts: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
        info!(
            language = %language,
            reused = records.len() - missing.len(),
            to_embed = missing.len(),
            "generating embeddings"
        );
        let computed = if missing_texts.is_empty() {
            Vec::new()
        } else {
            embedder.embed_documents(&missing_texts).await?
        };
        if computed.len() != missing.len() {
            return Err(AppError::Common(CommonError::Embedding(format!(
                "embedding count mismatch: expected {}, got {}",
                missing.len(),
                computed.len()
            ))));
        }

        let mut computed = computed.into_iter();
        let mut missing = missing.into_iter().peekable();
        let mut rows = Vec::with_capacity(records.len());
        for (i, (record, text)) in records.iter().zip(texts).enumerate() {
            let embedding = if missing.peek() == Some(&i) {
                missing.next();
                computed.next().unwrap_or_default()
            } else {
                record.embedding.clone().unwrap_or_default()
            };
            rows.push(VectorRow {
                id: record.id.clone(),
                title: record.title().to_string(),
                text,
                embedding,
            });
        }

        // 3. Swap the table and catalog, then invalidate stale responses
        let count = records.len();
        self.engine.install(language, &rows, records).await?;
        self.cache.invalidate_search_results(language).await;
        self.cache.set_fingerprint(language, fingerprint).await;

        info!(language = %language, vectors = count, "re-index complete");
        Ok(count)
    }

    fn fingerprint(&self, language: Language, catalog_bytes: &[u8]) -> Result<String, AppError> {
        let embedder = self.engine.embedder(language).ok_or(AppError::IndexNotReady)?;
        Ok(catalog_fingerprint(catalog_bytes, embedder.model_name()))
    }
}

/// SHA-256 over the catalog bytes and the embedding model name.
pub fn catalog_fingerprint(catalog_bytes: &[u8], model_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(catalog_bytes);
    hasher.update(b"|");
    hasher.update(model_name.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use nic_common::embedding::TextEmbedder;
    use nic_common::redis::RedisCache;

    use super::*;
    use crate::search::{SearchMode, SearchQuery};
    use crate::testing::{english_engine, indexed_engine, VocabularyEmbedder};

    /// Vocabulary embedder that remembers which documents it was asked to embed.
    #[derive(Default)]
    struct RecordingEmbedder {
        documents: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl TextEmbedder for RecordingEmbedder {
        async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
            self.documents.lock().unwrap().extend_from_slice(texts);
            VocabularyEmbedder.embed_documents(texts).await
        }

        async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
            VocabularyEmbedder.embed_query(query).await
        }

        fn dimensions(&self) -> usize {
            VocabularyEmbedder.dimensions()
        }

        fn model_name(&self) -> &str {
            "vocabulary-recording"
        }
    }

    async fn top_ids(engine: &SearchEngine, query: &str) -> Vec<String> {
        let outcome = engine
            .search(&SearchQuery {
                query: query.to_string(),
                language: Language::English,
                mode: SearchMode::Standard,
                count: 5,
            })
            .await
            .unwrap();
        outcome.results.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn shipped_embeddings_of_matching_size_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        // "shipped" carries the vector for "bicycles" although its text is about wheat.
        let shipped = serde_json::to_string(&VocabularyEmbedder::embed("bicycles")).unwrap();
        let catalog = format!(
            r#"[
            {{"_id": "shipped", "Class": "0111", "Sub-Class": "01111",
             "Sub-Class_Description": "Growing of wheat", "Vector-Embedding_SubClass": {shipped}}},
            {{"_id": "short", "Class": "0112", "Sub-Class": "01121",
             "Sub-Class_Description": "Growing of rice", "embeddings": [1.0, 2.0]}},
            {{"_id": "plain", "Class": "1071", "Sub-Class": "10711",
             "Sub-Class_Description": "Manufacture of bakery products"}}
        ]"#
        );
        let embedder = Arc::new(RecordingEmbedder::default());
        let (engine, indexer) = english_engine(
            dir.path(),
            &catalog,
            Arc::clone(&embedder) as Arc<dyn TextEmbedder>,
            RedisCache::disabled(),
        )
        .await;

        assert_eq!(indexer.prepare(Language::English).await.unwrap(), 3);
        assert_eq!(
            *embedder.documents.lock().unwrap(),
            vec!["Growing of rice", "Manufacture of bakery products"]
        );

        assert_eq!(top_ids(&engine, "bicycles").await, vec!["shipped"]);
        assert_eq!(top_ids(&engine, "growing of rice").await[0], "short");
        assert_eq!(top_ids(&engine, "bakery products").await, vec!["plain"]);
    }

    #[tokio::test]
    async fn prepare_indexes_once_then_loads() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, indexer) = indexed_engine(dir.path()).await;
        assert!(engine.is_ready(Language::English).await);
        assert!(!engine.is_ready(Language::Hindi).await);

        let stats = engine.index_stats(Language::English).await.unwrap();
        assert_eq!(stats.vector_count, 4);
        assert_eq!(stats.id_map_size, 4);
        assert_eq!(stats.embedding_model, "vocabulary-test");

        let fingerprint = indexer.fingerprint(Language::English, b"[]").unwrap();
        assert!(!indexer.needs_update(Language::English, &fingerprint).await.unwrap());
        assert_eq!(indexer.prepare(Language::English).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn rebuild_reports_languages_and_rejects_unconfigured() {
        let dir = tempfile::tempdir().unwrap();
        let (_engine, indexer) = indexed_engine(dir.path()).await;

        let report = indexer.rebuild(None).await.unwrap();
        assert_eq!(report.languages, vec![(Language::English, 4)]);

        assert!(matches!(
            indexer.rebuild(Some(Language::Hindi)).await,
            Err(AppError::IndexNotReady)
        ));
    }

    #[tokio::test]
    async fn concurrent_rebuild_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let (_engine, indexer) = indexed_engine(dir.path()).await;

        let _held = indexer.rebuild_lock.try_lock().unwrap();
        assert!(matches!(
            indexer.rebuild(None).await,
            Err(AppError::RebuildInProgress)
        ));
    }

    #[test]
    fn fingerprint_tracks_catalog_and_model() {
        let a = catalog_fingerprint(b"[]", "all-MiniLM-L6-v2");
        assert_eq!(a.len(), 64);
        assert_eq!(a, catalog_fingerprint(b"[]", "all-MiniLM-L6-v2"));
        assert_ne!(a, catalog_fingerprint(b"[ ]", "all-MiniLM-L6-v2"));
        assert_ne!(a, catalog_fingerprint(b"[]", "paraphrase-multilingual-MiniLM-L12-v2"));
    }
}
