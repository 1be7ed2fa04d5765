/// Fixtures shared by the unit tests: a deterministic embedder and a small catalog.
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use nic_common::embedding::TextEmbedder;
use nic_common::error::CommonError;
use nic_common::redis::RedisCache;
use nic_common::vectordb::VectorDb;

use crate::cache::{EmbeddingCache, SearchCache};
use crate::language::Language;
use crate::search::SearchEngine;
use crate::update::IndexService;

const VOCABULARY: [&str; 11] = [
    "growing", "of", "wheat", "rice", "tea", "manufacture", "bakery", "products", "repair",
    "bicycles", "mining",
];

/// Bag-of-words over a fixed vocabulary; unknown words share the last dimension.
pub struct VocabularyEmbedder;

impl VocabularyEmbedder {
    pub fn embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; VOCABULARY.len() + 1];
        for word in text.split_whitespace() {
            let word = word.to_lowercase();
            let slot = VOCABULARY
                .iter()
                .position(|w| *w == word)
                .unwrap_or(VOCABULARY.len());
            v[slot] += 1.0;
        }
        v
    }
}

#[async_trait]
impl TextEmbedder for VocabularyEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        Ok(Self::embed(query))
    }

    fn dimensions(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn model_name(&self) -> &str {
        "vocabulary-test"
    }
}

pub const CATALOG: &str = r#"[
    {"_id": {"$oid": "wheat"}, "Section": "A", "Division": "01", "Group": "011",
     "Class": "0111", "Sub-Class": "01111", "Sub-Class_Description": "Growing of wheat",
     "Description": "Growing of wheat"},
    {"_id": {"$oid": "rice"}, "Section": "A", "Divison": 1, "Group": 11,
     "Class": 112, "Sub-Class": 1121, "Sub-Class_Description": "Growing of rice"},
    {"_id": {"$oid": "bakery"}, "Section": "C", "Division": "10", "Group": "107",
     "Class": "1071", "Sub-Class": "nan", "Class_Description": "Manufacture of bakery products"},
    {"_id": {"$oid": "bicycles"}, "Section": "G", "Class": "N/A", "Sub-Class": "",
     "Description": "Repair of bicycles"}
]"#;

/// A search engine over [`CATALOG`] (English only), indexed into a LanceDB under `dir`.
pub async fn indexed_engine(dir: &Path) -> (Arc<SearchEngine>, Arc<IndexService>) {
    let (engine, indexer) = english_engine(
        dir,
        CATALOG,
        Arc::new(VocabularyEmbedder),
        RedisCache::disabled(),
    )
    .await;
    indexer.prepare(Language::English).await.unwrap();
    (engine, indexer)
}

/// An English-only engine over `catalog`, written to `dir/nic.json`. Nothing is indexed yet.
pub async fn english_engine(
    dir: &Path,
    catalog: &str,
    embedder: Arc<dyn TextEmbedder>,
    redis: RedisCache,
) -> (Arc<SearchEngine>, Arc<IndexService>) {
    let catalog_path = dir.join("nic.json");
    std::fs::write(&catalog_path, catalog).unwrap();

    let vectordb = Arc::new(
        VectorDb::connect(dir.join("lance").to_str().unwrap())
            .await
            .unwrap(),
    );
    let mut embedders: HashMap<Language, Arc<dyn TextEmbedder>> = HashMap::new();
    embedders.insert(Language::English, embedder);

    let cache = Arc::new(SearchCache::new(redis.clone()));
    let embedding_cache = Arc::new(EmbeddingCache::new(NonZeroUsize::new(16).unwrap(), redis));
    let engine = Arc::new(SearchEngine::new(
        vectordb,
        embedders,
        embedding_cache,
        Arc::clone(&cache),
    ));
    let indexer = Arc::new(IndexService::new(
        vec![(Language::English, catalog_path)],
        Arc::clone(&engine),
        cache,
    ));
    (engine, indexer)
}
