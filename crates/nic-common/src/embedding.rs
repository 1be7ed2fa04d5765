/// Embedding wrapper around fastembed.
///
/// `TextEmbedding` from fastembed is synchronous and CPU-bound. All embed calls go through
/// `tokio::task::spawn_blocking`, with the model shared through an `Arc`.
///
/// Each catalog language gets its own model:
/// - English: all-MiniLM-L6-v2 (384 dimensions), the model the NIC catalog embeddings
///   were originally produced with, so precomputed vectors stay compatible.
/// - Hindi: paraphrase-multilingual-MiniLM-L12-v2 (384 dimensions).
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CommonError;

/// Anything that turns text into fixed-size vectors.
///
/// The search service only depends on this trait, so tests can swap in a deterministic
/// embedder without downloading ONNX models.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Embed catalog texts for indexing, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError>;

    /// Embed a single search query.
    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError>;

    /// Dimensionality of every vector this embedder returns.
    fn dimensions(&self) -> usize;

    /// Stable model name, used in cache keys and index fingerprints.
    fn model_name(&self) -> &str;
}

/// Which fastembed model to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingModelKind {
    MiniLmL6,
    MultilingualMiniLmL12,
}

impl EmbeddingModelKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::MiniLmL6 => "all-MiniLM-L6-v2",
            Self::MultilingualMiniLmL12 => "paraphrase-multilingual-MiniLM-L12-v2",
        }
    }

    pub fn dimensions(self) -> usize {
        match self {
            Self::MiniLmL6 | Self::MultilingualMiniLmL12 => 384,
        }
    }

    fn fastembed_model(self) -> fastembed::EmbeddingModel {
        match self {
            Self::MiniLmL6 => fastembed::EmbeddingModel::AllMiniLML6V2,
            Self::MultilingualMiniLmL12 => fastembed::EmbeddingModel::ParaphraseMLMiniLML12V2,
        }
    }
}

/// Wraps fastembed's `TextEmbedding` model for generating vector embeddings.
pub struct Embedder {
    kind: EmbeddingModelKind,
    model: Arc<fastembed::TextEmbedding>,
}

impl Embedder {
    /// Initialize the embedding model.
    ///
    /// This downloads the model on first run. The download happens synchronously
    /// inside a blocking task.
    pub async fn new(kind: EmbeddingModelKind) -> Result<Self, CommonError> {
        let model = tokio::task::spawn_blocking(move || {
            let options = fastembed::InitOptions::new(kind.fastembed_model())
                .with_show_download_progress(true);
            fastembed::TextEmbedding::try_new(options)
        })
        .await
        .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
        .map_err(|e| CommonError::Embedding(format!("model initialization failed: {e}")))?;

        Ok(Self {
            kind,
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl TextEmbedder for Embedder {
    /// Documents are processed in small batches to bound peak memory during ONNX inference.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, CommonError> {
        let texts = texts.to_vec();
        let model = Arc::clone(&self.model);
        tokio::task::spawn_blocking(move || model.embed(texts, Some(32)))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("document embedding failed: {e}")))
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>, CommonError> {
        let input = vec![query.to_string()];
        let model = Arc::clone(&self.model);
        let mut results = tokio::task::spawn_blocking(move || model.embed(input, None))
            .await
            .map_err(|e| CommonError::Embedding(format!("spawn_blocking join error: {e}")))?
            .map_err(|e| CommonError::Embedding(format!("query embedding failed: {e}")))?;
        results
            .pop()
            .ok_or_else(|| CommonError::Embedding("empty embedding result".to_string()))
    }

    fn dimensions(&self) -> usize {
        self.kind.dimensions()
    }

    fn model_name(&self) -> &str {
        self.kind.name()
    }
}
