/// Error types shared by the NIC search services.
///
/// These errors represent failures in infrastructure components (vector DB, embeddings,
/// speech-to-text) that any NIC service may depend on. Redis never surfaces here: the cache
/// degrades to a miss instead. Service-specific errors are defined in each binary crate and
/// wrap `CommonError` via `#[from]`.

#[derive(Debug, thiserror::Error)]
pub enum CommonError {
    #[error("vector db error: {0}")]
    VectorDb(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("transcription error: {0}")]
    Transcription(#[from] crate::transcribe::TranscribeError),
}
