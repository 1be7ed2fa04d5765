use nic_common::error::CommonError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("config error: {0}")]
    Config(String),

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording error: {0}")]
    Recording(String),

    #[error("Language not properly initialized")]
    IndexNotReady,

    #[error("Index rebuild already in progress")]
    RebuildInProgress,

    #[error("no indexable records in catalog {0}")]
    EmptyCatalog(String),
}
