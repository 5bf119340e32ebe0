use crate::semantic::{EmbeddingError, IndexError, SearchError};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Search engine is not ready")]
    NotReady,

    /// Unknown item id
    #[error("{0}")]
    InvalidArgument(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SearchError> for EngineError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::InvalidRequest(msg) => EngineError::InvalidRequest(msg),
            SearchError::Embedding(e) => EngineError::Embedding(e),
            SearchError::Index(e) => EngineError::Index(e),
        }
    }
}
