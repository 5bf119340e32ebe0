//! Semantic retrieval over catalog image embeddings.
//!
//! # Architecture
//!
//! - `embeddings`: text/image embedding providers (fastembed)
//! - `index`: in-memory vector index with cosine similarity search
//! - `cache`: binary file persistence of catalog embeddings
//! - `query`: category/negation extraction and probe-term synthesis
//! - `hybrid`: weighted image + text query composition
//! - `pipeline`: three-stage filtered text retrieval
//! - `response`: request/response shapes shared by all searches

pub mod cache;
pub mod embeddings;
pub mod hybrid;
pub mod index;
pub mod pipeline;
pub mod query;
pub mod response;

pub use cache::EmbeddingCache;
pub use embeddings::{EmbeddingError, EmbeddingProvider, FastembedProvider, DEFAULT_MODEL};
pub use index::{IndexError, IndexedItem, ItemPayload, SearchParams, VectorIndex};
pub use pipeline::RetrievalPipeline;
pub use query::QueryAnalyzer;
pub use response::{
    FilterStats, ResultItem, SearchRequest, SearchResponse, MAX_SEMANTIC_TOP_K, MAX_TOP_K,
};

/// Failure of a search inside the semantic layer.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}
