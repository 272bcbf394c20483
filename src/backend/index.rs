use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndexError {
    /// The backing store cannot be reached at all
    #[error("Index unreachable: {0}")]
    Unreachable(String),

    #[error("Search failed: {0}")]
    Search(String),

    #[error("Chunk not found: {0}")]
    NotFound(String),
}

/// One ranked entry of a lexical or vector search
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// Document identifier
    pub id: String,
    /// Origin-specific score (BM25, cosine similarity, ...)
    pub score: f32,
}

impl IndexHit {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Read-only view of the document index.
///
/// Implementations must be safe for concurrent reads; no turn ever writes.
#[async_trait]
pub trait Index: Send + Sync {
    /// Term-overlap search, best match first
    async fn lexical_search(&self, text: &str, limit: usize) -> Result<Vec<IndexHit>, IndexError>;

    /// Nearest-neighbor search over an embedding, most similar first
    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<IndexHit>, IndexError>;

    async fn fetch_chunk_text(&self, id: &str) -> Result<String, IndexError>;
}
