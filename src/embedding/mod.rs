/// Local models and indexes
///
/// Reference backends for the collaborator traits in `backend`:
/// - EmbeddingProvider trait with FastEmbedProvider (all-MiniLM-L6-v2, 384-dim)
/// - CrossEncoderScorer for (query, passage) relevance
/// - Tantivy keyword index that also stores chunk text
/// - In-memory HNSW vector index
/// - LocalIndex tying the two indexes together
mod cross_encoder;
mod keyword_index;
mod local;
mod provider;
mod vector_index;

pub use cross_encoder::CrossEncoderScorer;
pub use keyword_index::{KeywordIndex, KeywordIndexError, KeywordSearchResult};
pub use local::{read_jsonl, ChunkRecord, LocalIndex};
pub use provider::{EmbeddingError, EmbeddingProvider, FastEmbedProvider};
pub use vector_index::{HnswParams, SearchResult, VectorIndex, VectorIndexError};
