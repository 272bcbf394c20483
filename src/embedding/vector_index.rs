/// HNSW vector index for similarity search
use ahash::{HashSet, HashSetExt};
use hnsw_rs::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },
}

/// Search result with document ID and similarity score
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub doc_id: String,
    /// Cosine similarity (higher is more similar)
    pub score: f32,
}

/// HNSW construction and search parameters
#[derive(Debug, Clone, Copy)]
pub struct HnswParams {
    /// Connections per layer
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 64,
        }
    }
}

const MAX_LAYERS: usize = 16;

/// In-memory HNSW index over chunk embeddings
///
/// Uses cosine distance. Not persisted: the owning index rebuilds it from the
/// stored chunks on open.
pub struct VectorIndex {
    index: Hnsw<'static, f32, DistCosine>,
    /// HNSW data ids are positions in this list
    doc_ids: Vec<String>,
    known: HashSet<String>,
    dimension: usize,
    params: HnswParams,
}

impl VectorIndex {
    /// Create an empty index sized for roughly `capacity` vectors
    pub fn new(dimension: usize, capacity: usize, params: HnswParams) -> Self {
        let index = Hnsw::<f32, DistCosine>::new(
            params.m,
            capacity.max(1),
            MAX_LAYERS,
            params.ef_construction,
            DistCosine {},
        );

        Self {
            index,
            doc_ids: Vec::new(),
            known: HashSet::new(),
            dimension,
            params,
        }
    }

    pub fn insert(&mut self, doc_id: &str, vector: &[f32]) -> Result<(), VectorIndexError> {
        if vector.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: vector.len(),
            });
        }

        let data = vector.to_vec();
        self.index.insert((&data, self.doc_ids.len()));
        self.doc_ids.push(doc_id.to_string());
        self.known.insert(doc_id.to_string());

        Ok(())
    }

    pub fn contains(&self, doc_id: &str) -> bool {
        self.known.contains(doc_id)
    }

    /// Search for the `k` nearest neighbors, most similar first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchResult>, VectorIndexError> {
        if query.len() != self.dimension {
            return Err(VectorIndexError::InvalidDimension {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.doc_ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let ef_search = self.params.ef_search.max(k);
        let mut results: Vec<SearchResult> = self
            .index
            .search(query, k, ef_search)
            .into_iter()
            .filter_map(|neighbour| {
                self.doc_ids.get(neighbour.d_id).map(|doc_id| SearchResult {
                    doc_id: doc_id.clone(),
                    score: 1.0 - neighbour.distance, // Convert distance to similarity
                })
            })
            .collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.doc_id.cmp(&b.doc_id)));

        Ok(results)
    }

    pub fn len(&self) -> usize {
        self.doc_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_ids.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}
