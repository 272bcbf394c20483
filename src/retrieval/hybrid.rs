//! Hybrid search combining semantic and keyword search

use crate::backend::{Index, IndexError, IndexHit};
use crate::embedding::EmbeddingProvider;
use crate::retrieval::{
    reciprocal_rank_fusion, Candidate, FusedEntry, FusionConfig, Origin, Query,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrievalError {
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("No index available (lexical: {lexical}; vector: {vector})")]
    NoIndexAvailable { lexical: String, vector: String },

    #[error("{} search failed: {message}", origin.as_str())]
    SearchFailed { origin: Origin, message: String },

    #[error("All searches failed (lexical: {lexical}; vector: {vector})")]
    AllSearchesFailed { lexical: String, vector: String },
}

/// A sub-search that failed while the other one carried the round
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFailure {
    pub origin: Origin,
    pub message: String,
}

/// Fused candidates plus any sub-search failures that were tolerated
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    pub failures: Vec<SearchFailure>,
}

#[derive(Debug)]
enum SubSearchError {
    Index(IndexError),
    Embedding(String),
    Timeout(Duration),
}

impl SubSearchError {
    fn is_unreachable(&self) -> bool {
        matches!(self, SubSearchError::Index(IndexError::Unreachable(_)))
    }
}

impl std::fmt::Display for SubSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubSearchError::Index(e) => write!(f, "{}", e),
            SubSearchError::Embedding(e) => write!(f, "embedding failed: {}", e),
            SubSearchError::Timeout(d) => write!(f, "timed out after {}ms", d.as_millis()),
        }
    }
}

/// Hybrid retriever over a shared index and embedder
pub struct HybridRetriever {
    index: Arc<dyn Index>,
    embedder: Arc<dyn EmbeddingProvider>,
    fusion: FusionConfig,
    search_multiplier: usize,
    tolerate_partial_failure: bool,
    call_timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        index: Arc<dyn Index>,
        embedder: Arc<dyn EmbeddingProvider>,
        fusion: FusionConfig,
        search_multiplier: usize,
        tolerate_partial_failure: bool,
        call_timeout: Duration,
    ) -> Self {
        Self {
            index,
            embedder,
            fusion,
            search_multiplier: search_multiplier.max(1),
            tolerate_partial_failure,
            call_timeout,
        }
    }

    /// Perform hybrid search
    pub async fn retrieve(&self, query: &Query, top_n: usize) -> Result<Retrieval, RetrievalError> {
        if query.text().trim().is_empty() {
            return Err(RetrievalError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if top_n == 0 {
            return Err(RetrievalError::InvalidQuery(
                "top_n must be at least 1".to_string(),
            ));
        }

        let search_limit = top_n * self.search_multiplier;

        // Step 1: Parallel keyword + semantic search
        let (keyword_results, semantic_results) = tokio::join!(
            self.keyword_search(query.text(), search_limit),
            self.semantic_search(query.text(), search_limit)
        );

        // Step 2: Degrade to whichever origin survived
        let mut failures = Vec::new();
        let (keyword_results, semantic_results) = match (keyword_results, semantic_results) {
            (Ok(k), Ok(s)) => (k, s),
            (Err(k), Err(s)) => {
                if k.is_unreachable() && s.is_unreachable() {
                    return Err(RetrievalError::NoIndexAvailable {
                        lexical: k.to_string(),
                        vector: s.to_string(),
                    });
                }
                return Err(RetrievalError::AllSearchesFailed {
                    lexical: k.to_string(),
                    vector: s.to_string(),
                });
            }
            (Err(k), Ok(s)) => {
                let failure = self.tolerate(Origin::Lexical, k)?;
                failures.push(failure);
                (Vec::new(), s)
            }
            (Ok(k), Err(s)) => {
                let failure = self.tolerate(Origin::Vector, s)?;
                failures.push(failure);
                (k, Vec::new())
            }
        };

        tracing::debug!(
            keyword_hits = keyword_results.len(),
            semantic_hits = semantic_results.len(),
            "Sub-searches complete"
        );

        // Step 3: Reciprocal Rank Fusion
        let fused = reciprocal_rank_fusion(&keyword_results, &semantic_results, &self.fusion);

        // Step 4: Hydrate chunk text in rank order; entries that cannot be
        // fetched are replaced by the next ones down the fused list
        let mut candidates = Vec::with_capacity(top_n.min(fused.len()));
        let mut pending = fused.into_iter();
        while candidates.len() < top_n {
            let batch: Vec<FusedEntry> = pending.by_ref().take(top_n - candidates.len()).collect();
            if batch.is_empty() {
                break;
            }

            let texts = futures::future::join_all(batch.iter().map(|e| self.fetch_text(&e.id))).await;
            for (entry, text) in batch.into_iter().zip(texts) {
                match text {
                    Ok(text) => candidates.push(Candidate {
                        origin: entry.origin(),
                        doc_id: entry.id,
                        text,
                        lexical: entry.lexical,
                        vector: entry.vector,
                        fused_score: entry.fused_score,
                        rerank_score: None,
                    }),
                    Err(e) => {
                        tracing::warn!(doc_id = %entry.id, "Dropping candidate without text: {}", e);
                    }
                }
            }
        }

        Ok(Retrieval {
            candidates,
            failures,
        })
    }

    fn tolerate(&self, origin: Origin, error: SubSearchError) -> Result<SearchFailure, RetrievalError> {
        if !self.tolerate_partial_failure {
            return Err(RetrievalError::SearchFailed {
                origin,
                message: error.to_string(),
            });
        }
        tracing::warn!(
            origin = origin.as_str(),
            "Search origin failed, continuing with the other: {}",
            error
        );
        Ok(SearchFailure {
            origin,
            message: error.to_string(),
        })
    }

    /// Keyword search using the lexical index
    async fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>, SubSearchError> {
        tokio::time::timeout(self.call_timeout, self.index.lexical_search(query, limit))
            .await
            .map_err(|_| SubSearchError::Timeout(self.call_timeout))?
            .map_err(SubSearchError::Index)
    }

    /// Semantic search using the vector index
    async fn semantic_search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>, SubSearchError> {
        let search = async {
            // Model inference is CPU bound; keep it off the async workers
            let embedder = Arc::clone(&self.embedder);
            let text = query.to_string();
            let embedding = tokio::task::spawn_blocking(move || embedder.embed(&text))
                .await
                .map_err(|e| SubSearchError::Embedding(e.to_string()))?
                .map_err(|e| SubSearchError::Embedding(e.to_string()))?;

            self.index
                .vector_search(&embedding, limit)
                .await
                .map_err(SubSearchError::Index)
        };

        tokio::time::timeout(self.call_timeout, search)
            .await
            .map_err(|_| SubSearchError::Timeout(self.call_timeout))?
    }

    async fn fetch_text(&self, id: &str) -> Result<String, SubSearchError> {
        tokio::time::timeout(self.call_timeout, self.index.fetch_chunk_text(id))
            .await
            .map_err(|_| SubSearchError::Timeout(self.call_timeout))?
            .map_err(SubSearchError::Index)
    }
}
