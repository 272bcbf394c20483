//! Local on-disk index: tantivy for keywords and chunk text, HNSW for vectors

use crate::backend::{Index, IndexError, IndexHit};
use crate::embedding::{EmbeddingProvider, HnswParams, KeywordIndex, VectorIndex};
use crate::error::{RagloopError, Result};
use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

const EMBED_BATCH_SIZE: usize = 32;

/// One pre-chunked passage to import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRecord {
    #[serde(alias = "id")]
    pub doc_id: String,
    pub text: String,
}

/// Read JSON-lines chunk records, skipping blank lines
pub fn read_jsonl(path: &Path) -> Result<Vec<ChunkRecord>> {
    let file = std::fs::File::open(path).map_err(|e| RagloopError::Io {
        source: e,
        context: format!("Failed to open {:?}", path),
    })?;

    let mut records = Vec::new();
    for (line_no, line) in std::io::BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| RagloopError::Io {
            source: e,
            context: format!("Failed to read {:?}", path),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| RagloopError::Json {
            source: e,
            context: format!("{}:{}", path.display(), line_no + 1),
        })?;
        records.push(record);
    }

    Ok(records)
}

enum VectorUpdate {
    Rebuild(VectorIndex),
    Insert(Vec<Vec<f32>>),
}

/// Index backed by the local data directory
pub struct LocalIndex {
    keyword: RwLock<KeywordIndex>,
    vectors: RwLock<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: HnswParams,
    data_dir: PathBuf,
}

impl LocalIndex {
    /// Open the index in `data_dir`, rebuilding the vector index from the
    /// stored chunks
    pub fn open(
        data_dir: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
        params: HnswParams,
    ) -> Result<Self> {
        let keyword = KeywordIndex::open(&data_dir.join("keyword"))?;
        let chunks = keyword.all_chunks()?;
        let vectors = build_vectors(embedder.as_ref(), &chunks, params)?;

        tracing::info!(
            chunks = chunks.len(),
            "Opened local index at {}",
            data_dir.display()
        );

        Ok(Self {
            keyword: RwLock::new(keyword),
            vectors: RwLock::new(vectors),
            embedder,
            params,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Add or replace chunks; returns the number imported
    ///
    /// Later records win over earlier ones with the same id.
    pub async fn import(&self, records: Vec<ChunkRecord>) -> Result<usize> {
        let mut latest: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<ChunkRecord> = Vec::with_capacity(records.len());
        let mut skipped = 0usize;
        for record in records {
            if record.doc_id.is_empty() || record.text.trim().is_empty() {
                skipped += 1;
                continue;
            }
            match latest.get(&record.doc_id) {
                Some(&pos) => unique[pos] = record,
                None => {
                    latest.insert(record.doc_id.clone(), unique.len());
                    unique.push(record);
                }
            }
        }
        if skipped > 0 {
            tracing::warn!("Skipping {} record(s) with empty id or text", skipped);
        }
        if unique.is_empty() {
            return Ok(0);
        }

        let mut keyword = self.keyword.write().await;
        let mut vectors = self.vectors.write().await;
        let replaces = unique.iter().any(|r| vectors.contains(&r.doc_id));

        // Embed before touching either index so a failed embedding leaves
        // both sides as they were
        let embedder = Arc::clone(&self.embedder);
        let params = self.params;
        let update = if replaces {
            // HNSW cannot drop points, so replaced chunks force a rebuild
            let mut chunks: BTreeMap<String, String> = keyword.all_chunks()?.into_iter().collect();
            chunks.extend(unique.iter().map(|r| (r.doc_id.clone(), r.text.clone())));
            let chunks: Vec<(String, String)> = chunks.into_iter().collect();
            let rebuilt = tokio::task::spawn_blocking(move || {
                build_vectors(embedder.as_ref(), &chunks, params)
            })
            .await
            .map_err(|e| RagloopError::Other(e.into()))??;
            VectorUpdate::Rebuild(rebuilt)
        } else {
            let texts: Vec<String> = unique.iter().map(|r| r.text.clone()).collect();
            let embeddings = tokio::task::spawn_blocking(move || embed_all(embedder.as_ref(), &texts))
                .await
                .map_err(|e| RagloopError::Other(e.into()))??;
            VectorUpdate::Insert(embeddings)
        };

        for record in &unique {
            keyword.upsert(&record.doc_id, &record.text)?;
        }
        keyword.commit()?;

        match update {
            VectorUpdate::Rebuild(rebuilt) => *vectors = rebuilt,
            VectorUpdate::Insert(embeddings) => {
                for (record, embedding) in unique.iter().zip(embeddings) {
                    vectors.insert(&record.doc_id, &embedding)?;
                }
            }
        }

        tracing::info!(
            "Imported {} chunk(s) into {}",
            unique.len(),
            self.data_dir.display()
        );
        Ok(unique.len())
    }

    pub async fn len(&self) -> u64 {
        self.keyword.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn embed_all(embedder: &dyn EmbeddingProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let mut embeddings = Vec::with_capacity(texts.len());
    for batch in texts.chunks(EMBED_BATCH_SIZE) {
        embeddings.extend(embedder.embed_batch(batch)?);
    }
    Ok(embeddings)
}

fn build_vectors(
    embedder: &dyn EmbeddingProvider,
    chunks: &[(String, String)],
    params: HnswParams,
) -> Result<VectorIndex> {
    let texts: Vec<String> = chunks.iter().map(|(_, text)| text.clone()).collect();
    let embeddings = embed_all(embedder, &texts)?;

    let mut vectors = VectorIndex::new(embedder.dimension(), chunks.len(), params);
    for ((doc_id, _), embedding) in chunks.iter().zip(embeddings) {
        vectors.insert(doc_id, &embedding)?;
    }
    Ok(vectors)
}

#[async_trait]
impl Index for LocalIndex {
    async fn lexical_search(&self, text: &str, limit: usize) -> std::result::Result<Vec<IndexHit>, IndexError> {
        let keyword = self.keyword.read().await;
        let results = keyword
            .search(text, limit)
            .map_err(|e| IndexError::Search(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|r| IndexHit::new(r.doc_id, r.score))
            .collect())
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        limit: usize,
    ) -> std::result::Result<Vec<IndexHit>, IndexError> {
        let vectors = self.vectors.read().await;
        let results = vectors
            .search(embedding, limit)
            .map_err(|e| IndexError::Search(e.to_string()))?;

        Ok(results
            .into_iter()
            .map(|r| IndexHit::new(r.doc_id, r.score))
            .collect())
    }

    async fn fetch_chunk_text(&self, id: &str) -> std::result::Result<String, IndexError> {
        let keyword = self.keyword.read().await;
        keyword
            .get_text(id)
            .map_err(|e| IndexError::Search(e.to_string()))?
            .ok_or_else(|| IndexError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingError;
    use std::io::Write;
    use tempfile::TempDir;

    /// Bag-of-letters embedding; enough for nearest-neighbour sanity checks
    struct LetterEmbedder;

    impl EmbeddingProvider for LetterEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            let mut v = vec![0.01; 26];
            for c in text.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                v[(c - b'a') as usize] += 1.0;
            }
            Ok(v)
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            26
        }

        fn model_name(&self) -> &str {
            "letters"
        }
    }

    /// Refuses any text mentioning "poison"
    struct PickyEmbedder;

    impl EmbeddingProvider for PickyEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            if text.contains("poison") {
                return Err(EmbeddingError::GenerationError("refused".to_string()));
            }
            LetterEmbedder.embed(text)
        }

        fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }

        fn dimension(&self) -> usize {
            26
        }

        fn model_name(&self) -> &str {
            "picky"
        }
    }

    fn record(doc_id: &str, text: &str) -> ChunkRecord {
        ChunkRecord {
            doc_id: doc_id.to_string(),
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_import_and_search() {
        let temp = TempDir::new().unwrap();
        let index = LocalIndex::open(temp.path(), Arc::new(LetterEmbedder), HnswParams::default()).unwrap();
        assert!(index.is_empty().await);

        let imported = index
            .import(vec![
                record("refunds", "Refunds are issued within thirty days"),
                record("shipping", "Orders ship within two business days"),
                record("", "no id"),
            ])
            .await
            .unwrap();
        assert_eq!(imported, 2);

        let lexical = index.lexical_search("refunds", 5).await.unwrap();
        assert_eq!(lexical[0].id, "refunds");

        let embedding = LetterEmbedder.embed("Orders ship within two business days").unwrap();
        let vector = index.vector_search(&embedding, 1).await.unwrap();
        assert_eq!(vector[0].id, "shipping");

        assert_eq!(
            index.fetch_chunk_text("refunds").await.unwrap(),
            "Refunds are issued within thirty days"
        );
        assert!(matches!(
            index.fetch_chunk_text("missing").await,
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reimport_replaces_and_reopen_rebuilds() {
        let temp = TempDir::new().unwrap();
        {
            let index = LocalIndex::open(temp.path(), Arc::new(LetterEmbedder), HnswParams::default()).unwrap();
            index.import(vec![record("a", "first version")]).await.unwrap();
            index.import(vec![record("a", "second version")]).await.unwrap();

            assert_eq!(index.len().await, 1);
            let embedding = LetterEmbedder.embed("second version").unwrap();
            assert_eq!(index.vector_search(&embedding, 5).await.unwrap().len(), 1);
        }

        let reopened = LocalIndex::open(temp.path(), Arc::new(LetterEmbedder), HnswParams::default()).unwrap();
        assert_eq!(reopened.fetch_chunk_text("a").await.unwrap(), "second version");
        let embedding = LetterEmbedder.embed("second version").unwrap();
        assert_eq!(reopened.vector_search(&embedding, 1).await.unwrap()[0].id, "a");
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_index_unchanged() {
        let temp = TempDir::new().unwrap();
        let index = LocalIndex::open(temp.path(), Arc::new(PickyEmbedder), HnswParams::default()).unwrap();
        index.import(vec![record("a", "first version")]).await.unwrap();

        // New chunk
        assert!(index.import(vec![record("b", "poison pill")]).await.is_err());
        assert_eq!(index.len().await, 1);
        assert!(index.lexical_search("pill", 5).await.unwrap().is_empty());
        assert!(matches!(
            index.fetch_chunk_text("b").await,
            Err(IndexError::NotFound(_))
        ));

        // Replacement of an existing chunk
        assert!(index.import(vec![record("a", "poison version")]).await.is_err());
        assert_eq!(index.fetch_chunk_text("a").await.unwrap(), "first version");
        assert!(index.lexical_search("poison", 5).await.unwrap().is_empty());

        let embedding = LetterEmbedder.embed("first version").unwrap();
        assert_eq!(index.vector_search(&embedding, 5).await.unwrap().len(), 1);
    }

    #[test]
    fn test_read_jsonl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("chunks.jsonl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, r#"{{"doc_id": "a", "text": "alpha"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": "b", "text": "beta"}}"#).unwrap();

        let records = read_jsonl(&path).unwrap();
        assert_eq!(records, vec![record("a", "alpha"), record("b", "beta")]);

        writeln!(file, "not json").unwrap();
        let err = read_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains(":4"));
    }
}
