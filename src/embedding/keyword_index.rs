//! BM25 keyword search over chunk text, backed by tantivy
//!
//! The chunk text is stored next to the id, so this index is also the chunk
//! store the vector side is rebuilt from.
use std::path::Path;
use tantivy::collector::{DocSetCollector, TopDocs};
use tantivy::query::{AllQuery, QueryParser, TermQuery};
use tantivy::schema::*;
use tantivy::{doc, DocAddress, Index, IndexReader, IndexWriter, ReloadPolicy, Searcher, TantivyError};
use thiserror::Error;

const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Error, Debug)]
pub enum KeywordIndexError {
    #[error("Keyword index I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyword index error: {0}")]
    Tantivy(#[from] TantivyError),

    #[error("Keyword index schema has no '{0}' field")]
    MissingField(&'static str),

    #[error("Stored chunk is missing its {0}")]
    CorruptDocument(&'static str),
}

#[derive(Debug, Clone)]
pub struct KeywordSearchResult {
    pub doc_id: String,
    pub score: f32,
}

pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    writer: IndexWriter,
    id_field: Field,
    text_field: Field,
}

fn chunk_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field("doc_id", STRING | STORED);
    builder.add_text_field("text", TEXT | STORED);
    builder.build()
}

impl KeywordIndex {
    /// Open the index under `dir`, creating an empty one on first use
    pub fn open(dir: &Path) -> Result<Self, KeywordIndexError> {
        let index = if dir.join("meta.json").exists() {
            Index::open_in_dir(dir)?
        } else {
            std::fs::create_dir_all(dir)?;
            Index::create_in_dir(dir, chunk_schema())?
        };

        let schema = index.schema();
        let id_field = schema
            .get_field("doc_id")
            .map_err(|_| KeywordIndexError::MissingField("doc_id"))?;
        let text_field = schema
            .get_field("text")
            .map_err(|_| KeywordIndexError::MissingField("text"))?;

        let writer = index.writer(WRITER_HEAP_BYTES)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()?;

        Ok(Self {
            index,
            reader,
            writer,
            id_field,
            text_field,
        })
    }

    /// Stage a chunk, replacing any earlier chunk with the same id.
    /// Nothing is visible to searches until [`KeywordIndex::commit`].
    pub fn upsert(&mut self, doc_id: &str, text: &str) -> Result<(), KeywordIndexError> {
        self.writer
            .delete_term(Term::from_field_text(self.id_field, doc_id));
        self.writer.add_document(doc!(
            self.id_field => doc_id,
            self.text_field => text,
        ))?;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), KeywordIndexError> {
        self.writer.commit()?;
        // Make the commit visible to the next searcher right away
        self.reader.reload()?;
        Ok(())
    }

    /// Top `limit` chunks by BM25 score
    ///
    /// Query syntax errors are tolerated: free-form questions are parsed
    /// leniently and whatever terms survive are searched.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<KeywordSearchResult>, KeywordIndexError> {
        let searcher = self.reader.searcher();

        let query_parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        let (query, errors) = query_parser.parse_query_lenient(query);
        if !errors.is_empty() {
            tracing::debug!("Lenient query parse dropped {} term(s)", errors.len());
        }

        let hits = searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;
        hits.into_iter()
            .map(|(score, address)| {
                let (doc_id, _) = self.read_doc(&searcher, address)?;
                Ok(KeywordSearchResult { doc_id, score })
            })
            .collect()
    }

    /// Stored text of a chunk
    pub fn get_text(&self, doc_id: &str) -> Result<Option<String>, KeywordIndexError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.id_field, doc_id),
            IndexRecordOption::Basic,
        );

        let hit = searcher.search(&query, &TopDocs::with_limit(1))?;
        match hit.into_iter().next() {
            Some((_, address)) => Ok(Some(self.read_doc(&searcher, address)?.1)),
            None => Ok(None),
        }
    }

    /// Every stored (doc_id, text) pair, ordered by doc_id
    pub fn all_chunks(&self) -> Result<Vec<(String, String)>, KeywordIndexError> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;

        let mut chunks = addresses
            .into_iter()
            .map(|address| self.read_doc(&searcher, address))
            .collect::<Result<Vec<_>, _>>()?;
        chunks.sort();
        Ok(chunks)
    }

    fn read_doc(
        &self,
        searcher: &Searcher,
        address: DocAddress,
    ) -> Result<(String, String), KeywordIndexError> {
        let stored: TantivyDocument = searcher.doc(address)?;
        let field = |field: Field| stored.get_first(field).and_then(|v| v.as_str());

        let doc_id = field(self.id_field)
            .ok_or(KeywordIndexError::CorruptDocument("doc_id"))?
            .to_string();
        let text = field(self.text_field).unwrap_or_default().to_string();

        Ok((doc_id, text))
    }

    pub fn len(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_empty_index() {
        let temp = TempDir::new().unwrap();
        let index = KeywordIndex::open(&temp.path().join("keyword")).unwrap();

        assert!(index.is_empty());
        assert!(index.all_chunks().unwrap().is_empty());
        assert!(index.search("anything", 5).unwrap().is_empty());
    }

    #[test]
    fn test_upsert_and_search() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::open(&temp.path().join("keyword")).unwrap();

        index
            .upsert("refunds#0", "Refunds are issued within 30 days of purchase")
            .unwrap();
        index
            .upsert("shipping#0", "Orders ship within two business days")
            .unwrap();
        index.commit().unwrap();

        // Free-form question with punctuation
        let results = index.search("What is the refund policy? (30 days)", 10).unwrap();
        assert!(!results.is_empty());
        assert_eq!(results[0].doc_id, "refunds#0");

        assert_eq!(
            index.get_text("shipping#0").unwrap().as_deref(),
            Some("Orders ship within two business days")
        );
        assert!(index.get_text("missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces() {
        let temp = TempDir::new().unwrap();
        let mut index = KeywordIndex::open(&temp.path().join("keyword")).unwrap();

        index.upsert("a", "first version").unwrap();
        index.commit().unwrap();
        index.upsert("a", "second version").unwrap();
        index.commit().unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get_text("a").unwrap().as_deref(), Some("second version"));
    }

    #[test]
    fn test_chunks_survive_reopen() {
        let temp = TempDir::new().unwrap();
        let index_path = temp.path().join("keyword");

        {
            let mut index = KeywordIndex::open(&index_path).unwrap();
            index.upsert("warranty", "Defects are covered for a year").unwrap();
            index.upsert("returns", "Unused items can be returned").unwrap();
            index.commit().unwrap();
        }

        {
            let index = KeywordIndex::open(&index_path).unwrap();
            assert_eq!(index.len(), 2);

            let chunks = index.all_chunks().unwrap();
            assert_eq!(chunks[0].0, "returns");
            assert_eq!(chunks[1].1, "Defects are covered for a year");
        }
    }
}
